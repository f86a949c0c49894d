//! Refresh-or-fallback load cycle: source → extract → convert → cache → documents.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use playbook_cache::CacheStore;
use playbook_extract::SectionExtractor;
use playbook_fetch::{ApiClient, ContentSource, FetchOptions};
use playbook_markdown::ConvertOptions;
use playbook_shared::{
    CacheManifest, Document, DocumentSource, GENERATOR_NAME, LoadConfig, PlaybookError, Result,
    SectionCacheInfo, SectionMapping, content_hash, default_mappings, format_timestamp,
    runtime_version, validate_mappings,
};

/// Outcome of one load cycle.
#[derive(Debug, Clone)]
pub struct LoadResult {
    /// One document per mapping, in mapping order.
    pub documents: Vec<Document>,
    /// Where every document came from.
    pub source: DocumentSource,
    /// When this load completed.
    pub loaded_at: DateTime<Utc>,
    /// When the served content was fetched from the source.
    pub fetched_at: Option<DateTime<Utc>>,
    /// Non-fatal conditions, e.g. serving stale content.
    pub warnings: Vec<String>,
}

/// Per-phase timings of a successful refresh.
#[derive(Debug, Clone, Default)]
pub struct LoadMetrics {
    pub fetch: Duration,
    pub extract: Duration,
    pub convert: Duration,
    pub write: Duration,
    pub total: Duration,
}

/// Progress callback for reporting load status.
pub trait LoadProgress: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each section is converted.
    fn section_converted(&self, filename: &str, current: usize, total: usize);
    /// Called when the load completes successfully.
    fn done(&self, result: &LoadResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl LoadProgress for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn section_converted(&self, _filename: &str, _current: usize, _total: usize) {}
    fn done(&self, _result: &LoadResult) {}
}

/// States of the load cycle. Each transition is taken exactly once.
enum LoadState {
    /// Refresh from the source.
    Direct,
    /// The refresh failed; serve the validated cache or fail hard.
    Fallback { refresh_error: PlaybookError },
    /// Caller asked for the cache only; no further fallback.
    CacheOnly,
}

/// Sequences fetch, extraction, conversion, and caching.
pub struct ContentLoader<S> {
    source: S,
    store: CacheStore,
    mappings: Vec<SectionMapping>,
    convert_opts: ConvertOptions,
    use_cache_only: bool,
    validate_cache: bool,
}

impl ContentLoader<ApiClient> {
    /// Build a loader for the configured source with the default mapping table.
    pub fn from_config(config: &LoadConfig) -> Result<Self> {
        let mappings = default_mappings()?;
        let source = ApiClient::new(FetchOptions::from(config))?;
        let store = CacheStore::new(&config.cache_dir, &config.manifest_path, &mappings);
        let convert_opts = ConvertOptions::for_source(&config.source_url);

        Ok(Self::new(source, store, mappings, convert_opts)?
            .use_cache_only(config.use_cache_only)
            .validate_cache(config.validate_cache))
    }
}

impl<S: ContentSource> ContentLoader<S> {
    pub fn new(
        source: S,
        store: CacheStore,
        mappings: Vec<SectionMapping>,
        convert_opts: ConvertOptions,
    ) -> Result<Self> {
        validate_mappings(&mappings)?;
        Ok(Self {
            source,
            store,
            mappings,
            convert_opts,
            use_cache_only: false,
            validate_cache: true,
        })
    }

    /// Skip the source and serve the cache directly.
    pub fn use_cache_only(mut self, yes: bool) -> Self {
        self.use_cache_only = yes;
        self
    }

    /// Verify cache integrity before a cache-only load. The fallback path
    /// always validates.
    pub fn validate_cache(mut self, yes: bool) -> Self {
        self.validate_cache = yes;
        self
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn mappings(&self) -> &[SectionMapping] {
        &self.mappings
    }

    /// Run one load cycle.
    ///
    /// Fresh content wins; a failed refresh falls back to the last validated
    /// cache with a staleness warning; if that also fails the error names both
    /// causes.
    #[instrument(skip_all, fields(cache_only = self.use_cache_only))]
    pub async fn load(&self, progress: &dyn LoadProgress) -> Result<LoadResult> {
        let mut state = if self.use_cache_only {
            LoadState::CacheOnly
        } else {
            LoadState::Direct
        };

        let result = loop {
            state = match state {
                LoadState::Direct => match self.refresh(progress).await {
                    Ok((result, _)) => break result,
                    Err(e) => {
                        warn!(error = %e, "refresh failed, falling back to cache");
                        LoadState::Fallback { refresh_error: e }
                    }
                },
                LoadState::Fallback { refresh_error } => {
                    match self.load_from_cache(true, progress) {
                        Ok(mut result) => {
                            let fetched = result
                                .fetched_at
                                .as_ref()
                                .map(format_timestamp)
                                .unwrap_or_else(|| "an unknown time".into());
                            result.warnings.push(format!(
                                "Unable to fetch latest content. Serving cached content from \
                                 {fetched}. Information may be outdated."
                            ));
                            break result;
                        }
                        Err(cache_error) => {
                            error!(
                                refresh_error = %refresh_error,
                                cache_error = %cache_error,
                                "no content available"
                            );
                            return Err(PlaybookError::ContentUnavailable {
                                refresh: Box::new(refresh_error),
                                cache: Box::new(cache_error),
                            });
                        }
                    }
                }
                LoadState::CacheOnly => break self.load_from_cache(self.validate_cache, progress)?,
            };
        };

        info!(
            source = %result.source,
            documents = result.documents.len(),
            warnings = result.warnings.len(),
            "load complete"
        );
        progress.done(&result);
        Ok(result)
    }

    /// The direct path alone: fetch, extract all, convert all, then write.
    ///
    /// Nothing touches the cache until every section has been extracted and
    /// converted, and the manifest is written last.
    #[instrument(skip_all)]
    pub async fn refresh(&self, progress: &dyn LoadProgress) -> Result<(LoadResult, LoadMetrics)> {
        let start = Instant::now();
        let mut metrics = LoadMetrics::default();

        // --- Phase 1: Fetch ---
        progress.phase("Fetching content");
        let phase = Instant::now();
        let payload = self.source.fetch().await?;
        let fetched_at = Utc::now();
        metrics.fetch = phase.elapsed();

        // --- Phase 2: Extract (all-or-nothing) ---
        progress.phase("Extracting sections");
        let phase = Instant::now();
        let sections = SectionExtractor::parse(&payload.body).extract(&self.mappings)?;
        metrics.extract = phase.elapsed();

        // --- Phase 3: Convert ---
        progress.phase("Converting to Markdown");
        let phase = Instant::now();
        let total = sections.len();
        let mut converted = Vec::with_capacity(total);
        for (i, section) in sections.into_iter().enumerate() {
            let markdown = playbook_markdown::convert(&section.html, &self.convert_opts)?;
            progress.section_converted(&section.filename, i + 1, total);
            converted.push((section, markdown));
        }
        metrics.convert = phase.elapsed();

        // --- Phase 4: Write artifacts, then manifest ---
        progress.phase("Writing cache");
        let phase = Instant::now();
        let mut documents = Vec::with_capacity(total);
        let mut entries = Vec::with_capacity(total);
        for (section, markdown) in converted {
            self.store.write_artifact(&section.filename, &markdown)?;
            let hash = content_hash(&markdown);

            entries.push(SectionCacheInfo {
                filename: section.filename.clone(),
                heading_id: section.matched.to_string(),
                content_hash: hash.clone(),
                size_bytes: markdown.len(),
                extracted: true,
                error: None,
            });
            documents.push(Document {
                path: self.store.artifact_path(&section.filename),
                name: section.filename,
                size: markdown.len(),
                content: markdown,
                source: DocumentSource::Fresh,
                content_hash: hash,
            });
        }

        let manifest = CacheManifest {
            fetched_at,
            api_response_hash: content_hash(&payload.body),
            gov_uk_content_id: Some(payload.content_id),
            sections: entries,
            generated_by: GENERATOR_NAME.to_string(),
            runtime_version: runtime_version(),
        };
        self.store.write_manifest(&manifest)?;
        metrics.write = phase.elapsed();
        metrics.total = start.elapsed();

        info!(
            sections = documents.len(),
            fetch_ms = metrics.fetch.as_millis() as u64,
            extract_ms = metrics.extract.as_millis() as u64,
            convert_ms = metrics.convert.as_millis() as u64,
            write_ms = metrics.write.as_millis() as u64,
            total_ms = metrics.total.as_millis() as u64,
            "refresh complete"
        );

        let result = LoadResult {
            documents,
            source: DocumentSource::Fresh,
            loaded_at: Utc::now(),
            fetched_at: Some(fetched_at),
            warnings: Vec::new(),
        };
        Ok((result, metrics))
    }

    /// Serve the cache, optionally checking integrity first.
    fn load_from_cache(&self, validate: bool, progress: &dyn LoadProgress) -> Result<LoadResult> {
        progress.phase("Reading cache");

        let manifest = if validate {
            let validation = self.store.validate();
            match validation.manifest {
                Some(manifest) if validation.valid => manifest,
                _ => {
                    return Err(PlaybookError::CacheValidation {
                        errors: validation.errors,
                    });
                }
            }
        } else {
            self.store.read_manifest()?
        };

        let documents = self.store.load_documents()?;
        info!(
            documents = documents.len(),
            fetched_at = %manifest.fetched_at,
            "loaded documents from cache"
        );

        Ok(LoadResult {
            documents,
            source: DocumentSource::Cache,
            loaded_at: Utc::now(),
            fetched_at: Some(manifest.fetched_at),
            warnings: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use playbook_fetch::FetchedPayload;
    use playbook_shared::SECTION_COUNT;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("playbook-loader-test-{}", uuid::Uuid::now_v7()))
    }

    fn fixture_path(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../../fixtures")
            .join(name)
    }

    fn load_fixture(name: &str) -> String {
        std::fs::read_to_string(fixture_path(name))
            .unwrap_or_else(|e| panic!("failed to read fixture {name}: {e}"))
    }

    struct StaticSource(String);

    #[async_trait]
    impl ContentSource for StaticSource {
        async fn fetch(&self) -> Result<FetchedPayload> {
            Ok(FetchedPayload {
                body: self.0.clone(),
                content_id: "5f1c2a3e-aaaa-bbbb-cccc-000000000001".into(),
            })
        }
    }

    /// Always fails the way an exhausted retry loop does.
    #[derive(Default)]
    struct FailingSource {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ContentSource for FailingSource {
        async fn fetch(&self) -> Result<FetchedPayload> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(PlaybookError::FetchExhausted {
                attempts: 7,
                last: Box::new(PlaybookError::fetch("connection refused")),
            })
        }
    }

    fn loader<S: ContentSource>(root: &Path, source: S) -> ContentLoader<S> {
        let mappings = default_mappings().unwrap();
        let store = CacheStore::new(root.join("docs"), root.join("metadata.json"), &mappings);
        ContentLoader::new(
            source,
            store,
            mappings,
            ConvertOptions::for_source("https://www.gov.uk/api/content/x"),
        )
        .unwrap()
    }

    async fn seed_cache(root: &Path) -> LoadResult {
        loader(root, StaticSource(load_fixture("html/playbook.html")))
            .load(&SilentProgress)
            .await
            .expect("seeding load should succeed")
    }

    #[tokio::test]
    async fn direct_path_writes_fresh_cache() {
        let tmp = temp_dir();
        let result = seed_cache(&tmp).await;

        assert_eq!(result.source, DocumentSource::Fresh);
        assert_eq!(result.documents.len(), SECTION_COUNT);
        assert!(result.warnings.is_empty());
        assert!(result.documents.iter().all(|d| d.source == DocumentSource::Fresh));
        assert_eq!(result.documents[0].name, "principles.md");
        assert!(result.documents[0].content.contains("## "));

        let l = loader(&tmp, FailingSource::default());
        let validation = l.store().validate();
        assert!(validation.valid, "errors: {:?}", validation.errors);

        let manifest = validation.manifest.unwrap();
        assert_eq!(manifest.sections.len(), SECTION_COUNT);
        assert_eq!(
            manifest.gov_uk_content_id.as_deref(),
            Some("5f1c2a3e-aaaa-bbbb-cccc-000000000001")
        );
        assert_eq!(manifest.generated_by, GENERATOR_NAME);
        assert!(
            manifest
                .sections
                .iter()
                .any(|s| s.heading_id.starts_with("fuzzy:")),
            "fixture exercises a fuzzy match"
        );

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn fallback_serves_cache_with_single_warning() {
        let tmp = temp_dir();
        let seeded = seed_cache(&tmp).await;
        let fetched_at = seeded.fetched_at.unwrap();

        let l = loader(&tmp, FailingSource::default());
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(l.store().manifest_path()).unwrap())
                .unwrap();
        let stored = raw["fetchedAt"].as_str().unwrap().to_string();

        let result = l.load(&SilentProgress).await.expect("fallback should succeed");

        assert_eq!(result.source, DocumentSource::Cache);
        assert!(result.documents.iter().all(|d| d.source == DocumentSource::Cache));
        assert_eq!(result.documents.len(), SECTION_COUNT);
        assert_eq!(result.fetched_at, Some(fetched_at));
        assert_eq!(result.warnings.len(), 1);
        assert!(
            result.warnings[0].contains(&stored),
            "warning {:?} lacks stored fetchedAt {stored}",
            result.warnings[0]
        );
        assert_eq!(l.source.calls.load(Ordering::SeqCst), 1);

        for (fresh, cached) in seeded.documents.iter().zip(&result.documents) {
            assert_eq!(fresh.content, cached.content);
            assert_eq!(fresh.content_hash, cached.content_hash);
        }

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn no_cache_fails_naming_both_causes() {
        let tmp = temp_dir();
        let err = loader(&tmp, FailingSource::default())
            .load(&SilentProgress)
            .await
            .unwrap_err();

        assert!(matches!(err, PlaybookError::ContentUnavailable { .. }));
        let msg = err.to_string();
        assert!(msg.contains("connection refused"), "got: {msg}");
        assert!(msg.contains("failed to read manifest"), "got: {msg}");
    }

    #[tokio::test]
    async fn corrupted_cache_is_never_served() {
        let tmp = temp_dir();
        seed_cache(&tmp).await;

        let l = loader(&tmp, FailingSource::default());
        std::fs::write(l.store().artifact_path("security.md"), "tampered\n").unwrap();

        let err = l.load(&SilentProgress).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("hash mismatch for security.md"), "got: {msg}");

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn extraction_failure_falls_back_without_partial_writes() {
        let tmp = temp_dir();
        let seeded = seed_cache(&tmp).await;

        // Only the first section is present; the other nine are missing.
        let partial = r#"<html><body><h2 id="principles">Principles</h2><p>Changed.</p></body></html>"#;
        let l = loader(&tmp, StaticSource(partial.into()));
        let result = l.load(&SilentProgress).await.expect("fallback should succeed");

        assert_eq!(result.source, DocumentSource::Cache);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.documents[0].content, seeded.documents[0].content);
        assert!(!result.documents[0].content.contains("Changed."));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn extraction_failure_without_cache_writes_nothing() {
        let tmp = temp_dir();
        let l = loader(&tmp, StaticSource("<h2 id=\"principles\">P</h2>".into()));

        let err = l.load(&SilentProgress).await.unwrap_err();
        assert!(err.to_string().contains("failed to extract all sections (1/10 successful)"));
        assert!(l.store().list_artifacts().unwrap().is_empty());
        assert!(!l.store().manifest_path().exists());
    }

    #[tokio::test]
    async fn write_failure_without_cache_is_hard_failure() {
        let tmp = temp_dir();
        std::fs::create_dir_all(&tmp).unwrap();
        // The cache directory path is taken by a plain file.
        std::fs::write(tmp.join("docs"), "not a directory").unwrap();

        let l = loader(&tmp, StaticSource(load_fixture("html/playbook.html")));
        let err = l.load(&SilentProgress).await.unwrap_err();

        match &err {
            PlaybookError::ContentUnavailable { refresh, .. } => {
                assert!(matches!(**refresh, PlaybookError::CacheWrite { .. }), "got: {refresh}");
            }
            other => panic!("expected ContentUnavailable, got: {other}"),
        }
        assert!(!l.store().manifest_path().exists());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn manifest_write_failure_falls_back_to_cache() {
        let tmp = temp_dir();
        let seeded = seed_cache(&tmp).await;
        let before = std::fs::read_to_string(tmp.join("metadata.json")).unwrap();
        std::fs::create_dir_all(tmp.join(".metadata.json.tmp")).unwrap();

        let l = loader(&tmp, StaticSource(load_fixture("html/playbook.html")));
        let refresh_err = l.refresh(&SilentProgress).await.unwrap_err();
        assert!(matches!(refresh_err, PlaybookError::CacheWrite { .. }), "got: {refresh_err}");

        let result = l.load(&SilentProgress).await.expect("fallback should succeed");
        assert_eq!(result.source, DocumentSource::Cache);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.fetched_at, seeded.fetched_at);
        assert_eq!(std::fs::read_to_string(tmp.join("metadata.json")).unwrap(), before);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn cache_only_skips_source() {
        let tmp = temp_dir();
        seed_cache(&tmp).await;

        let l = loader(&tmp, FailingSource::default()).use_cache_only(true);
        let result = l.load(&SilentProgress).await.unwrap();

        assert_eq!(result.source, DocumentSource::Cache);
        assert!(result.warnings.is_empty());
        assert_eq!(l.source.calls.load(Ordering::SeqCst), 0);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn cache_only_validation_failure_is_fatal() {
        let tmp = temp_dir();
        seed_cache(&tmp).await;

        let l = loader(&tmp, FailingSource::default()).use_cache_only(true);
        std::fs::write(l.store().artifact_path("governance.md"), "tampered\n").unwrap();

        let err = l.load(&SilentProgress).await.unwrap_err();
        assert!(matches!(err, PlaybookError::CacheValidation { .. }));
        assert_eq!(l.source.calls.load(Ordering::SeqCst), 0);

        // Skipping validation serves whatever is on disk.
        let unchecked = loader(&tmp, FailingSource::default())
            .use_cache_only(true)
            .validate_cache(false);
        let result = unchecked.load(&SilentProgress).await.unwrap();
        assert!(result.documents.iter().any(|d| d.content == "tampered\n"));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn refresh_reports_metrics() {
        let tmp = temp_dir();
        let l = loader(&tmp, StaticSource(load_fixture("html/playbook.html")));
        let (result, metrics) = l.refresh(&SilentProgress).await.unwrap();

        assert_eq!(result.documents.len(), SECTION_COUNT);
        assert!(metrics.total >= metrics.extract);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn from_config_end_to_end_over_http() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let envelope = serde_json::json!({
            "content_id": "playbook-content-id",
            "details": { "body": load_fixture("html/playbook.html") }
        });
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope))
            .mount(&server)
            .await;

        let tmp = temp_dir();
        let config = LoadConfig {
            use_cache_only: false,
            cache_dir: tmp.join("docs"),
            manifest_path: tmp.join("metadata.json"),
            source_url: format!("{}/api/content/ai-playbook", server.uri()),
            timeout: Duration::from_secs(5),
            max_attempts: 3,
            retry_delays: vec![Duration::from_millis(5)],
            max_response_bytes: 5 * 1024 * 1024,
            validate_cache: true,
        };

        let l = ContentLoader::from_config(&config).unwrap();
        let result = l.load(&SilentProgress).await.unwrap();

        assert_eq!(result.source, DocumentSource::Fresh);
        assert_eq!(
            l.store().read_manifest().unwrap().gov_uk_content_id.as_deref(),
            Some("playbook-content-id")
        );
        assert_eq!(server.received_requests().await.unwrap().len(), 2);

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
