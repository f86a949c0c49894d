//! Integrity-checked cache of converted artifacts.
//!
//! Layout: one `<filename>.md` per expected artifact under the cache
//! directory, plus a JSON [`CacheManifest`] at its own path. Every write goes
//! through a hidden temp file and an atomic rename, so readers never see a
//! half-written artifact under its final name.

use std::path::{Path, PathBuf};

use playbook_shared::{
    CacheManifest, CacheValidationResult, Document, DocumentSource, PlaybookError, Result,
    SectionMapping, content_hash, expected_filenames, is_artifact_name,
};
use tracing::{debug, info, instrument, warn};

/// Persists artifacts and the manifest for one fixed mapping table.
#[derive(Debug, Clone)]
pub struct CacheStore {
    cache_dir: PathBuf,
    manifest_path: PathBuf,
    expected: Vec<String>,
}

impl CacheStore {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        manifest_path: impl Into<PathBuf>,
        mappings: &[SectionMapping],
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            manifest_path: manifest_path.into(),
            expected: expected_filenames(mappings),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Artifact filenames this store accepts, in mapping order.
    pub fn expected_filenames(&self) -> &[String] {
        &self.expected
    }

    /// Location of an artifact on disk.
    pub fn artifact_path(&self, filename: &str) -> PathBuf {
        self.cache_dir.join(filename)
    }

    fn check_filename(&self, filename: &str) -> Result<()> {
        if !is_artifact_name(filename) {
            return Err(PlaybookError::validation(format!(
                "invalid cache filename {filename:?}"
            )));
        }
        if !self.expected.iter().any(|f| f == filename) {
            return Err(PlaybookError::validation(format!(
                "unexpected cache filename {filename:?}"
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Artifacts
    // -----------------------------------------------------------------------

    /// Write one artifact atomically, creating the cache directory if needed.
    #[instrument(skip(self, content), fields(size = content.len()))]
    pub fn write_artifact(&self, filename: &str, content: &str) -> Result<()> {
        self.check_filename(filename)?;

        let cache_write = |source| PlaybookError::CacheWrite {
            filename: filename.to_string(),
            source,
        };

        std::fs::create_dir_all(&self.cache_dir).map_err(cache_write)?;
        atomic_write(&self.artifact_path(filename), content.as_bytes()).map_err(cache_write)?;

        debug!(filename, "wrote artifact");
        Ok(())
    }

    /// Read one artifact's content.
    pub fn read_artifact(&self, filename: &str) -> Result<String> {
        self.check_filename(filename)?;
        std::fs::read_to_string(self.artifact_path(filename)).map_err(|source| {
            PlaybookError::CacheRead {
                filename: filename.to_string(),
                source,
            }
        })
    }

    /// Persisted artifact files, sorted by name.
    pub fn list_artifacts(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PlaybookError::io(&self.cache_dir, e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PlaybookError::io(&self.cache_dir, e))?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if let Some(name) = entry.file_name().to_str() {
                if is_file && is_artifact_name(name) && !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }

    // -----------------------------------------------------------------------
    // Manifest
    // -----------------------------------------------------------------------

    /// Serialize the manifest atomically as pretty JSON.
    #[instrument(skip_all, fields(path = %self.manifest_path.display()))]
    pub fn write_manifest(&self, manifest: &CacheManifest) -> Result<()> {
        let json = serde_json::to_string_pretty(manifest)
            .map_err(|e| PlaybookError::manifest(format!("serialization failed: {e}")))?;

        let cache_write = |source| PlaybookError::CacheWrite {
            filename: self.manifest_path.display().to_string(),
            source,
        };

        if let Some(parent) = self.manifest_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(cache_write)?;
            }
        }

        atomic_write(&self.manifest_path, json.as_bytes()).map_err(cache_write)?;

        debug!(sections = manifest.sections.len(), "wrote manifest");
        Ok(())
    }

    /// Read and structurally check the manifest.
    pub fn read_manifest(&self) -> Result<CacheManifest> {
        let path = &self.manifest_path;
        let content = std::fs::read_to_string(path).map_err(|e| {
            PlaybookError::manifest(format!("failed to read manifest {}: {e}", path.display()))
        })?;

        let manifest: CacheManifest = serde_json::from_str(&content).map_err(|e| {
            PlaybookError::manifest(format!("failed to parse manifest {}: {e}", path.display()))
        })?;

        self.check_manifest(&manifest)?;
        Ok(manifest)
    }

    fn check_manifest(&self, manifest: &CacheManifest) -> Result<()> {
        if manifest.sections.len() != self.expected.len() {
            return Err(PlaybookError::manifest(format!(
                "manifest lists {} sections, expected {}",
                manifest.sections.len(),
                self.expected.len()
            )));
        }
        if manifest.api_response_hash.is_empty() || manifest.generated_by.is_empty() {
            return Err(PlaybookError::manifest(
                "manifest is missing apiResponseHash or generatedBy",
            ));
        }
        for (i, section) in manifest.sections.iter().enumerate() {
            if section.filename.is_empty()
                || section.heading_id.is_empty()
                || section.content_hash.is_empty()
            {
                return Err(PlaybookError::manifest(format!(
                    "manifest section {i} is missing filename, headingId, or contentHash"
                )));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Check every expected artifact against the manifest.
    ///
    /// Problems are collected, never thrown: a missing manifest yields a
    /// single error and no manifest.
    #[instrument(skip(self), fields(dir = %self.cache_dir.display()))]
    pub fn validate(&self) -> CacheValidationResult {
        let manifest = match self.read_manifest() {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "cache manifest unusable");
                return CacheValidationResult {
                    valid: false,
                    errors: vec![e.to_string()],
                    manifest: None,
                };
            }
        };

        let mut errors = Vec::new();
        for filename in &self.expected {
            let path = self.artifact_path(filename);
            if !path.is_file() {
                errors.push(format!("missing cache file: {filename}"));
                continue;
            }

            let Some(entry) = manifest.section(filename) else {
                errors.push(format!("no metadata entry for {filename}"));
                continue;
            };

            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    let actual = content_hash(&content);
                    if actual != entry.content_hash {
                        errors.push(format!(
                            "hash mismatch for {filename}: expected {}, got {actual}",
                            entry.content_hash
                        ));
                    }
                }
                Err(e) => errors.push(format!("failed to read cache file {filename}: {e}")),
            }
        }

        if errors.is_empty() {
            info!(artifacts = self.expected.len(), "cache valid");
        } else {
            warn!(errors = errors.len(), "cache invalid");
        }

        CacheValidationResult {
            valid: errors.is_empty(),
            errors,
            manifest: Some(manifest),
        }
    }

    /// Read every expected artifact as a cache-sourced [`Document`].
    pub fn load_documents(&self) -> Result<Vec<Document>> {
        self.expected
            .iter()
            .map(|filename| {
                let content = self.read_artifact(filename)?;
                Ok(Document {
                    name: filename.clone(),
                    path: self.artifact_path(filename),
                    size: content.len(),
                    content_hash: content_hash(&content),
                    content,
                    source: DocumentSource::Cache,
                })
            })
            .collect()
    }
}

/// Write `bytes` to a hidden sibling temp file, then rename it over `target`.
fn atomic_write(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = target.with_file_name(format!(".{file_name}.tmp"));

    std::fs::write(&temp, bytes)?;
    if let Err(e) = std::fs::rename(&temp, target) {
        let _ = std::fs::remove_file(&temp);
        return Err(e);
    }
    Ok(())
}
