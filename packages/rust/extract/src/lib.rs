//! Section extraction: split one publication into the mapped sections.
//!
//! Matching runs in two phases per mapping. Heading identifiers are tried in
//! the mapping's priority order first; only when none resolve to a heading are
//! the fuzzy text patterns tried against second-level headings, in document
//! order. A section is the matched heading plus every following sibling
//! element up to (not including) the next `h2`.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use playbook_shared::{PlaybookError, Result, SectionMapping};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument, warn};

static ID_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[id]").expect("valid selector"));
static H2_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h2").expect("valid selector"));

const HEADING_TAGS: &[&str] = &["h2", "h3", "h4", "h5", "h6"];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// How a section's heading was located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchedBy {
    /// Exact heading identifier.
    Id(String),
    /// Fuzzy heading-text pattern.
    Pattern { pattern: String, heading_text: String },
}

impl fmt::Display for MatchedBy {
    /// The form recorded in the manifest's `headingId` field.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => f.write_str(id),
            Self::Pattern { heading_text, .. } => write!(f, "fuzzy:{heading_text}"),
        }
    }
}

/// Per-mapping outcome of one extraction pass.
#[derive(Debug, Clone)]
pub enum ExtractionOutcome {
    Matched { html: String, matched: MatchedBy },
    NotFound { tried: Vec<String> },
}

/// Result of extracting one mapping. Immutable once built.
#[derive(Debug, Clone)]
pub struct ExtractionResult<'m> {
    pub mapping: &'m SectionMapping,
    pub outcome: ExtractionOutcome,
}

impl ExtractionResult<'_> {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ExtractionOutcome::Matched { .. })
    }
}

/// A successfully extracted section, as returned by [`SectionExtractor::extract`].
#[derive(Debug, Clone)]
pub struct ExtractedSection {
    pub filename: String,
    pub html: String,
    pub matched: MatchedBy,
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// A parsed publication, ready for section lookups.
pub struct SectionExtractor {
    doc: Html,
}

impl SectionExtractor {
    /// Parse the publication once; every lookup shares the tree.
    pub fn parse(html: &str) -> Self {
        Self {
            doc: Html::parse_document(html),
        }
    }

    /// Extract every mapping, all-or-nothing.
    ///
    /// Returns exactly one section per mapping in table order, or an
    /// [`PlaybookError::Extraction`] naming every unmatched filename.
    #[instrument(skip_all, fields(mappings = mappings.len()))]
    pub fn extract(&self, mappings: &[SectionMapping]) -> Result<Vec<ExtractedSection>> {
        let ids = self.id_index();
        let results: Vec<ExtractionResult<'_>> = mappings
            .iter()
            .map(|m| self.extract_with_index(&ids, m))
            .collect();

        let failed: Vec<String> = results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| r.mapping.filename.clone())
            .collect();

        if !failed.is_empty() {
            for result in &results {
                if let ExtractionOutcome::NotFound { tried } = &result.outcome {
                    warn!(
                        filename = %result.mapping.filename,
                        description = %result.mapping.description,
                        tried = %tried.join(", "),
                        "section not found"
                    );
                }
            }
            return Err(PlaybookError::Extraction {
                extracted: results.len() - failed.len(),
                total: results.len(),
                failed,
            });
        }

        let sections: Vec<ExtractedSection> = results
            .into_iter()
            .filter_map(|r| match r.outcome {
                ExtractionOutcome::Matched { html, matched } => Some(ExtractedSection {
                    filename: r.mapping.filename.clone(),
                    html,
                    matched,
                }),
                ExtractionOutcome::NotFound { .. } => None,
            })
            .collect();

        info!(sections = sections.len(), "extracted all sections");
        Ok(sections)
    }

    /// Extract a single mapping without the all-or-nothing check.
    pub fn extract_section<'m>(&self, mapping: &'m SectionMapping) -> ExtractionResult<'m> {
        self.extract_with_index(&self.id_index(), mapping)
    }

    fn extract_with_index<'d, 'm>(
        &'d self,
        ids: &HashMap<&'d str, ElementRef<'d>>,
        mapping: &'m SectionMapping,
    ) -> ExtractionResult<'m> {
        let found = find_by_id(ids, &mapping.heading_ids)
            .or_else(|| self.find_by_pattern(mapping));

        let outcome = match found {
            Some((heading, matched)) => {
                debug!(filename = %mapping.filename, matched = %matched, "heading matched");
                ExtractionOutcome::Matched {
                    html: capture_section(heading),
                    matched,
                }
            }
            None => {
                let mut tried = mapping.heading_ids.clone();
                tried.extend(
                    mapping
                        .heading_patterns
                        .iter()
                        .map(|p| format!("/{}/", p.as_str())),
                );
                ExtractionOutcome::NotFound { tried }
            }
        };

        ExtractionResult { mapping, outcome }
    }

    /// First element per identifier, in document order.
    fn id_index(&self) -> HashMap<&str, ElementRef<'_>> {
        let mut ids = HashMap::new();
        for el in self.doc.select(&ID_SEL) {
            if let Some(id) = el.value().id() {
                ids.entry(id).or_insert(el);
            }
        }
        ids
    }

    /// Scan `h2` headings in document order, trying each pattern in declared order.
    fn find_by_pattern(&self, mapping: &SectionMapping) -> Option<(ElementRef<'_>, MatchedBy)> {
        if mapping.heading_patterns.is_empty() {
            return None;
        }

        for heading in self.doc.select(&H2_SEL) {
            let text = heading_text(&heading);
            if let Some(pattern) = mapping.heading_patterns.iter().find(|p| p.is_match(&text)) {
                return Some((
                    heading,
                    MatchedBy::Pattern {
                        pattern: pattern.as_str().to_string(),
                        heading_text: text,
                    },
                ));
            }
        }
        None
    }
}

/// Try identifiers in priority order; the element must be an `h2`–`h6`.
fn find_by_id<'a>(
    ids: &HashMap<&str, ElementRef<'a>>,
    candidates: &[String],
) -> Option<(ElementRef<'a>, MatchedBy)> {
    candidates.iter().find_map(|id| {
        ids.get(id.as_str())
            .filter(|el| HEADING_TAGS.contains(&el.value().name()))
            .map(|el| (*el, MatchedBy::Id(id.clone())))
    })
}

/// The heading plus following sibling elements up to the next `h2`.
fn capture_section(heading: ElementRef<'_>) -> String {
    let mut parts = vec![heading.html()];
    for sibling in heading.next_siblings().filter_map(ElementRef::wrap) {
        if sibling.value().name() == "h2" {
            break;
        }
        parts.push(sibling.html());
    }
    parts.join("\n")
}

fn heading_text(heading: &ElementRef<'_>) -> String {
    heading
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse `html` and extract every mapping. Shorthand for
/// `SectionExtractor::parse(html).extract(mappings)`.
pub fn extract(html: &str, mappings: &[SectionMapping]) -> Result<Vec<ExtractedSection>> {
    SectionExtractor::parse(html).extract(mappings)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
        <div class="govspeak">
          <h2 id="intro">Introduction</h2>
          <p>Intro text.</p>
          <h2 id="principles">Principles</h2>
          <p>Principle text.</p>
          <h3 id="principle-1">Principle 1</h3>
          <p>Know what AI is.</p>
          <h2 id="security-overview">Security</h2>
          <p>Keep it patched.</p>
          <p id="legal">A paragraph, not a heading.</p>
          <h2>Legal considerations for AI</h2>
          <p>Legal text.</p>
        </div>
    "#;

    #[test]
    fn identifier_match_captures_until_next_h2() {
        let mapping = SectionMapping::new("principles.md", &["principles"], "Principles");
        let extractor = SectionExtractor::parse(DOC);
        let result = extractor.extract_section(&mapping);

        let ExtractionOutcome::Matched { html, matched } = result.outcome else {
            panic!("expected a match");
        };
        assert_eq!(matched, MatchedBy::Id("principles".into()));
        assert!(html.starts_with("<h2 id=\"principles\">Principles</h2>"));
        assert!(html.contains("Principle text."));
        assert!(html.contains("<h3 id=\"principle-1\">Principle 1</h3>"));
        assert!(html.contains("Know what AI is."));
        assert!(!html.contains("Keep it patched."));
        assert!(!html.contains("Intro text."));
    }

    #[test]
    fn identifier_priority_beats_document_order() {
        // Both exist; "principles" appears later in the document but is listed first.
        let mapping = SectionMapping::new("principles.md", &["principles", "intro"], "P");
        let result = SectionExtractor::parse(DOC).extract_section(&mapping);
        let ExtractionOutcome::Matched { matched, .. } = result.outcome else {
            panic!("expected a match");
        };
        assert_eq!(matched, MatchedBy::Id("principles".into()));
    }

    #[test]
    fn subheading_ids_accepted() {
        let mapping = SectionMapping::new("p1.md", &["principle-1"], "P1");
        let result = SectionExtractor::parse(DOC).extract_section(&mapping);
        let ExtractionOutcome::Matched { html, .. } = result.outcome else {
            panic!("expected a match");
        };
        assert!(html.starts_with("<h3"));
        assert!(html.contains("Know what AI is."));
        assert!(!html.contains("Keep it patched."));
    }

    #[test]
    fn non_heading_id_rejected_then_fuzzy_used() {
        let mapping = SectionMapping::new("legal_considerations.md", &["legal"], "Legal")
            .with_patterns(&["^legal"])
            .unwrap();
        let result = SectionExtractor::parse(DOC).extract_section(&mapping);
        let ExtractionOutcome::Matched { html, matched } = result.outcome else {
            panic!("expected a fuzzy match");
        };
        assert_eq!(matched.to_string(), "fuzzy:Legal considerations for AI");
        assert!(html.contains("Legal text."));
    }

    #[test]
    fn fuzzy_first_heading_in_document_order_wins() {
        let mapping = SectionMapping::new("any.md", &["missing"], "Any")
            .with_patterns(&["^security$", "^introduction$"])
            .unwrap();
        let result = SectionExtractor::parse(DOC).extract_section(&mapping);
        let ExtractionOutcome::Matched { matched, .. } = result.outcome else {
            panic!("expected a fuzzy match");
        };
        // "Introduction" precedes "Security" in the document.
        assert_eq!(matched.to_string(), "fuzzy:Introduction");
    }

    #[test]
    fn not_found_names_tried_identifiers() {
        let mapping = SectionMapping::new("buying_ai.md", &["buying-ai", "procurement"], "Buying");
        let result = SectionExtractor::parse(DOC).extract_section(&mapping);
        assert!(!result.is_success());
        let ExtractionOutcome::NotFound { tried } = result.outcome else {
            panic!("expected not found");
        };
        assert_eq!(tried, vec!["buying-ai", "procurement"]);
    }

    #[test]
    fn extract_all_succeeds_in_table_order() {
        let mappings = vec![
            SectionMapping::new("security.md", &["security-overview"], "Security"),
            SectionMapping::new("principles.md", &["principles"], "Principles"),
        ];
        let sections = extract(DOC, &mappings).unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].filename, "security.md");
        assert_eq!(sections[1].filename, "principles.md");
    }

    #[test]
    fn extract_is_all_or_nothing() {
        let mappings = vec![
            SectionMapping::new("principles.md", &["principles"], "Principles"),
            SectionMapping::new("buying_ai.md", &["buying-ai"], "Buying"),
            SectionMapping::new("governance.md", &["governance"], "Governance"),
        ];
        let err = extract(DOC, &mappings).unwrap_err();
        match &err {
            PlaybookError::Extraction {
                extracted,
                total,
                failed,
            } => {
                assert_eq!(*extracted, 1);
                assert_eq!(*total, 3);
                assert_eq!(failed, &vec!["buying_ai.md".to_string(), "governance.md".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("(1/3 successful)"));
        assert!(err.to_string().contains("buying_ai.md, governance.md"));
    }

    #[test]
    fn last_section_runs_to_end_of_container() {
        let mapping = SectionMapping::new("legal.md", &["x"], "Legal")
            .with_patterns(&["^legal"])
            .unwrap();
        let result = SectionExtractor::parse(DOC).extract_section(&mapping);
        let ExtractionOutcome::Matched { html, .. } = result.outcome else {
            panic!("expected a match");
        };
        assert_eq!(html.matches("<p>").count(), 1);
    }
}
