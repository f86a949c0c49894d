//! Section mapping table: which heading in the source document becomes which artifact.

use std::collections::HashSet;

use regex::Regex;

use crate::error::{PlaybookError, Result};

/// Number of artifacts a complete refresh produces.
pub const SECTION_COUNT: usize = 10;

/// Extension every artifact filename carries.
pub const ARTIFACT_EXTENSION: &str = ".md";

/// Maps one artifact filename to the heading(s) that introduce it.
#[derive(Debug, Clone)]
pub struct SectionMapping {
    /// Target artifact filename.
    pub filename: String,
    /// Heading identifiers, tried in order; the first match wins.
    pub heading_ids: Vec<String>,
    /// Human-readable description used in errors and summaries.
    pub description: String,
    /// Heading-text patterns, only consulted when no identifier matches.
    pub heading_patterns: Vec<Regex>,
}

impl SectionMapping {
    /// Build a mapping without fuzzy patterns.
    pub fn new(filename: &str, heading_ids: &[&str], description: &str) -> Self {
        Self {
            filename: filename.to_string(),
            heading_ids: heading_ids.iter().map(|id| id.to_string()).collect(),
            description: description.to_string(),
            heading_patterns: Vec::new(),
        }
    }

    /// Attach case-insensitive heading-text patterns.
    pub fn with_patterns(mut self, patterns: &[&str]) -> Result<Self> {
        for pattern in patterns {
            let re = Regex::new(&format!("(?i){pattern}")).map_err(|e| {
                PlaybookError::validation(format!(
                    "invalid heading pattern {pattern:?} for {}: {e}",
                    self.filename
                ))
            })?;
            self.heading_patterns.push(re);
        }
        Ok(self)
    }
}

/// The mapping table for the AI Playbook publication, in artifact order.
pub fn default_mappings() -> Result<Vec<SectionMapping>> {
    let mappings = vec![
        SectionMapping::new(
            "principles.md",
            &["principles", "the-10-principles", "principle-1"],
            "The 10 Principles section",
        )
        .with_patterns(&["^principles$", "^10.*principles$"])?,
        SectionMapping::new(
            "understanding_ai.md",
            &["understanding-ai", "understanding-artificial-intelligence", "what-is-ai"],
            "Understanding AI section",
        )
        .with_patterns(&["^understanding.*ai$"])?,
        SectionMapping::new(
            "using_ai_safely_responsibly.md",
            &["using-ai-safely-responsibly", "using-ai-safely-and-responsibly", "safe-use"],
            "Using AI Safely and Responsibly section",
        )
        .with_patterns(&["^using.*ai.*safely"])?,
        SectionMapping::new(
            "building_ai_solutions.md",
            &["building-ai-solutions", "building-solutions", "developing-ai"],
            "Building AI Solutions section",
        )
        .with_patterns(&["^building.*ai"])?,
        SectionMapping::new(
            "buying_ai.md",
            &["buying-ai", "procuring-ai", "procurement"],
            "Buying AI section",
        )
        .with_patterns(&["^buying.*ai$", "^procuring"])?,
        SectionMapping::new(
            "governance.md",
            &["governance", "ai-governance", "governing-ai"],
            "Governance section",
        )
        .with_patterns(&["^governance$"])?,
        SectionMapping::new(
            "security.md",
            &["security", "ai-security", "securing-ai"],
            "Security section",
        )
        .with_patterns(&["^security$"])?,
        SectionMapping::new(
            "data_protection_privacy.md",
            &["data-protection-privacy", "data-protection", "privacy", "data-privacy"],
            "Data Protection and Privacy section",
        )
        .with_patterns(&["^data.*protection", "^privacy$"])?,
        SectionMapping::new(
            "legal_considerations.md",
            &["legal-considerations", "legal", "legal-aspects"],
            "Legal Considerations section",
        )
        .with_patterns(&["^legal"])?,
        SectionMapping::new(
            "appendix_use_cases.md",
            &["appendix-use-cases", "use-cases", "appendix", "case-studies"],
            "Appendix Use Cases section",
        )
        .with_patterns(&["^appendix", "^use.*cases$"])?,
    ];

    validate_mappings(&mappings)?;
    Ok(mappings)
}

/// Check a mapping table: unique `.md` filenames without path separators,
/// and at least one heading identifier per mapping.
pub fn validate_mappings(mappings: &[SectionMapping]) -> Result<()> {
    if mappings.is_empty() {
        return Err(PlaybookError::validation("mapping table is empty"));
    }

    let mut seen = HashSet::new();
    for mapping in mappings {
        if !is_artifact_name(&mapping.filename) {
            return Err(PlaybookError::validation(format!(
                "invalid filename {:?}: must end with {ARTIFACT_EXTENSION} and contain no path separators",
                mapping.filename
            )));
        }
        if !seen.insert(mapping.filename.as_str()) {
            return Err(PlaybookError::validation(format!(
                "duplicate filename {:?} in mappings",
                mapping.filename
            )));
        }
        if mapping.heading_ids.is_empty() {
            return Err(PlaybookError::validation(format!(
                "empty heading_ids for {:?}",
                mapping.filename
            )));
        }
    }
    Ok(())
}

/// Filenames of every mapping, in table order.
pub fn expected_filenames(mappings: &[SectionMapping]) -> Vec<String> {
    mappings.iter().map(|m| m.filename.clone()).collect()
}

/// Whether `name` is shaped like an artifact filename.
pub fn is_artifact_name(name: &str) -> bool {
    name.len() > ARTIFACT_EXTENSION.len()
        && name.ends_with(ARTIFACT_EXTENSION)
        && !name.contains('/')
        && !name.contains('\\')
}
