//! HTML-to-Markdown conversion and cleanup passes.
//!
//! Converts an extracted section fragment to Markdown using the `htmd` crate,
//! then applies a series of cleanup passes that pin the output to one style:
//! ATX headings, fenced code, `-` bullets, `_` emphasis, and `---` rules.

mod cleanup;

use std::sync::LazyLock;

use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use playbook_shared::{PlaybookError, Result};

/// Class markers of wrapper containers that are unwrapped before conversion.
pub const DEFAULT_DECORATIVE_CLASSES: &[&str] = &["govspeak", "govuk"];

/// Placeholder prefix for tables converted ahead of `htmd`.
const TABLE_PLACEHOLDER: &str = "PLAYBOOKTABLEPLACEHOLDER";

static TABLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table").expect("valid selector"));
static DIV_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div[class]").expect("valid selector"));
static TR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").expect("valid selector"));
static TH_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("th").expect("valid selector"));
static TD_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").expect("valid selector"));

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Options for the HTML-to-Markdown conversion.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Base URL for resolving relative links. Links are left alone when `None`.
    pub base_url: Option<Url>,
    /// `div` elements whose class attribute contains any of these are unwrapped.
    pub decorative_classes: Vec<String>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            base_url: None,
            decorative_classes: DEFAULT_DECORATIVE_CLASSES
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

impl ConvertOptions {
    /// Options resolving relative links against the origin of `source_url`.
    pub fn for_source(source_url: &str) -> Self {
        let base_url = Url::parse(source_url)
            .ok()
            .and_then(|u| Url::parse(&u.origin().ascii_serialization()).ok());
        Self {
            base_url,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Convert an HTML fragment to normalized Markdown.
///
/// 1. Unwraps decorative wrapper `div`s and pre-converts tables
/// 2. Converts HTML → Markdown via `htmd`
/// 3. Re-inserts the tables and runs the cleanup pipeline
#[instrument(skip_all, fields(len = fragment.len()))]
pub fn convert(fragment: &str, opts: &ConvertOptions) -> Result<String> {
    let (content_html, tables) = preprocess(fragment, &opts.decorative_classes);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "iframe", "noscript", "svg"])
        .build();

    let raw_markdown = converter
        .convert(&content_html)
        .map_err(|e| PlaybookError::Conversion(format!("htmd conversion failed: {e}")))?;

    debug!(raw_len = raw_markdown.len(), tables = tables.len(), "htmd conversion complete");

    let with_tables = restore_tables(&raw_markdown, &tables);
    let cleaned = cleanup::run_pipeline(&with_tables, opts.base_url.as_ref());

    debug!(final_len = cleaned.len(), "conversion complete");
    Ok(cleaned)
}

// ---------------------------------------------------------------------------
// HTML pre-processing
// ---------------------------------------------------------------------------

/// Serialize the fragment through the parser, unwrap decorative containers,
/// and swap each table for a placeholder paragraph.
///
/// `htmd` 0.1 doesn't support table conversion, so tables are rendered here
/// and spliced back in after conversion.
fn preprocess(fragment: &str, decorative: &[String]) -> (String, Vec<String>) {
    let doc = Html::parse_fragment(fragment);
    let mut result = doc.root_element().inner_html();

    for div in doc.select(&DIV_SEL) {
        let class = div.value().attr("class").unwrap_or_default();
        if decorative.iter().any(|marker| class.contains(marker.as_str())) {
            result = result.replacen(&div.html(), &div.inner_html(), 1);
        }
    }

    let mut tables = Vec::new();
    for table in doc.select(&TABLE_SEL) {
        let placeholder = format!("<p>{TABLE_PLACEHOLDER}{}</p>", tables.len());
        let table_html = table.html();
        if result.contains(&table_html) {
            result = result.replacen(&table_html, &placeholder, 1);
            tables.push(html_table_to_markdown(&table));
        }
    }

    (result, tables)
}

/// Put the pre-rendered tables back where their placeholders ended up.
fn restore_tables(md: &str, tables: &[String]) -> String {
    let mut result = md.to_string();
    // Reverse so `...10` is replaced before `...1`.
    for (i, table) in tables.iter().enumerate().rev() {
        result = result.replacen(&format!("{TABLE_PLACEHOLDER}{i}"), table, 1);
    }
    result
}

/// Convert a single HTML table element to a markdown table string.
fn html_table_to_markdown(table: &scraper::ElementRef) -> String {
    let mut rows: Vec<Vec<String>> = Vec::new();

    for tr in table.select(&TR_SEL) {
        let mut cells: Vec<String> = tr.select(&TH_SEL).map(|c| cell_text(&c)).collect();
        if cells.is_empty() {
            cells = tr.select(&TD_SEL).map(|c| cell_text(&c)).collect();
        }
        if !cells.is_empty() {
            rows.push(cells);
        }
    }

    let col_count = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    if col_count == 0 {
        return String::new();
    }

    for row in &mut rows {
        row.resize(col_count, String::new());
    }

    let mut md = String::new();
    let separator = vec!["---"; col_count].join(" | ");

    for (i, row) in rows.iter().enumerate() {
        md.push_str("| ");
        md.push_str(&row.join(" | "));
        md.push_str(" |\n");
        if i == 0 {
            md.push_str(&format!("| {separator} |\n"));
        }
    }

    md.trim_end().to_string()
}

/// Cell text with whitespace collapsed and pipes escaped.
fn cell_text(cell: &scraper::ElementRef) -> String {
    cell.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "\\|")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> ConvertOptions {
        ConvertOptions::for_source("https://www.gov.uk/api/content/government/publications/ai-playbook")
    }

    #[test]
    fn for_source_uses_origin() {
        let o = opts();
        assert_eq!(
            o.base_url.as_ref().map(|u| u.as_str()),
            Some("https://www.gov.uk/")
        );
        assert_eq!(o.decorative_classes, vec!["govspeak", "govuk"]);
    }

    #[test]
    fn headings_are_atx() {
        let md = convert("<h2 id=\"principles\">Principles</h2><h3>Principle 1</h3>", &opts()).unwrap();
        assert!(md.contains("## Principles"), "got: {md}");
        assert!(md.contains("### Principle 1"));
        assert!(!md.contains("id="));
    }

    #[test]
    fn lists_use_dash_bullets() {
        let md = convert("<ul><li>One</li><li>Two</li></ul>", &opts()).unwrap();
        assert!(md.lines().any(|l| l.trim_start().starts_with("- One")), "got: {md}");
        assert!(md.lines().any(|l| l.trim_start().starts_with("- Two")));
    }

    #[test]
    fn emphasis_uses_underscores() {
        let md = convert("<p>This is <em>important</em> and <strong>bold</strong>.</p>", &opts()).unwrap();
        assert!(md.contains("_important_"), "got: {md}");
        assert!(md.contains("**bold**"));
    }

    #[test]
    fn code_blocks_are_fenced() {
        let html = r#"<pre><code class="language-python">print("hi")</code></pre>"#;
        let md = convert(html, &opts()).unwrap();
        assert!(md.contains("```"), "got: {md}");
        assert!(md.contains("print(\"hi\")"));
    }

    #[test]
    fn horizontal_rules_are_dashes() {
        let md = convert("<p>Above</p><hr><p>Below</p>", &opts()).unwrap();
        assert!(md.lines().any(|l| l == "---"), "got: {md}");
    }

    #[test]
    fn decorative_wrappers_unwrapped() {
        let html = r#"<div class="govspeak"><div class="govuk-inset-text"><p>Inner content</p></div></div>"#;
        let md = convert(html, &opts()).unwrap();
        assert!(md.contains("Inner content"));
        assert!(!md.contains("<div"));
        assert!(!md.contains("govspeak"));
    }

    #[test]
    fn tables_become_pipe_tables() {
        let html = r#"<h2>Data</h2>
            <table>
                <thead><tr><th>Name</th><th>Value</th></tr></thead>
                <tbody>
                    <tr><td>foo</td><td>bar</td></tr>
                    <tr><td>baz</td><td>qux</td></tr>
                </tbody>
            </table>
            <p>After</p>"#;
        let md = convert(html, &opts()).unwrap();
        assert!(md.contains("| Name | Value |\n| --- | --- |\n| foo | bar |\n| baz | qux |"), "got: {md}");
        assert!(md.contains("After"));
        assert!(!md.contains(TABLE_PLACEHOLDER));
    }

    #[test]
    fn relative_links_resolved_against_origin() {
        let html = r#"<p>See <a href="/guidance/ai-ethics">the guidance</a>.</p>"#;
        let md = convert(html, &opts()).unwrap();
        assert!(md.contains("[the guidance](https://www.gov.uk/guidance/ai-ethics)"), "got: {md}");
    }

    #[test]
    fn links_untouched_without_base() {
        let html = r#"<p><a href="/x">x</a></p>"#;
        let md = convert(html, &ConvertOptions::default()).unwrap();
        assert!(md.contains("[x](/x)"), "got: {md}");
    }

    #[test]
    fn block_quotes_preserved() {
        let md = convert("<blockquote><p>Quoted</p></blockquote>", &opts()).unwrap();
        assert!(md.contains("> Quoted"), "got: {md}");
    }

    #[test]
    fn scripts_dropped() {
        let md = convert("<p>Text</p><script>alert(1)</script>", &opts()).unwrap();
        assert!(md.contains("Text"));
        assert!(!md.contains("alert"));
    }

    #[test]
    fn output_ends_with_single_newline() {
        let md = convert("<p>One</p><p>Two</p>", &opts()).unwrap();
        assert!(md.ends_with('\n'));
        assert!(!md.ends_with("\n\n"));
    }

    #[test]
    fn empty_fragment_converts() {
        let md = convert("", &opts()).unwrap();
        assert_eq!(md, "\n");
    }
}
