//! Post-conversion cleanup pipeline for Markdown output.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.
//! Passes that rewrite markup skip fenced code blocks.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use url::Url;

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str, base_url: Option<&Url>) -> String {
    let mut result = md.to_string();

    result = clean_blank_lines(&result);
    result = fix_code_block_languages(&result);
    result = strip_leftover_html(&result);
    result = resolve_links(&result, base_url);
    result = normalize_rules(&result);
    result = normalize_bullets(&result);
    result = normalize_emphasis(&result);
    result = normalize_whitespace(&result);
    result = ensure_trailing_newline(&result);

    result
}

/// Apply `f` to every line outside fenced code blocks.
fn map_outside_code(md: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut lines = Vec::new();
    let mut in_code_block = false;

    for line in md.lines() {
        if line.trim_start().starts_with("```") {
            in_code_block = !in_code_block;
            lines.push(line.to_string());
        } else if in_code_block {
            lines.push(line.to_string());
        } else {
            lines.push(f(line));
        }
    }

    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Pass 1: Clean up excessive blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of blank lines into a single blank line.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").to_string()
}

// ---------------------------------------------------------------------------
// Pass 2: Fix code block language hints
// ---------------------------------------------------------------------------

/// Strip class-style prefixes such as `language-js` from fence info strings.
fn fix_code_block_languages(md: &str) -> String {
    static LANG_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^(\s*)```(?:language-|lang-|highlight-)(\w+)").expect("valid regex")
    });

    LANG_PREFIX_RE.replace_all(md, "$1```$2").to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Strip leftover container tags
// ---------------------------------------------------------------------------

/// Remove container tags that survived conversion, keeping their text.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"</?(?:div|span|section|article|aside|header|footer|figure|figcaption|details|summary)(?:\s[^>]*)?>",
        )
        .expect("valid regex")
    });

    map_outside_code(md, |line| HTML_TAG_RE.replace_all(line, "").to_string())
}

// ---------------------------------------------------------------------------
// Pass 4: Resolve relative links
// ---------------------------------------------------------------------------

/// Resolve relative URLs in Markdown links against a base URL.
fn resolve_links(md: &str, base_url: Option<&Url>) -> String {
    let Some(base) = base_url else {
        return md.to_string();
    };

    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(!?)\[([^\]]*)\]\(([^)\s]+)\)").expect("valid regex"));

    map_outside_code(md, |line| {
        LINK_RE
            .replace_all(line, |caps: &Captures| {
                let bang = &caps[1];
                let text = &caps[2];
                let href = &caps[3];

                if href.starts_with("http://")
                    || href.starts_with("https://")
                    || href.starts_with('#')
                    || href.starts_with("mailto:")
                {
                    return caps[0].to_string();
                }

                match base.join(href) {
                    Ok(resolved) => format!("{bang}[{text}]({resolved})"),
                    Err(_) => caps[0].to_string(),
                }
            })
            .to_string()
    })
}

// ---------------------------------------------------------------------------
// Pass 5: Horizontal rules
// ---------------------------------------------------------------------------

/// Rewrite every thematic break as `---`. Runs before bullet normalization
/// so `* * *` is not mistaken for a list item.
fn normalize_rules(md: &str) -> String {
    static RULE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^ {0,3}(?:(?:\*[ \t]*){3,}|(?:-[ \t]*){3,}|(?:_[ \t]*){3,})$")
            .expect("valid regex")
    });

    map_outside_code(md, |line| {
        if RULE_RE.is_match(line) {
            "---".to_string()
        } else {
            line.to_string()
        }
    })
}

// ---------------------------------------------------------------------------
// Pass 6: Bullet markers
// ---------------------------------------------------------------------------

/// Use `-` as the marker for every unordered list item.
fn normalize_bullets(md: &str) -> String {
    static BULLET_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(\s*)[*+-]\s+").expect("valid regex"));

    map_outside_code(md, |line| {
        if line == "---" {
            return line.to_string();
        }
        BULLET_RE.replace(line, "${1}- ").to_string()
    })
}

// ---------------------------------------------------------------------------
// Pass 7: Emphasis
// ---------------------------------------------------------------------------

/// Rewrite single-asterisk emphasis as underscores, leaving `**strong**` alone.
fn normalize_emphasis(md: &str) -> String {
    static EM_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(^|[^*\\])\*([^*\s](?:[^*\n]*[^*\s])?)\*").expect("valid regex")
    });

    map_outside_code(md, |line| {
        EM_RE
            .replace_all(line, |caps: &Captures| {
                let whole = caps.get(0).map(|m| m.end()).unwrap_or(0);
                if line.as_bytes().get(whole) == Some(&b'*') {
                    return caps[0].to_string();
                }
                format!("{}_{}_", &caps[1], &caps[2])
            })
            .to_string()
    })
}

// ---------------------------------------------------------------------------
// Pass 8: Normalize whitespace
// ---------------------------------------------------------------------------

/// Trim trailing whitespace on every line.
fn normalize_whitespace(md: &str) -> String {
    md.lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 9: Ensure trailing newline
// ---------------------------------------------------------------------------

/// Ensure the text ends with exactly one newline.
fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim_end_matches('\n');
    format!("{trimmed}\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
