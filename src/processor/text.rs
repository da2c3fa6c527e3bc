//! Plain-text cleanup for titles and summaries.

use super::typography::typeset_text;
use regex::{Captures, Regex};
use std::sync::OnceLock;

fn context_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    CELL.get_or_init(|| {
        Regex::new(r"(?i)^(?:(?:chapter|ch\.?|part)\s*)?\d+\s*(?::|[.\-–—]\s)\s*(\S.*)$").ok()
    })
    .as_ref()
}

fn entity_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").ok())
        .as_ref()
}

/// Collapse whitespace and drop a leading numbering such as `Chapter 12:`, `Ch. 3 -` or `7.`
/// when something is left after it.
pub fn prettify_title(title: &str) -> String {
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    match context_pattern().and_then(|re| re.captures(&title)) {
        Some(caps) => caps[1].to_string(),
        None => title,
    }
}

/// Shorten `text` to at most `length` characters, ending with `…` when anything was cut.
pub fn truncate(text: &str, length: usize) -> String {
    if text.chars().count() <= length {
        return text.to_string();
    }
    let mut out: String = text.chars().take(length.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Decode named and numeric character references. Unknown names are left as they are.
pub fn unescape_entities(text: &str) -> String {
    let Some(re) = entity_pattern() else {
        return text.to_string();
    };
    re.replace_all(text, |caps: &Captures<'_>| {
        let name = &caps[1];
        let decoded = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
            u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
        } else if let Some(dec) = name.strip_prefix('#') {
            dec.parse::<u32>().ok().and_then(char::from_u32)
        } else {
            match name {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                "hellip" => Some('…'),
                "mdash" => Some('—'),
                "ndash" => Some('–'),
                "lsquo" => Some('\u{2018}'),
                "rsquo" => Some('\u{2019}'),
                "ldquo" => Some('\u{201C}'),
                "rdquo" => Some('\u{201D}'),
                _ => None,
            }
        };
        decoded.map_or_else(|| caps[0].to_string(), String::from)
    })
    .into_owned()
}

/// Typography and entity decoding for a title or summary line.
pub fn process_text(text: &str) -> String {
    unescape_entities(&typeset_text(text))
}
