//! Typographic cleanup of sanitized chapter markup.
//!
//! Rules only touch text between tags, so attribute values (image sources, link targets) are left
//! alone. Quotation marks alternate between opening and closing across the whole chapter.

use super::html::strip_html;
use super::Processor;
use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Paragraphs whose text is at most this long and has no letters or digits are scene breaks.
const MAX_PSEUDOLINE_LENGTH: usize = 30;

const PRIMITIVE_PUNCTUATION: &[(&str, &str)] = &[
    (r"\.{2,}", "…"),
    (r"(\.\s){2,}", "…"),
    (r"…+", "…"),
    (r"…\.+", "…"),
    (r"\?+", "?"),
    (r"(\s)-(\s)", "${1}—${2}"),
    (r"-{2,}", "—"),
];

const PUNCTUATION_WHITESPACE: &[(&str, &str)] = &[
    (r"\s{2,}", " "),
    (r"(\s),(\s)", ",${2}"),
    (r"(\s),(\S)", ", ${2}"),
    (r"(\S)…(\S)", "${1}… ${2}"),
    (r"(\s)…(\s)", "…${2}"),
    (r"\s\?", "?"),
    (r"\s!", "!"),
    (r"\?+", "?"),
    (r"(\S)-(\s)", "${1}—${2}"),
    (r"(\s)-(\S)", " — ${2}"),
    (r"(\S)—(\S)", "${1} — ${2}"),
];

const INLINE_PSEUDOLINES: &[(&str, &str)] = &[
    (r"(o-){3,}", "<hr/>"),
    (r"(o -){3,}", "<hr/>"),
    (r"\*{3,}", "<hr/>"),
    (r"(\* ){2,}", "<hr/>"),
    (r"-{3,}", "<hr/>"),
    (r"(- ){3,}", "<hr/>"),
    (r"(-[a-zA-Z]){3,}", "<hr/>"),
    (r"(- [a-zA-Z]){3,}", "<hr/>"),
    (r"—{3,}", "<hr/>"),
    (r"(— ){3,}", "<hr/>"),
    (r"(—[a-zA-Z]){3,}", "<hr/>"),
    (r"(— [a-zA-Z]){3,}", "<hr/>"),
    (r"\+{3,}", "<hr/>"),
    (r"(\+ ){2,}", "<hr/>"),
    (r"_{3,}", "<hr/>"),
    (r"(_ ){2,}", "<hr/>"),
];

type Rules = Vec<(Regex, &'static str)>;

fn compile(rules: &[(&'static str, &'static str)]) -> Rules {
    rules
        .iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, *replacement)))
        .collect()
}

fn text_rules() -> &'static Rules {
    static RULES: OnceLock<Rules> = OnceLock::new();
    RULES.get_or_init(|| {
        let mut rules = compile(PRIMITIVE_PUNCTUATION);
        rules.extend(compile(PUNCTUATION_WHITESPACE));
        rules
    })
}

fn pseudoline_rules() -> &'static Rules {
    static RULES: OnceLock<Rules> = OnceLock::new();
    RULES.get_or_init(|| compile(INLINE_PSEUDOLINES))
}

fn pattern(cell: &'static OnceLock<Option<Regex>>, source: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(source).ok()).as_ref()
}

fn tag_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    pattern(&CELL, r"<[^>]*>")
}

fn paragraph_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    pattern(&CELL, r"(?s)<p>\s*(.*?)\s*</p>")
}

fn repeated_rules_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    pattern(&CELL, r"(?:<hr/>\s*){2,}")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Typography;

impl Processor for Typography {
    fn process(&self, content: &str) -> Option<String> {
        if content.trim().is_empty() {
            return None;
        }

        let mut quote_count = 0usize;
        let content = map_text(content, |text| {
            let text = fix_quotation_marks(text, &mut quote_count);
            apply(text_rules(), text)
        });
        let content = fix_paragraph_whitespace(&content);
        let content = replace_paragraph_pseudolines(&content);
        let content = map_text(&content, |text| apply(pseudoline_rules(), text.to_string()));
        let content = match repeated_rules_pattern() {
            Some(re) => re.replace_all(&content, "<hr/>").into_owned(),
            None => content,
        };

        if content.trim().is_empty() {
            None
        } else {
            Some(content)
        }
    }
}

/// Quotation marks and punctuation for a plain-text line such as a title or a summary.
pub(crate) fn typeset_text(text: &str) -> String {
    let mut quote_count = 0usize;
    let text = fix_quotation_marks(text, &mut quote_count);
    apply(text_rules(), text).trim().to_string()
}

/// Run `f` over every run of text outside tags, copying tags unchanged.
fn map_text(content: &str, mut f: impl FnMut(&str) -> String) -> String {
    let Some(tags) = tag_pattern() else {
        return f(content);
    };
    let mut out = String::with_capacity(content.len());
    let mut last = 0;
    for tag in tags.find_iter(content) {
        if tag.start() > last {
            out.push_str(&f(&content[last..tag.start()]));
        }
        out.push_str(tag.as_str());
        last = tag.end();
    }
    if last < content.len() {
        out.push_str(&f(&content[last..]));
    }
    out
}

fn apply(rules: &Rules, mut text: String) -> String {
    for (re, replacement) in rules {
        if re.is_match(&text) {
            text = re.replace_all(&text, *replacement).into_owned();
        }
    }
    text
}

fn fix_quotation_marks(text: &str, count: &mut usize) -> String {
    text.chars()
        .map(|c| {
            if c != '"' {
                return c;
            }
            *count += 1;
            if *count % 2 == 1 {
                '\u{201C}'
            } else {
                '\u{201D}'
            }
        })
        .collect()
}

fn fix_paragraph_whitespace(content: &str) -> String {
    match paragraph_pattern() {
        Some(re) => re.replace_all(content, "<p>$1</p>").into_owned(),
        None => content.to_string(),
    }
}

fn replace_paragraph_pseudolines(content: &str) -> String {
    let Some(re) = paragraph_pattern() else {
        return content.to_string();
    };
    re.replace_all(content, |caps: &Captures<'_>| {
        let whole = &caps[0];
        if whole.contains("<img") {
            return whole.to_string();
        }
        let text = strip_html(&caps[1]);
        if text.chars().count() <= MAX_PSEUDOLINE_LENGTH && !text.chars().any(char::is_alphanumeric)
        {
            "<hr/>".to_string()
        } else {
            whole.to_string()
        }
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(s: &str) -> String {
        Typography.process(s).unwrap_or_default()
    }

    #[test]
    fn every_rule_compiles() {
        assert_eq!(
            text_rules().len(),
            PRIMITIVE_PUNCTUATION.len() + PUNCTUATION_WHITESPACE.len()
        );
        assert_eq!(pseudoline_rules().len(), INLINE_PSEUDOLINES.len());
        assert!(tag_pattern().is_some());
        assert!(paragraph_pattern().is_some());
        assert!(repeated_rules_pattern().is_some());
    }

    #[test]
    fn empty_is_none() {
        assert_eq!(Typography.process(""), None);
        assert_eq!(Typography.process("  "), None);
    }

    #[test]
    fn quotes_alternate_across_tags() {
        assert_eq!(
            fix(r#"<p>"Hi," she said.</p><p>"<i>Bye</i>"</p>"#),
            "<p>\u{201C}Hi,\u{201D} she said.</p><p>\u{201C}<i>Bye</i>\u{201D}</p>"
        );
    }

    #[test]
    fn attributes_are_untouched() {
        let html = r#"<p><a href="https://x.com/a--b...c">link</a></p>"#;
        assert_eq!(fix(html), html);
    }

    #[test]
    fn ellipses_and_dashes() {
        assert_eq!(fix("<p>Wait... what</p>"), "<p>Wait… what</p>");
        assert_eq!(fix("<p>Wait. . . what</p>"), "<p>Wait… what</p>");
        assert_eq!(fix("<p>one - two</p>"), "<p>one — two</p>");
        assert_eq!(fix("<p>one--two</p>"), "<p>one — two</p>");
        assert_eq!(fix("<p>Really???</p>"), "<p>Really?</p>");
    }

    #[test]
    fn whitespace_around_punctuation() {
        assert_eq!(fix("<p>a ,b</p>"), "<p>a, b</p>");
        assert_eq!(fix("<p>a , b</p>"), "<p>a, b</p>");
        assert_eq!(fix("<p>Why ?</p>"), "<p>Why?</p>");
        assert_eq!(fix("<p>No !</p>"), "<p>No!</p>");
        assert_eq!(fix("<p>too    many</p>"), "<p>too many</p>");
    }

    #[test]
    fn paragraph_whitespace_is_trimmed() {
        assert_eq!(fix("<p>   Hello </p>"), "<p>Hello</p>");
    }

    #[test]
    fn pseudoline_paragraphs_become_rules() {
        assert_eq!(
            fix("<p>Text</p><p>* * *</p><p>---</p><p>More</p>"),
            "<p>Text</p><hr/><p>More</p>"
        );
        assert_eq!(fix("<p>~~~~~</p>"), "<hr/>");
    }

    #[test]
    fn image_paragraphs_are_not_pseudolines() {
        let html = r#"<p><img src="/a.png"/></p>"#;
        assert_eq!(fix(html), html);
    }

    #[test]
    fn inline_pseudolines() {
        assert_eq!(
            fix("<p>End of part one ______ start</p>"),
            "<p>End of part one <hr/> start</p>"
        );
        assert_eq!(fix("<p>Before ++++ after it all</p>"), "<p>Before <hr/> after it all</p>");
    }
}
