//! Restricts chapter markup to a small set of tags.
//!
//! Sanitized content only contains `p`, `img`, `hr`, `b`, `strong`, `i`, `em`, `u` and `a`.
//! Apart from `img` and `hr` no element is empty. Attributes are dropped except `a[href]` and
//! `img[src]`. Other elements are unwrapped (their text is kept), except `script`/`style`, which
//! are removed with their content. Newlines become spaces.

use super::html::{escape_attr, escape_text, has_visible_content};
use super::Processor;
use regex::Regex;
use scraper::{ElementRef, Html, Node};
use std::sync::OnceLock;

const ALLOWED_TAGS: &[&str] = &["p", "img", "hr", "b", "strong", "i", "em", "u", "a"];

#[derive(Debug, Clone, Copy, Default)]
pub struct Sanitizer;

impl Processor for Sanitizer {
    fn process(&self, content: &str) -> Option<String> {
        if content.trim().is_empty() {
            return None;
        }

        let content = fix_line_breaks(content);
        let fragment = Html::parse_fragment(&content);
        let mut out = String::with_capacity(content.len());
        write_children(fragment.root_element(), &mut out);

        let out = out.replace("\r\n", " ").replace(['\r', '\n'], " ");
        if out.trim().is_empty() {
            None
        } else {
            Some(out)
        }
    }
}

fn line_break_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)<br\s*/?>").ok())
        .as_ref()
}

/// Turn `<br>` separated text into paragraphs.
fn fix_line_breaks(content: &str) -> String {
    let Some(pattern) = line_break_pattern() else {
        return content.to_string();
    };
    if !pattern.is_match(content) {
        return content.to_string();
    }
    let wrapped = if content.contains("<p>") {
        content.to_string()
    } else {
        format!("<p>{}</p>", content)
    };
    pattern.replace_all(&wrapped, "</p><p>").into_owned()
}

fn write_children(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            write_element(child_element, out);
        } else if let Node::Text(text) = child.value() {
            out.push_str(&escape_text(&text.replace('\u{a0}', " ")));
        }
    }
}

fn write_element(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    match name {
        "script" | "style" | "noscript" | "template" => {}
        "hr" => out.push_str("<hr/>"),
        "img" => {
            if let Some(src) = element.value().attr("src").filter(|s| !s.trim().is_empty()) {
                out.push_str(&format!(r#"<img src="{}"/>"#, escape_attr(src.trim())));
            }
        }
        _ if ALLOWED_TAGS.contains(&name) => {
            let mut inner = String::new();
            write_children(element, &mut inner);
            if !has_visible_content(&inner) {
                out.push_str(&inner);
                return;
            }
            if name == "a" {
                match element.value().attr("href").map(clean_href) {
                    Some(href) if !href.is_empty() => {
                        out.push_str(&format!(r#"<a href="{}">"#, escape_attr(&href)))
                    }
                    _ => out.push_str("<a>"),
                }
            } else {
                out.push('<');
                out.push_str(name);
                out.push('>');
            }
            out.push_str(&inner);
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
        _ => write_children(element, out),
    }
}

/// Typographic quotes wrapped around a link target are never part of it.
fn clean_href(href: &str) -> String {
    href.trim()
        .trim_start_matches('\u{201C}')
        .trim_end_matches('\u{201D}')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitize(s: &str) -> Option<String> {
        Sanitizer.process(s)
    }

    #[test]
    fn empty_input_is_none() {
        assert_eq!(sanitize(""), None);
        assert_eq!(sanitize("   "), None);
        assert_eq!(sanitize("<div> </div>"), None);
    }

    #[test]
    fn keeps_allowed_tags_and_unwraps_others() {
        let out = sanitize(r#"<div class="x"><p style="a">Hello <span>big</span> <b>world</b></p></div>"#);
        assert_eq!(out.as_deref(), Some("<p>Hello big <b>world</b></p>"));
    }

    #[test]
    fn drops_scripts_with_content() {
        let out = sanitize("<p>Text</p><script>alert(1)</script>");
        assert_eq!(out.as_deref(), Some("<p>Text</p>"));
    }

    #[test]
    fn strips_empty_elements_but_keeps_images_and_rules() {
        let out = sanitize(r#"<p></p><p><i> </i></p><hr class="a"><p><img src="/a.png" width="3"></p>"#);
        assert_eq!(out.as_deref(), Some(r#" <hr/><p><img src="/a.png"/></p>"#));
    }

    #[test]
    fn links_keep_only_href() {
        let out = sanitize(r#"<p><a href="https://x.com/" target="_blank">link</a></p>"#);
        assert_eq!(out.as_deref(), Some(r#"<p><a href="https://x.com/">link</a></p>"#));
        let out = sanitize("<p><a href=\"\u{201C}https://x.com/\u{201D}\">link</a></p>");
        assert_eq!(out.as_deref(), Some(r#"<p><a href="https://x.com/">link</a></p>"#));
    }

    #[test]
    fn line_breaks_become_paragraphs() {
        let out = sanitize("First<br>Second<br/>Third");
        assert_eq!(out.as_deref(), Some("<p>First</p><p>Second</p><p>Third</p>"));
    }

    #[test]
    fn newlines_become_spaces_and_entities_stay_escaped() {
        let out = sanitize("<p>a &amp; b\nc &lt; d</p>");
        assert_eq!(out.as_deref(), Some("<p>a &amp; b c &lt; d</p>"));
    }

    #[test]
    fn second_pass_is_stable() {
        let once = sanitize(r#"<div><p>One <em>two</em></p><hr><p>Three</p></div>"#).unwrap_or_default();
        let twice = sanitize(&once).unwrap_or_default();
        assert_eq!(once, twice);
    }
}
