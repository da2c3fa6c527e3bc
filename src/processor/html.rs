//! Small HTML helpers shared by the processors, the acquisition pipeline and the formatters.

use regex::{Captures, Regex};
use reqwest::Url;
use scraper::{ElementRef, Html, Node, Selector};
use std::sync::OnceLock;

pub fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}

fn unescape_attr(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn sanitized_image_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"<img src="([^"]*)"\s*/?>"#).ok())
        .as_ref()
}

/// Rewrite the source of every image in sanitized markup. `f` receives the decoded `src` and
/// returns the replacement tag; `None` removes the image.
pub fn map_image_sources(code: &str, mut f: impl FnMut(&str) -> Option<String>) -> String {
    let Some(re) = sanitized_image_pattern() else {
        return code.to_string();
    };
    re.replace_all(code, |caps: &Captures<'_>| {
        f(&unescape_attr(&caps[1])).unwrap_or_default()
    })
    .into_owned()
}

/// Convert HTML to plain text. Paragraph and line breaks become blank lines.
pub fn strip_html(code: &str) -> String {
    let fragment = Html::parse_fragment(code);
    let mut out = String::with_capacity(code.len());
    collect_text(fragment.root_element(), &mut out);
    out.trim().to_string()
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            collect_text(child_element, out);
            if matches!(child_element.value().name(), "p" | "br" | "hr" | "div") {
                out.push_str("\n\n");
            }
        } else if let Node::Text(text) = child.value() {
            out.push_str(&text.replace('\u{a0}', " "));
        }
    }
}

/// `src` of every `<img>` in `code`, in document order. Entities are already decoded.
pub fn find_image_sources(code: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse("img") else {
        return Vec::new();
    };
    Html::parse_fragment(code)
        .select(&selector)
        .filter_map(|el| el.value().attr("src"))
        .map(|src| src.trim().to_string())
        .filter(|src| !src.is_empty())
        .collect()
}

/// Resolve `url` against `base_url` (a site root). Absolute URLs are returned unchanged;
/// relative ones are treated as rooted at the site.
pub fn make_url_absolute(url: &str, base_url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    if let Ok(parsed) = Url::parse(url) {
        if parsed.has_host() || parsed.scheme() == "data" {
            return Some(url.to_string());
        }
    }
    if base_url.is_empty() {
        return None;
    }
    let base = Url::parse(base_url).ok()?;
    let joined = if url.starts_with("//") || url.starts_with('/') {
        base.join(url)
    } else {
        base.join(&format!("/{}", url))
    };
    joined.ok().map(|u| u.to_string())
}

/// True if the markup renders anything: text other than whitespace, an image or a rule.
pub(crate) fn has_visible_content(code: &str) -> bool {
    if code.contains("<img") || code.contains("<hr") {
        return true;
    }
    let mut in_tag = false;
    for c in code.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag && !c.is_whitespace() => return true,
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_html_separates_paragraphs() {
        assert_eq!(strip_html("<p>One</p><p>Two</p>"), "One\n\nTwo");
        assert_eq!(strip_html("No tags here."), "No tags here.");
        assert_eq!(strip_html("   \n  "), "");
    }

    #[test]
    fn strip_html_decodes_entities() {
        assert_eq!(strip_html("<p>Fish &amp; chips</p>"), "Fish & chips");
    }

    #[test]
    fn find_image_sources_in_order() {
        let code = r#"<p>a<img src="/one.png"></p><img alt="none"><p><img src="https://x.com/two.jpg?a=1&amp;b=2"/></p>"#;
        assert_eq!(
            find_image_sources(code),
            vec!["/one.png", "https://x.com/two.jpg?a=1&b=2"]
        );
    }

    #[test]
    fn make_url_absolute_variants() {
        let base = "https://www.example.com";
        assert_eq!(
            make_url_absolute("https://cdn.example.com/a.png", base).as_deref(),
            Some("https://cdn.example.com/a.png")
        );
        assert_eq!(
            make_url_absolute("/img/a.png", base).as_deref(),
            Some("https://www.example.com/img/a.png")
        );
        assert_eq!(
            make_url_absolute("img/a.png", base).as_deref(),
            Some("https://www.example.com/img/a.png")
        );
        assert_eq!(
            make_url_absolute("//cdn.example.com/b.png", base).as_deref(),
            Some("https://cdn.example.com/b.png")
        );
        assert_eq!(make_url_absolute("", base), None);
        assert_eq!(make_url_absolute("a.png", ""), None);
        assert_eq!(
            make_url_absolute("https://x.com/a.png", "").as_deref(),
            Some("https://x.com/a.png")
        );
    }

    #[test]
    fn visible_content_detection() {
        assert!(!has_visible_content("  <b> </b> "));
        assert!(has_visible_content("<b>x</b>"));
        assert!(has_visible_content(r#"<img src="a.png"/>"#));
        assert!(has_visible_content("<hr/>"));
    }

    #[test]
    fn map_image_sources_rewrites_and_removes() {
        let code = r#"<p><img src="/a.png?x=1&amp;y=2"/>text<img src="/gone.png"/></p>"#;
        let out = map_image_sources(code, |src| {
            (src == "/a.png?x=1&y=2").then(|| format!(r#"<img src="{}"/>"#, escape_attr("images/1.jpg")))
        });
        assert_eq!(out, r#"<p><img src="images/1.jpg"/>text</p>"#);
    }

    #[test]
    fn escaping() {
        assert_eq!(escape_text("a < b & c"), "a &lt; b &amp; c");
        assert_eq!(escape_attr(r#"say "hi""#), "say &quot;hi&quot;");
    }
}
