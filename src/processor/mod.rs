//! Content processors applied to chapter markup before formatting.

mod html;
mod sanitizer;
mod text;
mod typography;

pub use html::{
    escape_attr, escape_text, find_image_sources, make_url_absolute, map_image_sources, strip_html,
};
pub use sanitizer::Sanitizer;
pub use text::{prettify_title, process_text, truncate, unescape_entities};
pub use typography::Typography;

/// A transformation of chapter content. `None` means nothing usable is left.
pub trait Processor {
    fn process(&self, content: &str) -> Option<String>;
}

/// Sanitize, fix typography, then sanitize again to clean up anything the typography pass
/// introduced (rules inside paragraphs, emptied elements).
pub fn normalize(content: &str) -> Option<String> {
    let sanitized = Sanitizer.process(content)?;
    let typeset = Typography.process(&sanitized)?;
    Sanitizer.process(&typeset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_cleans_markup_and_text() {
        let out = normalize(r#"<div class="c"><p>"Hello," <span>she</span> said...</p><p>***</p><p>Bye</p></div>"#);
        assert_eq!(
            out.as_deref(),
            Some("<p>\u{201C}Hello,\u{201D} she said…</p><hr/><p>Bye</p>")
        );
    }

    #[test]
    fn normalize_of_nothing_is_none() {
        assert_eq!(normalize("<div><script>x()</script></div>"), None);
        assert_eq!(normalize(""), None);
    }
}
