//! Output formats and the output file plan.
//!
//! Every format writes one file per story to `output_dir/{author}/{title}/{title}.{ext}`; a package
//! of stories goes to `output_dir/{title}.{ext}`.
//! HTML embeds downloaded images as data URIs, Markdown links them, plain text drops them. EPUB
//! lives in [crate::epub].

use crate::epub::EpubError;
use crate::model::{Image, Metadata, Story};
use crate::processor::{escape_attr, escape_text, make_url_absolute, map_image_sources, strip_html};
use base64::Engine;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Output format selector for the CLI and config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Epub,
    Html,
    Markdown,
    Text,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Epub => "epub",
            OutputFormat::Html => "html",
            OutputFormat::Markdown => "md",
            OutputFormat::Text => "txt",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s.trim().to_lowercase().as_str() {
            "epub" => Ok(OutputFormat::Epub),
            "html" => Ok(OutputFormat::Html),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "text" | "txt" => Ok(OutputFormat::Text),
            _ => Err(format!(
                "Invalid format: '{}'. Use epub, html, markdown, or text.",
                s
            )),
        }
    }

    pub fn formatter(self) -> Box<dyn Formatter> {
        match self {
            OutputFormat::Epub => Box::new(crate::epub::EpubFormatter),
            OutputFormat::Html => Box::new(HtmlFormatter),
            OutputFormat::Markdown => Box::new(MarkdownFormatter),
            OutputFormat::Text => Box::new(TextFormatter),
        }
    }
}

/// Errors from the format writers.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Cannot write: story title is empty.")]
    EmptyTitle,

    #[error("Cannot write: story author is empty.")]
    EmptyAuthor,

    #[error("Failed to write output: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write output: {0}")]
    Write(#[from] std::io::Error),

    #[error(transparent)]
    Epub(#[from] EpubError),
}

/// Writes a finished story to a file.
pub trait Formatter {
    fn format_and_save(&self, story: &Story, path: &Path) -> Result<(), FormatError>;
}

pub(crate) fn validate_story(story: &Story) -> Result<(), FormatError> {
    if story.metadata.title.trim().is_empty() {
        return Err(FormatError::EmptyTitle);
    }
    if story.metadata.author.trim().is_empty() {
        return Err(FormatError::EmptyAuthor);
    }
    Ok(())
}

/// Sanitize a title to a safe file name: lowercase, replace spaces/special with `-`.
pub fn sanitize_title(title: &str) -> String {
    let mut s = title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>();
    while s.contains("--") {
        s = s.replace("--", "-");
    }
    s = s.trim_matches('-').to_string();
    if s.is_empty() {
        s = "story".to_string();
    }
    s
}

/// Directory holding every output file of one story.
pub fn story_directory(output_dir: &Path, metadata: &Metadata) -> PathBuf {
    output_dir
        .join(sanitize_title(&metadata.author))
        .join(sanitize_title(&metadata.title))
}

/// Files a story is expected to produce, one per format, in format order.
pub fn output_paths(output_dir: &Path, metadata: &Metadata, formats: &[OutputFormat]) -> Vec<PathBuf> {
    paths_in(&story_directory(output_dir, metadata), metadata, formats)
}

fn paths_in(dir: &Path, metadata: &Metadata, formats: &[OutputFormat]) -> Vec<PathBuf> {
    let base = sanitize_title(&metadata.title);
    formats
        .iter()
        .map(|f| dir.join(format!("{}.{}", base, f.extension())))
        .collect()
}

/// Write `story` in every format, skipping files that already exist. Returns the written paths.
pub fn write_story(
    story: &Story,
    output_dir: &Path,
    formats: &[OutputFormat],
) -> Result<Vec<PathBuf>, FormatError> {
    write_into(story, &story_directory(output_dir, &story.metadata), formats)
}

/// Write a package (see [Story::package]) directly into `output_dir`.
pub fn write_package(
    package: &Story,
    output_dir: &Path,
    formats: &[OutputFormat],
) -> Result<Vec<PathBuf>, FormatError> {
    write_into(package, output_dir, formats)
}

fn write_into(
    story: &Story,
    dir: &Path,
    formats: &[OutputFormat],
) -> Result<Vec<PathBuf>, FormatError> {
    validate_story(story)?;
    std::fs::create_dir_all(dir).map_err(|e| FormatError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut written = Vec::new();
    for (format, path) in formats.iter().zip(paths_in(dir, &story.metadata, formats)) {
        if path.exists() {
            info!("Keeping existing {}", path.display());
            continue;
        }
        format.formatter().format_and_save(story, &path)?;
        written.push(path);
    }
    Ok(written)
}

/// The downloaded image an `<img src>` in chapter content refers to.
pub(crate) fn resolve_image<'a>(story: &'a Story, src: &str) -> Option<&'a Image> {
    let site = story.metadata.site_url().unwrap_or_default();
    let url = make_url_absolute(src, &site)?;
    story.image(&url)
}

fn absolute_src(story: &Story, src: &str) -> Option<String> {
    let site = story.metadata.site_url().unwrap_or_default();
    make_url_absolute(src, &site)
}

fn create(path: &Path) -> Result<BufWriter<File>, FormatError> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| FormatError::Io {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Single HTML file with downloaded images embedded.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlFormatter;

impl Formatter for HtmlFormatter {
    fn format_and_save(&self, story: &Story, path: &Path) -> Result<(), FormatError> {
        validate_story(story)?;
        let mut f = create(path)?;
        let m = &story.metadata;
        let title_esc = escape_attr(&m.title);

        writeln!(f, r#"<!DOCTYPE html>"#)?;
        writeln!(f, r#"<html lang="en">"#)?;
        writeln!(f, r#"<head>"#)?;
        writeln!(f, r#"  <meta charset="UTF-8"/>"#)?;
        writeln!(f, r#"  <title>{}</title>"#, title_esc)?;
        writeln!(f, r#"</head>"#)?;
        writeln!(f, r#"<body>"#)?;
        writeln!(f, r#"  <header>"#)?;
        writeln!(f, r#"    <h1>{}</h1>"#, title_esc)?;
        writeln!(f, r#"    <p class="author">By {}</p>"#, escape_text(&m.author))?;
        if let Some(summary) = m.summary.as_deref().filter(|s| !s.is_empty()) {
            writeln!(f, r#"    <p class="summary">{}</p>"#, escape_text(summary))?;
        }
        writeln!(f, r#"    <ul class="metadata">"#)?;
        if !m.url.is_empty() {
            writeln!(
                f,
                r#"      <li>Source: <a href="{}">{}</a></li>"#,
                escape_attr(&m.url),
                escape_text(&m.url)
            )?;
        }
        writeln!(f, r#"      <li>Published: {}</li>"#, m.date_published)?;
        writeln!(f, r#"      <li>Updated: {}</li>"#, m.date_updated)?;
        writeln!(f, r#"      <li>Downloaded: {}</li>"#, m.date_extracted)?;
        writeln!(f, r#"      <li>Chapters: {}</li>"#, story.chapters.len())?;
        writeln!(f, r#"      <li>Words: {}</li>"#, m.word_count)?;
        writeln!(f, r#"    </ul>"#)?;
        writeln!(f, r#"  </header>"#)?;

        let engine = base64::engine::general_purpose::STANDARD;
        for (i, ch) in story.chapters.iter().enumerate() {
            let body = map_image_sources(&ch.content, |src| {
                match resolve_image(story, src).and_then(|img| img.data.as_ref()) {
                    Some(data) => Some(format!(
                        r#"<img src="data:image/jpeg;base64,{}" alt=""/>"#,
                        engine.encode(&data.bytes)
                    )),
                    None => absolute_src(story, src).map(|url| {
                        format!(
                            r#"<img src="{}" alt="There ought to be an image here."/>"#,
                            escape_attr(&url)
                        )
                    }),
                }
            });
            writeln!(f, r#"  <section class="chapter">"#)?;
            writeln!(f, r#"    <h2>{}</h2>"#, escape_text(&ch.heading(i + 1)))?;
            writeln!(f, r#"    <div class="chapter-body">"#)?;
            f.write_all(body.as_bytes())?;
            writeln!(f)?;
            writeln!(f, r#"    </div>"#)?;
            writeln!(f, r#"  </section>"#)?;
        }

        writeln!(f, r#"</body>"#)?;
        writeln!(f, r#"</html>"#)?;
        f.flush()?;
        Ok(())
    }
}

/// Single Markdown file: title, author, summary, then each chapter as `## heading` + body.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownFormatter;

impl Formatter for MarkdownFormatter {
    fn format_and_save(&self, story: &Story, path: &Path) -> Result<(), FormatError> {
        validate_story(story)?;
        let mut f = create(path)?;
        let m = &story.metadata;

        writeln!(f, "# {}", m.title)?;
        writeln!(f)?;
        writeln!(f, "By {}", m.author)?;
        writeln!(f)?;
        if let Some(summary) = m.summary.as_deref().filter(|s| !s.is_empty()) {
            writeln!(f, "{}", summary)?;
            writeln!(f)?;
        }
        if !m.url.is_empty() {
            writeln!(f, "Source: <{}>", m.url)?;
            writeln!(f)?;
        }
        writeln!(f, "---")?;
        writeln!(f)?;

        for (i, ch) in story.chapters.iter().enumerate() {
            let body = map_image_sources(&ch.content, |src| {
                absolute_src(story, src).map(|url| format!(r#"<img src="{}"/>"#, escape_attr(&url)))
            });
            writeln!(f, "## {}", ch.heading(i + 1))?;
            writeln!(f)?;
            writeln!(f, "{}", html2md::parse_html(&body))?;
            writeln!(f)?;
        }
        f.flush()?;
        Ok(())
    }
}

/// Single plain-text file; markup and images are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_and_save(&self, story: &Story, path: &Path) -> Result<(), FormatError> {
        validate_story(story)?;
        let mut f = create(path)?;
        let m = &story.metadata;

        writeln!(f, "{}", m.title)?;
        writeln!(f, "By {}", m.author)?;
        writeln!(f)?;
        if let Some(summary) = m.summary.as_deref().filter(|s| !s.is_empty()) {
            writeln!(f, "{}", summary)?;
            writeln!(f)?;
        }

        for (i, ch) in story.chapters.iter().enumerate() {
            writeln!(f)?;
            writeln!(f, "--- {} ---", ch.heading(i + 1))?;
            writeln!(f)?;
            writeln!(f, "{}", strip_html(&ch.content))?;
        }
        f.flush()?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{Chapter, ImageData};
    use std::error::Error;

    pub(crate) fn minimal_story() -> Story {
        let mut metadata = Metadata::new("https://www.example.com/s/1/test");
        metadata.title = "Test Story".to_string();
        metadata.author = "Test Author".to_string();
        metadata.summary = Some("A test.".to_string());
        metadata.chapter_count = 2;
        metadata.word_count = 6;
        Story {
            metadata,
            chapters: vec![
                Chapter::new(
                    Some("Arrival".to_string()),
                    r#"<p>First paragraph.</p><p><img src="/img/a.png"/></p><p>Second &amp; last.</p>"#,
                ),
                Chapter::new(None, "<p>Two.</p>"),
            ],
            images: vec![Image {
                url: "https://www.example.com/img/a.png".to_string(),
                data: Some(ImageData {
                    bytes: vec![0xFF, 0xD8, 0xFF, 0xD9],
                    width: 1,
                    height: 1,
                }),
            }],
        }
    }

    #[test]
    fn output_paths_follow_author_and_title() {
        let story = minimal_story();
        let paths = output_paths(
            Path::new("out"),
            &story.metadata,
            &[OutputFormat::Epub, OutputFormat::Markdown],
        );
        assert_eq!(
            paths,
            vec![
                PathBuf::from("out/test-author/test-story/test-story.epub"),
                PathBuf::from("out/test-author/test-story/test-story.md"),
            ]
        );
    }

    #[test]
    fn html_embeds_images_and_headings() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("s.html");
        HtmlFormatter.format_and_save(&minimal_story(), &path)?;
        let buf = std::fs::read_to_string(&path)?;
        assert!(buf.contains("<h1>Test Story</h1>"));
        assert!(buf.contains("<h2>Chapter 1: Arrival</h2>"));
        assert!(buf.contains("<h2>Chapter 2</h2>"));
        assert!(buf.contains("data:image/jpeg;base64,/9j/2Q=="));
        assert!(buf.contains("Second &amp; last."));
        Ok(())
    }

    #[test]
    fn markdown_has_headers_and_no_raw_p_tags() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("s.md");
        MarkdownFormatter.format_and_save(&minimal_story(), &path)?;
        let buf = std::fs::read_to_string(&path)?;
        assert!(buf.starts_with("# Test Story"));
        assert!(buf.contains("## Chapter 1: Arrival"));
        assert!(buf.contains("First paragraph"));
        assert!(buf.contains("https://www.example.com/img/a.png"));
        assert!(!buf.contains("<p>"));
        Ok(())
    }

    #[test]
    fn text_has_headings_and_no_tags() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("s.txt");
        TextFormatter.format_and_save(&minimal_story(), &path)?;
        let buf = std::fs::read_to_string(&path)?;
        assert!(buf.contains("--- Chapter 1: Arrival ---"));
        assert!(buf.contains("Second & last."));
        assert!(!buf.contains("<p>"));
        Ok(())
    }

    #[test]
    fn write_story_skips_existing_files() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let story = minimal_story();
        let formats = [OutputFormat::Html, OutputFormat::Text];
        let paths = output_paths(dir.path(), &story.metadata, &formats);
        std::fs::create_dir_all(story_directory(dir.path(), &story.metadata))?;
        std::fs::write(&paths[1], "keep me")?;

        let written = write_story(&story, dir.path(), &formats)?;
        assert_eq!(written, vec![paths[0].clone()]);
        assert_eq!(std::fs::read_to_string(&paths[1])?, "keep me");
        Ok(())
    }

    #[test]
    fn package_is_written_to_the_output_root() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let mut second = minimal_story();
        second.metadata.url = "https://other.example/s/2".to_string();
        second.metadata.title = "Second".to_string();
        second.images.clear();
        let package = Story::package(&[minimal_story(), second]).ok_or("no package")?;

        let written = write_package(&package, dir.path(), &[OutputFormat::Html])?;
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].parent(), Some(dir.path()));
        let name = written[0].file_name().and_then(|n| n.to_str()).unwrap_or_default();
        assert!(name.starts_with("storyfetch-package-"));

        let buf = std::fs::read_to_string(&written[0])?;
        assert!(buf.contains("By Test Author</p>"));
        assert!(buf.contains("<h2>Chapter 1: Test Story: Arrival</h2>"));
        assert!(buf.contains("<h2>Chapter 3: Second: Arrival</h2>"));
        assert!(buf.contains("data:image/jpeg;base64,/9j/2Q=="));
        assert!(buf.contains(r#"src="https://other.example/img/a.png""#));
        assert!(!buf.contains("Source:"));
        Ok(())
    }

    #[test]
    fn validate_rejects_empty_title_and_author() {
        let dir = std::env::temp_dir();
        let mut story = minimal_story();
        story.metadata.title.clear();
        assert!(matches!(
            HtmlFormatter.format_and_save(&story, &dir.join("storyfetch_void.html")),
            Err(FormatError::EmptyTitle)
        ));
        let mut story = minimal_story();
        story.metadata.author = "  ".to_string();
        assert!(matches!(
            TextFormatter.format_and_save(&story, &dir.join("storyfetch_void.txt")),
            Err(FormatError::EmptyAuthor)
        ));
    }

    #[test]
    fn sanitize_title_cases() {
        assert_eq!(sanitize_title(""), "story");
        assert_eq!(sanitize_title("My  Story!"), "my-story");
        assert_eq!(sanitize_title("  --  a  --  b  --  "), "a-b");
        assert_eq!(sanitize_title("Mother of Learning"), "mother-of-learning");
    }

    #[test]
    fn parse_format_all() {
        assert_eq!(OutputFormat::parse("epub"), Ok(OutputFormat::Epub));
        assert_eq!(OutputFormat::parse("HTML"), Ok(OutputFormat::Html));
        assert_eq!(OutputFormat::parse("md"), Ok(OutputFormat::Markdown));
        assert_eq!(OutputFormat::parse("txt"), Ok(OutputFormat::Text));
        assert!(OutputFormat::parse("pdf").is_err());
    }
}
