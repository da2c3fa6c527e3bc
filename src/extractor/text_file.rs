//! Local text files: either a story or a list of URLs.
//!
//! A story file starts with the line `LOCAL TEXT STORY`, followed by the story URL, title, author
//! and summary (one line each), then HTML content. Lines starting with `CHAPTER BREAK LINE`
//! separate chapters. Any other text file is a channel: one URL per line, blank lines and lines
//! starting with `#` are ignored.

use super::{fetch_bytes, ChannelScan, Extractor, ExtractorError, PoliteClient};
use crate::model::{Chapter, Metadata};
use std::path::PathBuf;

pub const STORY_MAGIC_LINE: &str = "LOCAL TEXT STORY";
pub const CHAPTER_BREAK_LINE: &str = "CHAPTER BREAK LINE";

/// Magic line plus URL, title, author and summary.
const HEADER_LINES: usize = 5;

pub struct TextFileExtractor {
    client: PoliteClient,
    path: Option<PathBuf>,
    chapters: Option<Vec<String>>,
}

impl TextFileExtractor {
    /// `client` is only used to download images referenced by the story.
    pub fn new(client: PoliteClient) -> Self {
        Self {
            client,
            path: None,
            chapters: None,
        }
    }

    fn read_lines(&self) -> Result<Vec<String>, ExtractorError> {
        let path = self.path.as_ref().ok_or(ExtractorError::NotInitialized)?;
        let text = std::fs::read_to_string(path).map_err(|e| ExtractorError::File {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(text.lines().map(str::to_string).collect())
    }
}

fn is_story(lines: &[String]) -> bool {
    lines
        .first()
        .is_some_and(|l| l.trim_start_matches('\u{feff}').starts_with(STORY_MAGIC_LINE))
}

/// URLs listed one per line; blank lines and `#` comments are skipped.
fn read_urls(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Split story content into chapters. Every break line closes the current chapter, so there is
/// always one more chapter than there are break lines.
fn split_chapters(content: &[String]) -> Vec<String> {
    let mut chapters = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in content {
        if line.starts_with(CHAPTER_BREAK_LINE) {
            chapters.push(current.join("\n").trim().to_string());
            current.clear();
        } else {
            current.push(line);
        }
    }
    chapters.push(current.join("\n").trim().to_string());
    chapters
}

impl Extractor for TextFileExtractor {
    fn name(&self) -> &'static str {
        "text file"
    }

    fn supported_hostnames(&self) -> &'static [&'static str] {
        &[]
    }

    fn requires_breaks_between_requests(&self) -> bool {
        false
    }

    fn initialize(&mut self, url: &str) -> bool {
        let path = PathBuf::from(url.trim());
        match std::fs::read_to_string(&path) {
            Ok(text) if !text.trim().is_empty() => {
                self.path = Some(path);
                self.chapters = None;
                true
            }
            _ => false,
        }
    }

    fn scan_channel(&mut self, _url: &str) -> Result<ChannelScan, ExtractorError> {
        let lines = self.read_lines()?;
        if is_story(&lines) {
            return Ok(ChannelScan::NotApplicable);
        }
        Ok(ChannelScan::Stories(read_urls(&lines)))
    }

    fn scan_story(&mut self) -> Result<Metadata, ExtractorError> {
        let lines = self.read_lines()?;
        if !is_story(&lines) || lines.len() <= HEADER_LINES {
            return Err(ExtractorError::ParseStoryPage {
                message: format!(
                    "not a story file: expected a \"{}\" header followed by URL, title, author, summary and content",
                    STORY_MAGIC_LINE
                ),
            });
        }

        let field = |i: usize| lines[i].trim().to_string();
        let url = match field(1) {
            u if u.is_empty() => self
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            u => u,
        };
        let mut metadata = Metadata::new(url);
        metadata.title = field(2);
        metadata.author = field(3);
        metadata.summary = Some(field(4)).filter(|s| !s.is_empty());

        let chapters = split_chapters(&lines[HEADER_LINES..]);
        metadata.chapter_count = chapters.len() as u32;
        self.chapters = Some(chapters);
        Ok(metadata)
    }

    fn extract_chapter(&mut self, index: u32) -> Result<Chapter, ExtractorError> {
        if self.path.is_none() {
            return Err(ExtractorError::NotInitialized);
        }
        let chapters = self.chapters.as_ref().ok_or(ExtractorError::NotScanned)?;
        let count = chapters.len() as u32;
        index
            .checked_sub(1)
            .and_then(|i| chapters.get(i as usize))
            .map(|content| Chapter::new(None, content.clone()))
            .ok_or(ExtractorError::ChapterOutOfRange { index, count })
    }

    fn extract_media(&mut self, url: &str) -> Result<Vec<u8>, ExtractorError> {
        fetch_bytes(&self.client, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    fn extractor_for(text: &str) -> Result<(tempfile::TempDir, TextFileExtractor), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("input.txt");
        std::fs::write(&path, text)?;
        let mut extractor = TextFileExtractor::new(PoliteClient::new()?);
        assert!(extractor.initialize(&path.to_string_lossy()));
        Ok((dir, extractor))
    }

    #[test]
    fn story_file_is_split_into_chapters() -> Result<(), Box<dyn Error>> {
        let text = "LOCAL TEXT STORY\nhttps://example.com/s/1\nMy Title\nMe\nA summary.\n\
<p>One</p>\n<p>More one</p>\nCHAPTER BREAK LINE\n<p>Two</p>\nCHAPTER BREAK LINE ----\n<p>Three</p>\n";
        let (_dir, mut extractor) = extractor_for(text)?;
        assert_eq!(
            extractor.scan_channel("ignored")?,
            ChannelScan::NotApplicable
        );

        let metadata = extractor.scan_story()?;
        assert_eq!(metadata.url, "https://example.com/s/1");
        assert_eq!(metadata.title, "My Title");
        assert_eq!(metadata.author, "Me");
        assert_eq!(metadata.summary.as_deref(), Some("A summary."));
        assert_eq!(metadata.chapter_count, 3);

        assert_eq!(extractor.extract_chapter(1)?.content, "<p>One</p>\n<p>More one</p>");
        assert_eq!(extractor.extract_chapter(3)?.content, "<p>Three</p>");
        assert!(matches!(
            extractor.extract_chapter(4),
            Err(ExtractorError::ChapterOutOfRange { index: 4, count: 3 })
        ));
        assert!(!extractor.requires_breaks_between_requests());
        Ok(())
    }

    #[test]
    fn url_list_is_a_channel() -> Result<(), Box<dyn Error>> {
        let text = "# my list\nhttps://a.com/1\n\n  https://b.com/2  \n";
        let (_dir, mut extractor) = extractor_for(text)?;
        assert_eq!(
            extractor.scan_channel("ignored")?,
            ChannelScan::Stories(vec!["https://a.com/1".into(), "https://b.com/2".into()])
        );
        assert!(matches!(
            extractor.scan_story(),
            Err(ExtractorError::ParseStoryPage { .. })
        ));
        Ok(())
    }

    #[test]
    fn missing_or_empty_files_are_rejected() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let empty = dir.path().join("empty.txt");
        std::fs::write(&empty, "  \n")?;
        let mut extractor = TextFileExtractor::new(PoliteClient::new()?);
        assert!(!extractor.initialize(&empty.to_string_lossy()));
        assert!(!extractor.initialize(&dir.path().join("nope.txt").to_string_lossy()));
        assert!(!extractor.initialize("https://example.com/story"));
        assert!(matches!(extractor.scan_story(), Err(ExtractorError::NotInitialized)));
        Ok(())
    }

    #[test]
    fn extract_before_scan_fails() -> Result<(), Box<dyn Error>> {
        let (_dir, mut extractor) = extractor_for("LOCAL TEXT STORY\nu\nt\na\ns\nc\n")?;
        assert!(matches!(
            extractor.extract_chapter(1),
            Err(ExtractorError::NotScanned)
        ));
        Ok(())
    }

    #[test]
    fn break_line_splitting() {
        let lines: Vec<String> = ["a", "CHAPTER BREAK LINE", "CHAPTER BREAK LINE", "b"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(split_chapters(&lines), vec!["a", "", "b"]);
    }
}
