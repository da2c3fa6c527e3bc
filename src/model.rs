//! Story data model shared by extractors, the acquisition pipeline and the formatters.
//!
//! A story is assembled in stages, each stage consuming the previous one:
//! [ScannedStory] → [StoryWithChapters] → [StoryWithImages] → [Story].
//! Only a finished [Story] is handed to formatters.

use crate::processor::{
    escape_attr, make_url_absolute, map_image_sources, prettify_title, process_text, strip_html,
    truncate,
};
use serde::{Deserialize, Serialize};

/// Summaries longer than this many characters are cut, ending with `…`.
pub const SUMMARY_LENGTH: usize = 250;

/// Today's date as `YYYY-MM-DD`.
pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// Story metadata, populated once by an extractor's scan.
///
/// `chapter_count` is what the source site claims; the number of chapters actually retained may be
/// lower when a boundary chapter could not be extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub url: String,
    pub title: String,
    pub author: String,
    pub summary: Option<String>,
    /// ISO 8601 (`YYYY-MM-DD`).
    pub date_published: String,
    pub date_updated: String,
    pub date_extracted: String,
    pub chapter_count: u32,
    /// Zero means unknown; recomputed after normalization.
    pub word_count: u64,
}

impl Metadata {
    /// Fresh metadata bound to `url`, with every date set to today.
    pub fn new(url: impl Into<String>) -> Self {
        let date = today();
        Self {
            url: url.into(),
            title: String::new(),
            author: String::new(),
            summary: None,
            date_published: date.clone(),
            date_updated: date.clone(),
            date_extracted: date,
            chapter_count: 0,
            word_count: 0,
        }
    }

    /// Names of required fields that are still empty.
    pub fn missing_values(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.url.trim().is_empty() {
            missing.push("url");
        }
        if self.title.trim().is_empty() {
            missing.push("title");
        }
        if self.author.trim().is_empty() {
            missing.push("author");
        }
        if self.chapter_count == 0 {
            missing.push("chapter_count");
        }
        missing
    }

    /// Prettify the title, fix typography of title and summary, decode entities and cut the
    /// summary to `summary_length` characters.
    pub fn process(&mut self, summary_length: Option<usize>) {
        self.title = process_text(&prettify_title(&self.title));
        self.summary = self
            .summary
            .as_deref()
            .map(process_text)
            .map(|s| match summary_length {
                Some(n) => truncate(&s, n),
                None => s,
            })
            .filter(|s| !s.is_empty());
    }

    /// Scheme, host and port of the story URL, e.g. `https://www.royalroad.com`.
    pub fn site_url(&self) -> Option<String> {
        let url = reqwest::Url::parse(&self.url).ok()?;
        let host = url.host_str()?;
        Some(match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
            None => format!("{}://{}", url.scheme(), host),
        })
    }
}

/// One chapter. Absence of content represents an extraction gap, never an error value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: Option<String>,
    pub content: String,
}

impl Chapter {
    pub fn new(title: Option<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.filter(|t| !t.trim().is_empty()),
            content: content.into(),
        }
    }

    pub fn is_present(&self) -> bool {
        !self.content.is_empty()
    }

    /// Drop leading numbering from the title; a title with nothing left becomes `None`.
    pub fn process(&mut self) {
        self.title = self
            .title
            .as_deref()
            .map(prettify_title)
            .filter(|t| !t.is_empty());
    }

    /// Heading shown in documents: `Chapter {index}`, plus `: {title}` when there is one.
    pub fn heading(&self, index: usize) -> String {
        match &self.title {
            Some(t) => format!("Chapter {}: {}", index, t),
            None => format!("Chapter {}", index),
        }
    }
}

/// Decoded, rescaled and re-encoded (JPEG) image data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// An image referenced by chapter content. `url` is absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub url: String,
    pub data: Option<ImageData>,
}

impl Image {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            data: None,
        }
    }

    pub fn is_present(&self) -> bool {
        self.data.as_ref().is_some_and(|d| !d.bytes.is_empty())
    }
}

/// Output of a successful scan.
#[derive(Debug, Clone)]
pub struct ScannedStory {
    pub metadata: Metadata,
}

/// A scanned story whose chapter loop has finished.
#[derive(Debug, Clone)]
pub struct StoryWithChapters {
    pub metadata: Metadata,
    pub chapters: Vec<Chapter>,
}

/// A story whose image loop has finished (or was skipped).
#[derive(Debug, Clone)]
pub struct StoryWithImages {
    pub metadata: Metadata,
    pub chapters: Vec<Chapter>,
    pub images: Vec<Image>,
}

/// A finished, normalized story ready for formatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Story {
    pub metadata: Metadata,
    pub chapters: Vec<Chapter>,
    pub images: Vec<Image>,
}

impl Story {
    /// Count words across all chapter content, ignoring markup.
    pub fn calculate_word_count(&self) -> u64 {
        self.chapters
            .iter()
            .map(|c| strip_html(&c.content).split_whitespace().count() as u64)
            .sum()
    }

    /// Look up a downloaded image by its absolute URL.
    pub fn image(&self, url: &str) -> Option<&Image> {
        self.images.iter().find(|i| i.url == url && i.is_present())
    }

    /// Join finished stories into one package. `None` when there are no stories.
    ///
    /// Chapter titles carry their story's title and image sources are made absolute against their
    /// story's site, so the package resolves images without a site of its own.
    pub fn package(stories: &[Story]) -> Option<Story> {
        let first = stories.first()?;
        let mut authors: Vec<&str> = Vec::new();
        let mut metadata = Metadata::new("");
        metadata.title = format!("storyfetch Package ({})", today());
        metadata.date_published = first.metadata.date_extracted.clone();
        metadata.date_updated = first.metadata.date_extracted.clone();
        metadata.date_extracted = first.metadata.date_extracted.clone();

        let mut chapters = Vec::new();
        let mut images: Vec<Image> = Vec::new();
        for story in stories {
            let m = &story.metadata;
            if !authors.contains(&m.author.as_str()) {
                authors.push(&m.author);
            }
            metadata.chapter_count += m.chapter_count;
            metadata.word_count += m.word_count;

            let site = m.site_url().unwrap_or_default();
            for (i, chapter) in story.chapters.iter().enumerate() {
                let title = match &chapter.title {
                    Some(t) => format!("{}: {}", m.title, t),
                    None => format!("{}: Chapter {}", m.title, i + 1),
                };
                let content = map_image_sources(&chapter.content, |src| {
                    let url = make_url_absolute(src, &site).unwrap_or_else(|| src.to_string());
                    Some(format!(r#"<img src="{}"/>"#, escape_attr(&url)))
                });
                chapters.push(Chapter::new(Some(title), content));
            }
            for image in &story.images {
                if !images.iter().any(|i| i.url == image.url) {
                    images.push(image.clone());
                }
            }
        }
        metadata.author = authors.join(", ");

        Some(Story {
            metadata,
            chapters,
            images,
        })
    }
}
