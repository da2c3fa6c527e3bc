//! Errors raised by extractors while scanning stories and extracting chapters or media.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("Invalid URL: {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("Extractor used before initialize()")]
    NotInitialized,

    #[error("Extractor used before scan_story()")]
    NotScanned,

    #[error("Chapter {index} is out of range (story has {count} chapter(s))")]
    ChapterOutOfRange { index: u32, count: u32 },

    #[error("Network error: could not reach {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to read response body from {url}: {source}")]
    BodyRead {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Cannot read {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not parse story page: {message}")]
    ParseStoryPage { message: String },

    #[error("Could not parse chapter {index}: missing content container at {url}.")]
    ParseChapter { index: u32, url: String },

    #[error("Could not parse chapter list on story page: {reason}")]
    ChapterListParse { reason: String },

    #[error("Story page has no chapters (possibly deleted or access restricted).")]
    EmptyChapterList,

    #[error("Access blocked or restricted at {url}. A browser session (cookies, captcha) may be required.")]
    AccessBlocked { url: String },
}
