//! Scripted extractor used by pipeline tests.

use crate::extractor::{
    AuthenticationResult, ChannelScan, CredentialPrompt, Credentials, Extractor, ExtractorError,
    ExtractorSource, Session,
};
use crate::model::{Chapter, Metadata};
use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

/// Calls made against every extractor handed out by one [MockSource].
#[derive(Debug, Default)]
pub(crate) struct CallCounts {
    pub scans: Cell<u32>,
    pub chapters: Cell<u32>,
    pub media: Cell<u32>,
    pub authentications: Cell<u32>,
}

/// What a mock extractor serves for one URL.
#[derive(Debug, Clone)]
pub(crate) struct MockStory {
    pub metadata: Metadata,
    /// `None` makes `extract_chapter` fail for that index.
    pub chapters: Vec<Option<Chapter>>,
    /// Media by absolute URL; anything else fails.
    pub media: HashMap<String, Vec<u8>>,
    /// Set to make the URL a channel.
    pub channel: Option<Vec<String>>,
    pub fail_scan: bool,
    pub supports_authentication: bool,
}

impl MockStory {
    /// A story at `url` with `count` chapters titled `Part {i}`.
    pub fn new(url: &str, count: u32) -> Self {
        let mut metadata = Metadata::new(url);
        metadata.title = "Mock Story".to_string();
        metadata.author = "Mock Author".to_string();
        metadata.chapter_count = count;
        let chapters = (1..=count)
            .map(|i| {
                Some(Chapter::new(
                    Some(format!("Part {}", i)),
                    format!("<p>Chapter {} text.</p>", i),
                ))
            })
            .collect();
        Self {
            metadata,
            chapters,
            media: HashMap::new(),
            channel: None,
            fail_scan: false,
            supports_authentication: false,
        }
    }

    pub fn channel(url: &str, stories: &[&str]) -> Self {
        let mut story = Self::new(url, 0);
        story.channel = Some(stories.iter().map(|s| s.to_string()).collect());
        story
    }

    pub fn fail_chapter(mut self, index: u32) -> Self {
        self.chapters[index as usize - 1] = None;
        self
    }
}

pub(crate) struct MockExtractor {
    story: MockStory,
    counts: Rc<CallCounts>,
    scanned: bool,
}

impl Extractor for MockExtractor {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn supported_hostnames(&self) -> &'static [&'static str] {
        &["mock.example"]
    }

    fn supports_authentication(&self) -> bool {
        self.story.supports_authentication
    }

    fn authenticate(
        &mut self,
        session: &mut Session,
        prompt: &mut dyn CredentialPrompt,
    ) -> AuthenticationResult {
        self.counts
            .authentications
            .set(self.counts.authentications.get() + 1);
        match session.credentials(self.name(), prompt) {
            Some(c) if c.password == "secret" => AuthenticationResult::Success,
            Some(_) => AuthenticationResult::Failure,
            None => AuthenticationResult::Abandoned,
        }
    }

    fn initialize(&mut self, url: &str) -> bool {
        url == self.story.metadata.url
    }

    fn scan_channel(&mut self, _url: &str) -> Result<ChannelScan, ExtractorError> {
        Ok(match &self.story.channel {
            Some(stories) => ChannelScan::Stories(stories.clone()),
            None => ChannelScan::NotApplicable,
        })
    }

    fn scan_story(&mut self) -> Result<Metadata, ExtractorError> {
        self.counts.scans.set(self.counts.scans.get() + 1);
        if self.story.fail_scan {
            return Err(ExtractorError::ParseStoryPage {
                message: "scripted scan failure".to_string(),
            });
        }
        self.scanned = true;
        Ok(self.story.metadata.clone())
    }

    fn extract_chapter(&mut self, index: u32) -> Result<Chapter, ExtractorError> {
        if !self.scanned {
            return Err(ExtractorError::NotScanned);
        }
        self.counts.chapters.set(self.counts.chapters.get() + 1);
        let count = self.story.chapters.len() as u32;
        match index.checked_sub(1).and_then(|i| self.story.chapters.get(i as usize)) {
            Some(Some(chapter)) => Ok(chapter.clone()),
            Some(None) => Err(ExtractorError::ParseChapter {
                index,
                url: format!("{}/chapter/{}", self.story.metadata.url, index),
            }),
            None => Err(ExtractorError::ChapterOutOfRange { index, count }),
        }
    }

    fn extract_media(&mut self, url: &str) -> Result<Vec<u8>, ExtractorError> {
        self.counts.media.set(self.counts.media.get() + 1);
        self.story
            .media
            .get(url)
            .cloned()
            .ok_or_else(|| ExtractorError::HttpStatus {
                status: 404,
                url: url.to_string(),
            })
    }
}

/// Hands out [MockExtractor]s for the stories it knows, sharing one set of call counters.
#[derive(Default)]
pub(crate) struct MockSource {
    stories: HashMap<String, MockStory>,
    pub counts: Rc<CallCounts>,
}

impl MockSource {
    pub fn new(stories: impl IntoIterator<Item = MockStory>) -> Self {
        Self {
            stories: stories
                .into_iter()
                .map(|s| (s.metadata.url.clone(), s))
                .collect(),
            counts: Rc::default(),
        }
    }
}

impl ExtractorSource for MockSource {
    fn resolve(&self, url: &str) -> Option<Box<dyn Extractor>> {
        let story = self.stories.get(url)?.clone();
        let mut extractor = MockExtractor {
            story,
            counts: Rc::clone(&self.counts),
            scanned: false,
        };
        extractor
            .initialize(url)
            .then(|| Box::new(extractor) as Box<dyn Extractor>)
    }
}

/// Answers every prompt with the same credentials, or declines.
pub(crate) struct FixedPrompt(pub Option<Credentials>);

impl CredentialPrompt for FixedPrompt {
    fn read_credentials(&mut self, _site: &str) -> Option<Credentials> {
        self.0.clone()
    }
}
