//! Acquisition pipeline: drives one input URL through scan, chapter extraction, image extraction
//! and normalization, using the [Cache] so that an interrupted run can resume where it stopped.

use crate::cache::Cache;
use crate::extractor::{
    AuthenticationResult, CredentialPrompt, Extractor, ExtractorError, ExtractorSource, Session,
};
use crate::formats::{output_paths, sanitize_title, OutputFormat};
use crate::media::{self, DEFAULT_MAX_IMAGE_SIDE};
use crate::model::{
    Chapter, Image, Metadata, ScannedStory, Story, StoryWithChapters, StoryWithImages,
    SUMMARY_LENGTH,
};
use crate::processor::{find_image_sources, make_url_absolute, normalize};
use base64::Engine;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Pause after each fresh request to a site that asks for breaks.
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct AcquireOptions {
    pub request_delay: Duration,
    pub max_image_side: u32,
    /// Download again even if every output file exists; existing outputs are deleted.
    pub force: bool,
    pub download_images: bool,
    /// Where to dump chapter content before and after normalization.
    pub debug_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub formats: Vec<OutputFormat>,
    pub authenticate: bool,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            request_delay: DEFAULT_REQUEST_DELAY,
            max_image_side: DEFAULT_MAX_IMAGE_SIDE,
            force: false,
            download_images: true,
            debug_dir: None,
            output_dir: PathBuf::from(crate::config::DEFAULT_OUTPUT_DIR),
            formats: vec![OutputFormat::Epub],
            authenticate: false,
        }
    }
}

/// Which loop a progress callback refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Chapters,
    Images,
}

/// What happened while acquiring one story.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquireReport {
    pub chapters_retained: usize,
    pub chapters_from_cache: usize,
    /// Boundary chapters that could not be extracted.
    pub skipped_chapters: Vec<u32>,
    pub images_total: usize,
    pub images_ok: usize,
    pub authentication: Option<AuthenticationResult>,
}

impl AcquireReport {
    pub fn images_summary(&self) -> String {
        format!("{}/{} image(s)", self.images_ok, self.images_total)
    }
}

#[derive(Debug)]
pub enum Acquired {
    Story(Story, AcquireReport),
    /// Every output file already exists; nothing was downloaded.
    AlreadyDownloaded(Metadata),
}

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("No extractor supports {url}")]
    NoExtractor { url: String },

    #[error("Failed to scan {url}: {source}")]
    Scan {
        url: String,
        #[source]
        source: ExtractorError,
    },

    #[error("Failed to extract chapter {index}: {source}")]
    Chapter {
        index: u32,
        #[source]
        source: ExtractorError,
    },

    #[error("Chapter {index} has no content")]
    EmptyChapter { index: u32 },

    #[error("No chapters could be retrieved from {url}")]
    NoChaptersRetrieved { url: String },

    #[error("Cannot remove existing output {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Progress<'a> = Option<&'a dyn Fn(Phase, u32, u32)>;

/// Runs the pipeline for one URL at a time. Owns the cache for the whole run.
#[derive(Debug)]
pub struct Orchestrator {
    cache: Cache,
    options: AcquireOptions,
}

impl Orchestrator {
    pub fn new(cache: Cache, options: AcquireOptions) -> Self {
        Self { cache, options }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut Cache {
        &mut self.cache
    }

    pub fn options(&self) -> &AcquireOptions {
        &self.options
    }

    /// Acquire the story at `url`.
    ///
    /// Chapter and image payloads are cached under the story's URL as they arrive, so calling this
    /// again after a failure or an interruption only fetches what is still missing.
    pub fn process_url(
        &mut self,
        url: &str,
        source: &dyn ExtractorSource,
        session: &mut Session,
        prompt: &mut dyn CredentialPrompt,
        progress: Progress<'_>,
    ) -> Result<Acquired, AcquireError> {
        let mut extractor = source.resolve(url).ok_or_else(|| AcquireError::NoExtractor {
            url: url.to_string(),
        })?;
        info!("Processing {} ({})", url, extractor.name());

        let authentication = if self.options.authenticate && extractor.supports_authentication() {
            let result = extractor.authenticate(session, prompt);
            match result {
                AuthenticationResult::Success => info!("Logged in to {}", extractor.name()),
                AuthenticationResult::Failure => {
                    warn!("Login to {} failed; continuing without it", extractor.name())
                }
                AuthenticationResult::Abandoned => {
                    info!("Login to {} skipped", extractor.name())
                }
            }
            Some(result)
        } else {
            None
        };

        let mut metadata = extractor
            .scan_story()
            .map_err(|e| AcquireError::Scan {
                url: url.to_string(),
                source: e,
            })?;
        metadata.process(Some(SUMMARY_LENGTH));
        log_metadata(&metadata);
        let missing = metadata.missing_values();
        if !missing.is_empty() {
            warn!("Story metadata is missing: {}", missing.join(", "));
        }

        if self.already_downloaded(&metadata)? {
            info!("Already downloaded: {}", metadata.title);
            return Ok(Acquired::AlreadyDownloaded(metadata));
        }

        let mut report = AcquireReport {
            authentication,
            ..AcquireReport::default()
        };
        let scanned = ScannedStory { metadata };
        let with_chapters =
            self.fetch_chapters(scanned, extractor.as_mut(), &mut report, progress)?;
        let with_images = if self.options.download_images {
            self.fetch_images(with_chapters, extractor.as_mut(), &mut report, progress)
        } else {
            StoryWithImages {
                metadata: with_chapters.metadata,
                chapters: with_chapters.chapters,
                images: Vec::new(),
            }
        };
        let story = self.normalize_story(with_images);
        Ok(Acquired::Story(story, report))
    }

    /// True when every expected output exists and `force` is off. Under `force`, existing
    /// outputs are deleted.
    fn already_downloaded(&self, metadata: &Metadata) -> Result<bool, AcquireError> {
        let paths = output_paths(&self.options.output_dir, metadata, &self.options.formats);
        if paths.is_empty() {
            return Ok(false);
        }
        if !self.options.force {
            return Ok(paths.iter().all(|p| p.exists()));
        }
        for path in paths.into_iter().filter(|p| p.exists()) {
            debug!("Removing {}", path.display());
            std::fs::remove_file(&path).map_err(|e| AcquireError::Output { path, source: e })?;
        }
        Ok(false)
    }

    fn fetch_chapters(
        &mut self,
        story: ScannedStory,
        extractor: &mut dyn Extractor,
        report: &mut AcquireReport,
        progress: Progress<'_>,
    ) -> Result<StoryWithChapters, AcquireError> {
        let metadata = story.metadata;
        let owner = metadata.url.clone();
        let count = metadata.chapter_count;
        let mut chapters = Vec::with_capacity(count as usize);

        for index in 1..=count {
            let title_key = format!("{}-Title", index);
            let content_key = format!("{}-Content", index);

            let cached = self
                .cache
                .retrieve_text(&owner, &content_key)
                .filter(|c| !c.is_empty());
            if let Some(content) = cached {
                debug!("Chapter {} from cache", index);
                let title = self.cache.retrieve_text(&owner, &title_key);
                chapters.push(Chapter::new(title, content));
                report.chapters_from_cache += 1;
            } else {
                let boundary = index == 1 || index == count;
                let result = extractor.extract_chapter(index);
                self.pause(extractor);
                match result {
                    Ok(chapter) if chapter.is_present() => {
                        if let Some(title) = &chapter.title {
                            self.cache.add_item(&owner, &title_key, title);
                        }
                        self.cache.add_item(&owner, &content_key, &chapter.content);
                        chapters.push(chapter);
                    }
                    Ok(_) if boundary => {
                        warn!("Chapter {} is empty; skipping it", index);
                        report.skipped_chapters.push(index);
                    }
                    Ok(_) => return Err(AcquireError::EmptyChapter { index }),
                    Err(e) if boundary => {
                        warn!("Skipping chapter {}: {}", index, e);
                        report.skipped_chapters.push(index);
                    }
                    Err(e) => return Err(AcquireError::Chapter { index, source: e }),
                }
            }

            if let Some(p) = progress {
                p(Phase::Chapters, index, count);
            }
        }

        if chapters.is_empty() {
            return Err(AcquireError::NoChaptersRetrieved { url: owner });
        }
        if chapters.len() as u32 != count {
            warn!(
                "Retained {} of {} chapter(s); keeping the chapter count reported by the site",
                chapters.len(),
                count
            );
        }
        report.chapters_retained = chapters.len();
        Ok(StoryWithChapters { metadata, chapters })
    }

    fn fetch_images(
        &mut self,
        story: StoryWithChapters,
        extractor: &mut dyn Extractor,
        report: &mut AcquireReport,
        progress: Progress<'_>,
    ) -> StoryWithImages {
        let site = story.metadata.site_url().unwrap_or_default();
        let mut urls: Vec<String> = Vec::new();
        for chapter in &story.chapters {
            for src in find_image_sources(&chapter.content) {
                match make_url_absolute(&src, &site) {
                    Some(url) if !urls.contains(&url) => urls.push(url),
                    Some(_) => {}
                    None => debug!("Ignoring image with unusable source {:?}", src),
                }
            }
        }

        let total = urls.len() as u32;
        let mut images = Vec::with_capacity(urls.len());
        for (i, url) in urls.into_iter().enumerate() {
            let image = self.fetch_image(&story.metadata.url, url, extractor);
            if image.is_present() {
                report.images_ok += 1;
            }
            images.push(image);
            if let Some(p) = progress {
                p(Phase::Images, i as u32 + 1, total);
            }
        }
        report.images_total = images.len();
        if !images.is_empty() {
            info!("Downloaded {}", report.images_summary());
        }

        StoryWithImages {
            metadata: story.metadata,
            chapters: story.chapters,
            images,
        }
    }

    /// Cached bytes are already processed and are used as they are; anything else is
    /// downloaded, rescaled and cached. Inline `data:` images are decoded every time and never
    /// cached. Failures leave the image without data.
    fn fetch_image(&mut self, owner: &str, url: String, extractor: &mut dyn Extractor) -> Image {
        let inline = data_uri_payload(&url);
        let cached = match inline {
            Some(_) => None,
            None => self.cache.retrieve_item(owner, &url),
        };
        if let Some(bytes) = cached {
            match media::inspect(&bytes) {
                Ok(data) => {
                    return Image {
                        url,
                        data: Some(data),
                    }
                }
                Err(e) => debug!("Cached image {} is unusable: {}", url, e),
            }
        }

        let is_inline = inline.is_some();
        let bytes = match inline {
            Some(payload) => payload,
            None => {
                let result = extractor.extract_media(&url);
                self.pause(extractor);
                result
            }
        };
        let bytes = match bytes {
            Ok(b) => b,
            Err(e) => {
                warn!("Image {} failed: {}", url, e);
                return Image::new(url);
            }
        };
        match media::decode_and_rescale(&bytes, self.options.max_image_side) {
            Ok(data) => {
                if !is_inline {
                    self.cache.add_item(owner, &url, &data.bytes);
                }
                Image {
                    url,
                    data: Some(data),
                }
            }
            Err(e) => {
                warn!("Image {} failed: {}", url, e);
                Image::new(url)
            }
        }
    }

    fn normalize_story(&self, story: StoryWithImages) -> Story {
        let StoryWithImages {
            metadata,
            chapters,
            images,
        } = story;

        let dump_dir = self
            .options
            .debug_dir
            .as_ref()
            .map(|d| d.join(sanitize_title(&metadata.title)))
            .filter(|d| match std::fs::create_dir_all(d) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Cannot create debug directory {}: {}", d.display(), e);
                    false
                }
            });

        let chapters: Vec<Chapter> = chapters
            .into_iter()
            .enumerate()
            .map(|(i, mut chapter)| {
                let content = normalize(&chapter.content).unwrap_or_default();
                if content.is_empty() && chapter.is_present() {
                    warn!("Chapter {} has no content left after normalization", i + 1);
                }
                if let Some(dir) = &dump_dir {
                    dump_chapter(dir, i + 1, &chapter.content, &content);
                }
                chapter.process();
                chapter.content = content;
                chapter
            })
            .collect();

        let mut story = Story {
            metadata,
            chapters,
            images,
        };
        if story.metadata.word_count == 0 {
            story.metadata.word_count = story.calculate_word_count();
        }
        story
    }

    fn pause(&self, extractor: &dyn Extractor) {
        if extractor.requires_breaks_between_requests() && !self.options.request_delay.is_zero() {
            std::thread::sleep(self.options.request_delay);
        }
    }
}

/// Decoded payload of a `data:…;base64,…` URL. `None` for any other URL.
fn data_uri_payload(url: &str) -> Option<Result<Vec<u8>, ExtractorError>> {
    let rest = url.strip_prefix("data:")?;
    let decoded = match rest.split_once(";base64,") {
        Some((_, payload)) => base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| e.to_string()),
        None => Err("only base64 data URLs are supported".to_string()),
    };
    Some(decoded.map_err(|reason| ExtractorError::InvalidUrl {
        input: url.chars().take(40).collect(),
        reason,
    }))
}

fn dump_chapter(dir: &Path, index: usize, original: &str, processed: &str) {
    for (suffix, content) in [("Original", original), ("Processed", processed)] {
        let path = dir.join(format!("{} - {}.html", index, suffix));
        if let Err(e) = std::fs::write(&path, content) {
            warn!("Cannot write {}: {}", path.display(), e);
        }
    }
}

fn log_metadata(metadata: &Metadata) {
    info!("Title: {}", metadata.title);
    info!("Author: {}", metadata.author);
    info!(
        "Published: {}, updated: {}",
        metadata.date_published, metadata.date_updated
    );
    info!(
        "Chapters: {}, words: {}",
        metadata.chapter_count, metadata.word_count
    );
}
