//! Site adapters: the extractor contract, dispatch by URL, and the shared HTTP client.

mod client;
mod error;

pub mod royalroad;
pub mod text_file;

pub use client::{PoliteClient, PoliteClientBuilder};
pub use error::ExtractorError;

use crate::model::{Chapter, Metadata};
use reqwest::Url;
use std::collections::HashMap;

/// Outcome of an authentication attempt. Neither failure nor abandonment stops a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationResult {
    Success,
    Failure,
    /// The user declined to enter credentials.
    Abandoned,
}

/// Result of trying to expand a URL as a channel (a listing of stories).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelScan {
    /// The URL is a story, not a channel.
    NotApplicable,
    Stories(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Asks the user for credentials. Returning `None` abandons authentication for that site.
pub trait CredentialPrompt {
    fn read_credentials(&mut self, site: &str) -> Option<Credentials>;
}

/// Credentials remembered across stories of one run, keyed by extractor name.
///
/// The user is asked at most once per site; a declined prompt is remembered too, so later stories
/// from the same site are not interrupted again.
#[derive(Debug, Default)]
pub struct Session {
    credentials: HashMap<&'static str, Option<Credentials>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembered credentials for `site`, prompting the first time.
    pub fn credentials(
        &mut self,
        site: &'static str,
        prompt: &mut dyn CredentialPrompt,
    ) -> Option<Credentials> {
        self.credentials
            .entry(site)
            .or_insert_with(|| {
                prompt
                    .read_credentials(site)
                    .filter(|c| !c.username.is_empty() && !c.password.is_empty())
            })
            .clone()
    }
}

/// A site adapter. One instance handles one story.
///
/// Call order: [initialize](Self::initialize), optionally [authenticate](Self::authenticate),
/// [scan_story](Self::scan_story), then any number of [extract_chapter](Self::extract_chapter) and
/// [extract_media](Self::extract_media). Out of order calls fail with
/// [ExtractorError::NotInitialized] or [ExtractorError::NotScanned].
pub trait Extractor {
    /// Short name for logs and credential prompts.
    fn name(&self) -> &'static str;

    /// Hostnames (without `www.` or `m.`) this adapter handles. Empty for non-web sources.
    fn supported_hostnames(&self) -> &'static [&'static str];

    /// Whether the caller should pause after each fresh request to this source.
    fn requires_breaks_between_requests(&self) -> bool {
        true
    }

    fn supports_authentication(&self) -> bool {
        false
    }

    fn authenticate(
        &mut self,
        _session: &mut Session,
        _prompt: &mut dyn CredentialPrompt,
    ) -> AuthenticationResult {
        AuthenticationResult::Failure
    }

    /// Bind to `url`. Returns false if the adapter does not handle it.
    fn initialize(&mut self, url: &str) -> bool;

    /// Expand a listing page into story URLs.
    fn scan_channel(&mut self, _url: &str) -> Result<ChannelScan, ExtractorError> {
        Ok(ChannelScan::NotApplicable)
    }

    /// Fetch story metadata and the chapter list.
    fn scan_story(&mut self) -> Result<Metadata, ExtractorError>;

    /// Extract chapter `index` (1-based).
    fn extract_chapter(&mut self, index: u32) -> Result<Chapter, ExtractorError>;

    /// Download an image or other embedded resource.
    fn extract_media(&mut self, url: &str) -> Result<Vec<u8>, ExtractorError>;
}

/// Produces an initialized extractor for a URL.
pub trait ExtractorSource {
    fn resolve(&self, url: &str) -> Option<Box<dyn Extractor>>;
}

/// The production extractors, tried in order; the first whose `initialize` accepts the URL wins.
#[derive(Debug, Clone)]
pub struct ExtractorRegistry {
    client: PoliteClient,
}

impl ExtractorRegistry {
    pub fn new(client: PoliteClient) -> Self {
        Self { client }
    }
}

impl ExtractorSource for ExtractorRegistry {
    fn resolve(&self, url: &str) -> Option<Box<dyn Extractor>> {
        let candidates: Vec<Box<dyn Extractor>> = vec![
            Box::new(royalroad::RoyalRoadExtractor::new(self.client.clone())),
            Box::new(text_file::TextFileExtractor::new(self.client.clone())),
        ];
        for mut extractor in candidates {
            if extractor.initialize(url) {
                tracing::debug!("{} handles {}", extractor.name(), url);
                return Some(extractor);
            }
        }
        None
    }
}

/// Lowercase host of `url` without a leading `www.` or `m.`.
pub fn hostname(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host
        .strip_prefix("www.")
        .or_else(|| host.strip_prefix("m."))
        .unwrap_or(&host);
    Some(host.to_string())
}

pub fn hostname_supported(url: &str, supported: &[&str]) -> bool {
    hostname(url).is_some_and(|h| supported.contains(&h.as_str()))
}

/// Check a response: map 403/503 to AccessBlocked, other non-2xx to HttpStatus.
pub(crate) fn check_response(
    response: reqwest::blocking::Response,
    url: &str,
) -> Result<reqwest::blocking::Response, ExtractorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let code = status.as_u16();
    if code == 403 || code == 503 {
        return Err(ExtractorError::AccessBlocked {
            url: url.to_string(),
        });
    }
    Err(ExtractorError::HttpStatus {
        status: code,
        url: url.to_string(),
    })
}

/// GET `url` with retries and return the body as text.
pub(crate) fn fetch_text(client: &PoliteClient, url: &str) -> Result<String, ExtractorError> {
    let response = client
        .get_with_retry(url)
        .map_err(|e| ExtractorError::Network {
            url: url.to_string(),
            source: e,
        })?;
    check_response(response, url)?
        .text()
        .map_err(|e| ExtractorError::BodyRead {
            url: url.to_string(),
            source: e,
        })
}

/// GET `url` with retries and return the raw body.
pub(crate) fn fetch_bytes(client: &PoliteClient, url: &str) -> Result<Vec<u8>, ExtractorError> {
    let response = client
        .get_with_retry(url)
        .map_err(|e| ExtractorError::Network {
            url: url.to_string(),
            source: e,
        })?;
    check_response(response, url)?
        .bytes()
        .map(|b| b.to_vec())
        .map_err(|e| ExtractorError::BodyRead {
            url: url.to_string(),
            source: e,
        })
}

/// Strip a known site suffix from the end of a page title (e.g. " - Royal Road") so that titles
/// containing " - " themselves are preserved.
pub fn strip_title_site_suffix(s: &str, suffixes: &[&str]) -> String {
    let mut t = s.trim();
    for suffix in suffixes {
        if let Some(stripped) = t.strip_suffix(suffix) {
            t = stripped.trim();
            break;
        }
    }
    t.to_string()
}
