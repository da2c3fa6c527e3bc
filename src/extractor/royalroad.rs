//! Royal Road adapter. Scans the fiction page (metadata + table of contents), then fetches each
//! chapter page on demand.
//!
//! Cloudflare: cookie jar and browser-like User-Agent are used; captcha is not handled.

use super::{
    fetch_bytes, fetch_text, hostname_supported, strip_title_site_suffix, AuthenticationResult,
    ChannelScan, CredentialPrompt, Extractor, ExtractorError, PoliteClient, Session,
};
use crate::model::{Chapter, Metadata};
use reqwest::Url;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::{info, warn};

const ROYALROAD_BASE: &str = "https://www.royalroad.com";
const LOGIN_URL: &str = "https://www.royalroad.com/account/login";
const TITLE_SUFFIXES: &[&str] = &[" _ Royal Road", " - Royal Road", " | Royal Road"];

/// Parse a CSS selector or return a parse error (avoids panics from Selector::parse).
fn parse_selector(sel: &str) -> Result<Selector, ExtractorError> {
    Selector::parse(sel).map_err(|e| ExtractorError::ParseStoryPage {
        message: format!("invalid selector {:?}: {}", sel, e),
    })
}

/// Shape of one entry in window.chapters (relative url, order 0-based, isUnlocked).
#[derive(Debug, Deserialize)]
struct WindowChapter {
    title: String,
    url: String,
    #[serde(default)]
    order: u32,
    #[serde(rename = "isUnlocked", default = "default_true")]
    is_unlocked: bool,
    #[serde(default)]
    date: Option<String>,
}

fn default_true() -> bool {
    true
}

/// One readable chapter from the table of contents.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TocEntry {
    url: String,
    title: String,
    date: Option<String>,
}

/// Metadata found on the fiction page.
#[derive(Debug, PartialEq, Eq)]
struct FictionInfo {
    title: String,
    author: String,
    description: Option<String>,
}

pub struct RoyalRoadExtractor {
    client: PoliteClient,
    story_url: Option<String>,
    toc: Option<Vec<TocEntry>>,
}

impl RoyalRoadExtractor {
    pub fn new(client: PoliteClient) -> Self {
        Self {
            client,
            story_url: None,
            toc: None,
        }
    }

    fn scanned_toc(&self) -> Result<&[TocEntry], ExtractorError> {
        if self.story_url.is_none() {
            return Err(ExtractorError::NotInitialized);
        }
        self.toc.as_deref().ok_or(ExtractorError::NotScanned)
    }
}

/// Canonical fiction URL: `https://www.royalroad.com/fiction/{id}[/{slug}]`. Chapter URLs map to
/// their fiction. Other pages (profiles, listings) are returned with the standard host.
fn normalize_story_url(url: &str) -> Result<String, ExtractorError> {
    let parsed = Url::parse(url.trim()).map_err(|e| ExtractorError::InvalidUrl {
        input: url.to_string(),
        reason: e.to_string(),
    })?;
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    let path = match segments.as_slice() {
        ["fiction", id, slug, ..] if *slug != "chapter" => format!("/fiction/{}/{}", id, slug),
        ["fiction", id, ..] => format!("/fiction/{}", id),
        other => format!("/{}", other.join("/")),
    };
    Ok(format!("{}{}", ROYALROAD_BASE, path))
}

/// Profile id if `url` is an author page (`/profile/{id}` or `/profile/{id}/fictions`).
fn profile_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let mut segments = parsed.path_segments()?.filter(|p| !p.is_empty());
    if segments.next()? != "profile" {
        return None;
    }
    let id = segments.next()?;
    id.chars()
        .all(|c| c.is_ascii_digit())
        .then(|| id.to_string())
}

/// Fiction URLs listed on a profile's fictions page, in page order.
fn parse_profile_fictions(html: &str) -> Result<Vec<String>, ExtractorError> {
    let doc = Html::parse_document(html);
    let sel = parse_selector("h2.fiction-title a")?;
    let mut urls: Vec<String> = Vec::new();
    for href in doc.select(&sel).filter_map(|a| a.value().attr("href")) {
        let Some(full) = crate::processor::make_url_absolute(href, ROYALROAD_BASE) else {
            continue;
        };
        if !urls.contains(&full) {
            urls.push(full);
        }
    }
    Ok(urls)
}

/// Extract metadata from fiction page HTML: JSON-LD Book first, then DOM fallback.
fn parse_metadata(html: &str) -> Result<FictionInfo, ExtractorError> {
    if let Some(script) = html.find("<script type=\"application/ld+json\">") {
        let start = script + "<script type=\"application/ld+json\">".len();
        let end = html[start..]
            .find("</script>")
            .map(|i| start + i)
            .unwrap_or(html.len());
        let json_str = html[start..end].trim();
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(json_str) {
            if v.get("@type").and_then(|t| t.as_str()) == Some("Book") {
                let title = v
                    .get("name")
                    .and_then(|n| n.as_str())
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty());
                let author = v
                    .get("author")
                    .and_then(|a| a.get("name"))
                    .and_then(|n| n.as_str())
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty());
                let description = v
                    .get("description")
                    .and_then(|d| d.as_str())
                    .map(crate::processor::strip_html)
                    .filter(|s| !s.is_empty());
                if let (Some(title), Some(author)) = (title, author) {
                    return Ok(FictionInfo {
                        title,
                        author,
                        description,
                    });
                }
            }
        }
    }

    // Fallback: DOM selectors
    let doc = Html::parse_document(html);
    let title_sel = parse_selector("h1.font-white")?;
    let author_sel = parse_selector("h4 a.font-white")?;
    let desc_sel = parse_selector(".description")?;
    let first_text = |sel: &Selector| {
        doc.select(sel)
            .next()
            .map(|e| e.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty())
    };
    let title = first_text(&title_sel);
    let author = first_text(&author_sel);
    let description = first_text(&desc_sel);

    match (title, author) {
        (Some(title), Some(author)) => Ok(FictionInfo {
            title,
            author,
            description,
        }),
        _ => Err(ExtractorError::ParseStoryPage {
            message: "missing title or author (selector or structure may have changed)".to_string(),
        }),
    }
}

/// Extract window.chapters and keep the unlocked chapters in reading order.
fn parse_toc(html: &str) -> Result<Vec<TocEntry>, ExtractorError> {
    let needle = "window.chapters = ";
    let start = html
        .find(needle)
        .ok_or_else(|| ExtractorError::ChapterListParse {
            reason: "window.chapters not found".to_string(),
        })?;
    let array_slice = extract_json_array_with_strings(&html[start + needle.len()..]).ok_or_else(
        || ExtractorError::ChapterListParse {
            reason: "could not extract window.chapters array".to_string(),
        },
    )?;
    let mut chapters: Vec<WindowChapter> =
        serde_json::from_str(array_slice).map_err(|e| ExtractorError::ChapterListParse {
            reason: e.to_string(),
        })?;
    chapters.sort_by_key(|c| c.order);

    let locked = chapters.iter().filter(|c| !c.is_unlocked).count();
    if locked > 0 {
        info!("Royal Road: skipping {} locked chapter(s)", locked);
    }

    let mut toc = Vec::with_capacity(chapters.len());
    for ch in chapters.into_iter().filter(|c| c.is_unlocked) {
        let url = crate::processor::make_url_absolute(&ch.url, ROYALROAD_BASE).ok_or_else(|| {
            ExtractorError::ChapterListParse {
                reason: format!("bad chapter url {:?}", ch.url),
            }
        })?;
        toc.push(TocEntry {
            url,
            title: ch.title.trim().to_string(),
            date: ch.date.as_deref().and_then(iso_date),
        });
    }
    if toc.is_empty() {
        return Err(ExtractorError::EmptyChapterList);
    }
    Ok(toc)
}

/// `YYYY-MM-DD` from an RFC 3339 timestamp or a bare date.
fn iso_date(s: &str) -> Option<String> {
    let s = s.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.format("%Y-%m-%d").to_string());
    }
    let head = s.get(..10)?;
    chrono::NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

/// Find the matching closing bracket for the first '[' in s, skipping content inside JSON strings.
fn extract_json_array_with_strings(s: &str) -> Option<&str> {
    let start = s.find('[')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (byte_offset, c) in s[start..].char_indices() {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            if c == '\\' {
                escape = true;
                continue;
            }
            if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + byte_offset + 1]);
                }
            }
            '"' => in_string = true,
            _ => {}
        }
    }
    None
}

/// Parse a chapter page into its title and the raw HTML of the content container.
fn parse_chapter_page(
    html: &str,
    index: u32,
    url: &str,
) -> Result<(Option<String>, String), ExtractorError> {
    let doc = Html::parse_document(html);

    let h1_sel = parse_selector("h1.font-white.break-word")?;
    let og_title_sel = parse_selector("meta[property=\"og:title\"]")?;
    let title_sel = parse_selector("title")?;
    let title = doc
        .select(&h1_sel)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            doc.select(&og_title_sel)
                .next()
                .and_then(|e| e.value().attr("content"))
                .map(|s| strip_title_site_suffix(s, TITLE_SUFFIXES))
                .filter(|s| !s.is_empty())
        })
        .or_else(|| {
            doc.select(&title_sel)
                .next()
                .and_then(|e| e.text().next())
                .map(|t| strip_title_site_suffix(t, TITLE_SUFFIXES))
                .filter(|s| !s.is_empty())
        });

    let container_sel = parse_selector("div.chapter-inner.chapter-content")?;
    let container = doc
        .select(&container_sel)
        .next()
        .ok_or_else(|| ExtractorError::ParseChapter {
            index,
            url: url.to_string(),
        })?;

    Ok((title, container.inner_html().trim().to_string()))
}

impl Extractor for RoyalRoadExtractor {
    fn name(&self) -> &'static str {
        "Royal Road"
    }

    fn supported_hostnames(&self) -> &'static [&'static str] {
        &["royalroad.com"]
    }

    fn supports_authentication(&self) -> bool {
        true
    }

    fn authenticate(
        &mut self,
        session: &mut Session,
        prompt: &mut dyn CredentialPrompt,
    ) -> AuthenticationResult {
        let Some(credentials) = session.credentials(self.name(), prompt) else {
            return AuthenticationResult::Abandoned;
        };
        let form = [
            ("Email", credentials.username.as_str()),
            ("Password", credentials.password.as_str()),
            ("ReturnUrl", "/"),
        ];
        match self.client.post_form(LOGIN_URL, &form) {
            Ok(response) if response.status().is_success() => {
                // A rejected login renders the form again.
                if response.url().path().starts_with("/account/login") {
                    warn!("Royal Road: login rejected");
                    AuthenticationResult::Failure
                } else {
                    AuthenticationResult::Success
                }
            }
            Ok(response) => {
                warn!("Royal Road: login returned HTTP {}", response.status().as_u16());
                AuthenticationResult::Failure
            }
            Err(e) => {
                warn!("Royal Road: login failed: {}", e);
                AuthenticationResult::Failure
            }
        }
    }

    fn initialize(&mut self, url: &str) -> bool {
        if !hostname_supported(url, self.supported_hostnames()) {
            return false;
        }
        match normalize_story_url(url) {
            Ok(story_url) => {
                self.story_url = Some(story_url);
                self.toc = None;
                true
            }
            Err(_) => false,
        }
    }

    fn scan_channel(&mut self, url: &str) -> Result<ChannelScan, ExtractorError> {
        let Some(id) = profile_id(url) else {
            return Ok(ChannelScan::NotApplicable);
        };
        let listing = format!("{}/profile/{}/fictions", ROYALROAD_BASE, id);
        let html = fetch_text(&self.client, &listing)?;
        Ok(ChannelScan::Stories(parse_profile_fictions(&html)?))
    }

    fn scan_story(&mut self) -> Result<Metadata, ExtractorError> {
        let story_url = self
            .story_url
            .clone()
            .ok_or(ExtractorError::NotInitialized)?;
        if !story_url.contains("/fiction/") {
            return Err(ExtractorError::ParseStoryPage {
                message: format!(
                    "{} is not a fiction page, e.g. https://www.royalroad.com/fiction/21220/mother-of-learning",
                    story_url
                ),
            });
        }

        let html = fetch_text(&self.client, &story_url)?;
        let info = parse_metadata(&html)?;
        let toc = parse_toc(&html)?;

        let mut metadata = Metadata::new(story_url);
        metadata.title = info.title;
        metadata.author = info.author;
        metadata.summary = info.description;
        metadata.chapter_count = toc.len() as u32;
        if let Some(date) = toc.first().and_then(|c| c.date.clone()) {
            metadata.date_published = date;
        }
        if let Some(date) = toc.iter().rev().find_map(|c| c.date.clone()) {
            metadata.date_updated = date;
        }

        self.toc = Some(toc);
        Ok(metadata)
    }

    fn extract_chapter(&mut self, index: u32) -> Result<Chapter, ExtractorError> {
        let toc = self.scanned_toc()?;
        let count = toc.len() as u32;
        let entry = index
            .checked_sub(1)
            .and_then(|i| toc.get(i as usize))
            .cloned()
            .ok_or(ExtractorError::ChapterOutOfRange { index, count })?;

        let html = fetch_text(&self.client, &entry.url)?;
        let (title, content) = parse_chapter_page(&html, index, &entry.url)?;
        Ok(Chapter::new(title.or(Some(entry.title)), content))
    }

    fn extract_media(&mut self, url: &str) -> Result<Vec<u8>, ExtractorError> {
        fetch_bytes(&self.client, url)
    }
}
