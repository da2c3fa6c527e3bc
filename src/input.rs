//! Expansion of command-line inputs (story URLs, channel URLs, URL list files) into story URLs.

use crate::extractor::{ChannelScan, ExtractorSource};
use rand::seq::SliceRandom;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Channels may list other channels (a URL list naming an author page); stop after this many
/// rounds.
const MAX_EXPANSION_ROUNDS: usize = 4;

/// Expand every input through its extractor's channel scan until nothing expands any more.
///
/// Inputs no extractor accepts are kept as they are so that the caller reports them as skipped.
/// The result has no duplicates and keeps first-occurrence order.
pub fn expand_inputs(inputs: &[String], source: &dyn ExtractorSource) -> Vec<String> {
    let mut urls = dedup(inputs.iter().map(|s| s.trim().to_string()));
    let mut expanded: HashSet<String> = HashSet::new();

    for round in 1..=MAX_EXPANSION_ROUNDS {
        let mut changed = false;
        let mut next = Vec::with_capacity(urls.len());
        for url in urls {
            if expanded.contains(&url) {
                continue;
            }
            match expand_one(&url, source) {
                Some(stories) => {
                    debug!("{} expanded into {} URL(s)", url, stories.len());
                    expanded.insert(url);
                    next.extend(stories);
                    changed = true;
                }
                None => next.push(url),
            }
        }
        urls = dedup(next.into_iter());
        if !changed {
            break;
        }
        if round == MAX_EXPANSION_ROUNDS {
            warn!("Stopped expanding inputs after {} rounds", round);
        }
    }
    urls
}

/// Story URLs listed by `url`, or `None` when it is not a channel (or cannot be read as one).
fn expand_one(url: &str, source: &dyn ExtractorSource) -> Option<Vec<String>> {
    let mut extractor = source.resolve(url)?;
    match extractor.scan_channel(url) {
        Ok(ChannelScan::Stories(stories)) => Some(stories),
        Ok(ChannelScan::NotApplicable) => None,
        Err(e) => {
            warn!("Cannot expand {}: {}", url, e);
            None
        }
    }
}

/// Put story URLs in random order.
pub fn shuffle(urls: &mut [String]) {
    urls.shuffle(&mut rand::thread_rng());
}

fn dedup(urls: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.filter(|u| !u.is_empty() && seen.insert(u.clone()))
        .collect()
}
