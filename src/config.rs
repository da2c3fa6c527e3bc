//! Optional config file loading. Search order: ./storyfetch.toml, then
//! $XDG_CONFIG_HOME/storyfetch/config.toml (or ~/.config/storyfetch/config.toml).

use crate::formats::OutputFormat;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_OUTPUT_DIR: &str = "storyfetch-downloads";
pub const DEFAULT_SKIPPED_URLS_FILE: &str = "storyfetch-skipped-urls.txt";
const LOCAL_CONFIG_FILE: &str = "storyfetch.toml";

/// Cache location when neither the CLI nor the config names one.
pub fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("storyfetch-cache")
}

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Default output directory when -o is not set. Paths are relative to CWD.
    pub output_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    /// Dump chapter content before and after normalization here.
    pub debug_dir: Option<PathBuf>,
    /// URLs that failed are written here, one per line.
    pub skipped_urls_file: Option<PathBuf>,
    /// HTTP User-Agent header.
    pub user_agent: Option<String>,
    /// Pause in seconds after each fresh request to a site (fractions allowed).
    pub request_delay_secs: Option<f64>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Number of HTTP attempts for transient failures (default 3).
    pub retry_count: Option<u32>,
    /// Delay in seconds before each retry (e.g. [1, 2, 4]).
    pub retry_backoff_secs: Option<Vec<u64>>,
    /// Longest image side in pixels after rescaling.
    pub max_image_side: Option<u32>,
    /// Download images (default true).
    pub images: Option<bool>,
    /// Keep the cache after a run instead of clearing it.
    pub persistent_cache: Option<bool>,
    /// Output formats, e.g. ["epub", "html"].
    pub formats: Option<Vec<OutputFormat>>,
    /// Join every downloaded story into one package.
    pub pack: Option<bool>,
}

/// Search order: (1) ./storyfetch.toml, (2) $XDG_CONFIG_HOME/storyfetch/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join(LOCAL_CONFIG_FILE)];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("storyfetch").join("config.toml"));
    }
    load_first(&paths)
}

/// Parse the first of `paths` that exists.
fn load_first(paths: &[PathBuf]) -> Result<Option<Config>, String> {
    match paths.iter().find(|p| p.exists()) {
        Some(path) => parse_file(path).map(Some),
        None => Ok(None),
    }
}

fn parse_file(path: &Path) -> Result<Config, String> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
    let config: Config =
        toml::from_str(&s).map_err(|e| format!("Invalid config {}: {}", path.display(), e))?;
    if config.request_delay_secs.is_some_and(|d| !d.is_finite() || d < 0.0) {
        return Err(format!(
            "Invalid config {}: request_delay_secs must be a non-negative number",
            path.display()
        ));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        let c: Config = toml::from_str("").unwrap();
        assert!(c.output_dir.is_none());
        assert!(c.cache_dir.is_none());
        assert!(c.request_delay_secs.is_none());
        assert!(c.formats.is_none());
        assert!(c.persistent_cache.is_none());
        assert!(c.pack.is_none());
    }

    #[test]
    fn parse_full_config() {
        let s = r#"
            output_dir = "out"
            cache_dir = "/tmp/sf-cache"
            debug_dir = "debug"
            skipped_urls_file = "skipped.txt"
            user_agent = "Custom/1.0"
            request_delay_secs = 1.5
            timeout_secs = 60
            retry_count = 5
            retry_backoff_secs = [1, 2, 4, 8]
            max_image_side = 640
            images = false
            persistent_cache = true
            formats = ["epub", "markdown"]
            pack = true
        "#;
        let c: Config = toml::from_str(s).unwrap();
        assert_eq!(c.output_dir.as_deref(), Some(Path::new("out")));
        assert_eq!(c.cache_dir.as_deref(), Some(Path::new("/tmp/sf-cache")));
        assert_eq!(c.debug_dir.as_deref(), Some(Path::new("debug")));
        assert_eq!(c.skipped_urls_file.as_deref(), Some(Path::new("skipped.txt")));
        assert_eq!(c.user_agent.as_deref(), Some("Custom/1.0"));
        assert_eq!(c.request_delay_secs, Some(1.5));
        assert_eq!(c.timeout_secs, Some(60));
        assert_eq!(c.retry_count, Some(5));
        assert_eq!(
            c.retry_backoff_secs.as_deref(),
            Some([1, 2, 4, 8].as_slice())
        );
        assert_eq!(c.max_image_side, Some(640));
        assert_eq!(c.images, Some(false));
        assert_eq!(c.persistent_cache, Some(true));
        assert_eq!(
            c.formats,
            Some(vec![OutputFormat::Epub, OutputFormat::Markdown])
        );
        assert_eq!(c.pack, Some(true));
    }

    #[test]
    fn invalid_toml_errors() {
        assert!(toml::from_str::<Config>("output_dir = [").is_err());
        assert!(toml::from_str::<Config>(r#"formats = ["pdf"]"#).is_err());
    }

    #[test]
    fn first_existing_file_wins() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let local = dir.path().join("storyfetch.toml");
        let global = dir.path().join("config.toml");
        std::fs::write(&global, "timeout_secs = 9")?;

        let paths = vec![local.clone(), global.clone()];
        assert_eq!(load_first(&paths)?.and_then(|c| c.timeout_secs), Some(9));

        std::fs::write(&local, "timeout_secs = 3")?;
        assert_eq!(load_first(&paths)?.and_then(|c| c.timeout_secs), Some(3));

        assert!(load_first(&[dir.path().join("missing.toml")])?.is_none());
        Ok(())
    }

    #[test]
    fn negative_delay_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("storyfetch.toml");
        std::fs::write(&path, "request_delay_secs = -1.0")?;
        let err = load_first(&[path]).err().unwrap_or_default();
        assert!(err.contains("request_delay_secs"));
        Ok(())
    }
}
