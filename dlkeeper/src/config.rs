//! Configuration.
//!
//! [`ManagerConfig`] is what the manager consumes. [`ConfigFile`] loads the
//! user-facing INI file and turns it into a `ManagerConfig` plus the settings
//! only the embedding application needs (history file, classifier lists,
//! log directory).
//!
//! ```ini
//! [downloads]
//! directory = /home/me/Downloads
//! prompt = false
//! managed = false
//! auto_open = pdf, txt
//!
//! [paths]
//! documents = /home/me/Documents
//!
//! [gallery]
//! download_prefix = https://clients2.googleusercontent.com/crx/download/
//! referrer_prefix = https://chrome.google.com/webstore
//!
//! [classifier]
//! blocked_hosts = malware.test, evil.example
//! blocked_hashes =
//!
//! [history]
//! file = /home/me/.local/share/dlkeeper/history.json
//!
//! [logging]
//! directory = /home/me/.local/share/dlkeeper/logs
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

/// Default gallery download URL prefix.
pub const DEFAULT_GALLERY_DOWNLOAD_PREFIX: &str =
    "https://clients2.googleusercontent.com/crx/download/";

/// Default gallery referrer prefix.
pub const DEFAULT_GALLERY_REFERRER_PREFIX: &str = "https://chrome.google.com/webstore";

/// Name of the application directory under the platform data/config dirs.
pub const APP_DIR_NAME: &str = "dlkeeper";

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Platform download directory.
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| home_dir().join("Downloads"))
}

/// Platform documents directory.
pub fn default_documents_dir() -> PathBuf {
    dirs::document_dir().unwrap_or_else(home_dir)
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| home_dir().join(".local").join("share"))
        .join(APP_DIR_NAME)
}

// =============================================================================
// Manager configuration
// =============================================================================

/// Download preferences, frozen when a resolution starts.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadPrefs {
    /// Default save directory.
    pub download_dir: PathBuf,
    /// Always ask where to save.
    pub prompt_for_download: bool,
    /// The directory is enforced by policy; never prompt.
    pub download_dir_managed: bool,
    /// Extensions (lower-case, no dot) the user wants opened automatically.
    pub auto_open_extensions: Vec<String>,
}

impl Default for DownloadPrefs {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            prompt_for_download: false,
            download_dir_managed: false,
            auto_open_extensions: Vec::new(),
        }
    }
}

impl DownloadPrefs {
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn with_prompt_for_download(mut self, prompt: bool) -> Self {
        self.prompt_for_download = prompt;
        self
    }

    pub fn with_managed_download_dir(mut self, managed: bool) -> Self {
        self.download_dir_managed = managed;
        self
    }

    pub fn with_auto_open(mut self, extension: impl Into<String>) -> Self {
        let ext = extension.into().trim_start_matches('.').to_ascii_lowercase();
        if !ext.is_empty() && !self.auto_open_extensions.contains(&ext) {
            self.auto_open_extensions.push(ext);
        }
        self
    }
}

/// Where trusted extension installs come from.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryConfig {
    pub download_prefix: String,
    pub referrer_prefix: String,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            download_prefix: DEFAULT_GALLERY_DOWNLOAD_PREFIX.to_string(),
            referrer_prefix: DEFAULT_GALLERY_REFERRER_PREFIX.to_string(),
        }
    }
}

impl GalleryConfig {
    /// True if the download URL and its referrer both point at the gallery.
    pub fn is_download_from_gallery(&self, url: &str, referrer_url: &str) -> bool {
        !self.download_prefix.is_empty()
            && url.starts_with(&self.download_prefix)
            && referrer_url.starts_with(&self.referrer_prefix)
    }
}

/// Everything the manager needs besides its collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    pub prefs: DownloadPrefs,
    /// Fallback directory when the chosen one is not writable.
    pub documents_dir: PathBuf,
    pub gallery: GalleryConfig,
    /// Private browsing: nothing is written to the history store.
    pub off_the_record: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            prefs: DownloadPrefs::default(),
            documents_dir: default_documents_dir(),
            gallery: GalleryConfig::default(),
            off_the_record: false,
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefs(mut self, prefs: DownloadPrefs) -> Self {
        self.prefs = prefs;
        self
    }

    pub fn with_documents_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.documents_dir = dir.into();
        self
    }

    pub fn with_gallery(mut self, gallery: GalleryConfig) -> Self {
        self.gallery = gallery;
        self
    }

    pub fn off_the_record(mut self) -> Self {
        self.off_the_record = true;
        self
    }
}

// =============================================================================
// Config file
// =============================================================================

/// Errors loading the INI configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse config file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid value {value:?} for [{section}] {key}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
    },
}

/// Block lists for [`crate::gateway::ListClassifier`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifierConfig {
    pub blocked_hosts: Vec<String>,
    pub blocked_hashes: Vec<String>,
}

/// Parsed configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub prefs: DownloadPrefs,
    pub documents_dir: PathBuf,
    pub gallery: GalleryConfig,
    pub classifier: ClassifierConfig,
    pub history_file: PathBuf,
    /// Daily log files are written here when set.
    pub log_dir: Option<PathBuf>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            prefs: DownloadPrefs::default(),
            documents_dir: default_documents_dir(),
            gallery: GalleryConfig::default(),
            classifier: ClassifierConfig::default(),
            history_file: default_data_dir().join("history.json"),
            log_dir: None,
        }
    }
}

impl ConfigFile {
    /// `<config dir>/dlkeeper/config.ini`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| home_dir().join(".config"))
            .join(APP_DIR_NAME)
            .join("config.ini")
    }

    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content, path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Parse INI text; `origin` is only used in error messages.
    pub fn parse(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut config = Self::default();
        let get = |section: &str, key: &str| {
            ini.section(Some(section))
                .and_then(|props| props.get(key))
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        if let Some(dir) = get("downloads", "directory") {
            config.prefs.download_dir = expand_home(dir);
        }
        if let Some(value) = get("downloads", "prompt") {
            config.prefs.prompt_for_download = parse_bool("downloads", "prompt", value)?;
        }
        if let Some(value) = get("downloads", "managed") {
            config.prefs.download_dir_managed = parse_bool("downloads", "managed", value)?;
        }
        if let Some(value) = get("downloads", "auto_open") {
            config.prefs = parse_list(value)
                .into_iter()
                .fold(config.prefs, DownloadPrefs::with_auto_open);
        }
        if let Some(dir) = get("paths", "documents") {
            config.documents_dir = expand_home(dir);
        }
        if let Some(prefix) = get("gallery", "download_prefix") {
            config.gallery.download_prefix = prefix.to_string();
        }
        if let Some(prefix) = get("gallery", "referrer_prefix") {
            config.gallery.referrer_prefix = prefix.to_string();
        }
        if let Some(value) = get("classifier", "blocked_hosts") {
            config.classifier.blocked_hosts = parse_list(value);
        }
        if let Some(value) = get("classifier", "blocked_hashes") {
            config.classifier.blocked_hashes = parse_list(value);
        }
        if let Some(file) = get("history", "file") {
            config.history_file = expand_home(file);
        }
        if let Some(dir) = get("logging", "directory") {
            config.log_dir = Some(expand_home(dir));
        }

        Ok(config)
    }

    /// The manager-facing part of this configuration.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            prefs: self.prefs.clone(),
            documents_dir: self.documents_dir.clone(),
            gallery: self.gallery.clone(),
            off_the_record: false,
        }
    }
}

fn parse_bool(section: &'static str, key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            section,
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn expand_home(value: &str) -> PathBuf {
    match value.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None if value == "~" => home_dir(),
        None => PathBuf::from(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let config = ConfigFile::load(&temp.path().join("absent.ini")).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_parse_all_sections() {
        let content = "\
[downloads]
directory = /srv/dl
prompt = yes
managed = false
auto_open = PDF, .txt

[paths]
documents = /srv/docs

[gallery]
download_prefix = https://gallery.test/dl/
referrer_prefix = https://gallery.test/

[classifier]
blocked_hosts = evil.test, bad.test
blocked_hashes = abc123

[history]
file = /srv/state/history.json

[logging]
directory = /srv/logs
";
        let config = ConfigFile::parse(content, Path::new("test.ini")).unwrap();

        assert_eq!(config.prefs.download_dir, PathBuf::from("/srv/dl"));
        assert!(config.prefs.prompt_for_download);
        assert!(!config.prefs.download_dir_managed);
        assert_eq!(config.prefs.auto_open_extensions, vec!["pdf", "txt"]);
        assert_eq!(config.documents_dir, PathBuf::from("/srv/docs"));
        assert!(config
            .gallery
            .is_download_from_gallery("https://gallery.test/dl/x.crx", "https://gallery.test/item"));
        assert_eq!(config.classifier.blocked_hosts, vec!["evil.test", "bad.test"]);
        assert_eq!(config.classifier.blocked_hashes, vec!["abc123"]);
        assert_eq!(config.history_file, PathBuf::from("/srv/state/history.json"));
        assert_eq!(config.log_dir, Some(PathBuf::from("/srv/logs")));
    }

    #[test]
    fn test_invalid_bool_is_reported() {
        let err = ConfigFile::parse("[downloads]\nprompt = sometimes\n", Path::new("x.ini"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "prompt", .. }));
        assert!(err.to_string().contains("sometimes"));
    }

    #[test]
    fn test_gallery_requires_both_prefixes() {
        let gallery = GalleryConfig {
            download_prefix: "https://g.test/dl/".to_string(),
            referrer_prefix: "https://g.test/".to_string(),
        };
        assert!(!gallery.is_download_from_gallery("https://g.test/dl/a.crx", "https://other.test/"));
        assert!(!gallery.is_download_from_gallery("https://other.test/a.crx", "https://g.test/"));
    }

    #[test]
    fn test_manager_config_builder() {
        let config = ManagerConfig::new()
            .with_prefs(DownloadPrefs::default().with_download_dir("/tmp/dl").with_auto_open("ZIP"))
            .with_documents_dir("/tmp/docs")
            .off_the_record();
        assert_eq!(config.prefs.download_dir, PathBuf::from("/tmp/dl"));
        assert_eq!(config.prefs.auto_open_extensions, vec!["zip"]);
        assert!(config.off_the_record);
    }
}
