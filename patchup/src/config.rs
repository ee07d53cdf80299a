//! Configuration for the update client.
//!
//! Configuration is built in code with the builder methods or loaded from an
//! INI file:
//!
//! ```ini
//! [servers]
//! urls = https://mirror-a.example.com/patches/, https://mirror-b.example.com/patches/
//!
//! [paths]
//! update_dir = ./game
//!
//! [version]
//! file = config/patchup-version.txt
//! list_file = versions.txt
//! restart_on_unknown = true
//! obfuscate = false
//!
//! [http]
//! connect_timeout_ms = 3000
//! response_timeout_ms = 5000
//! retry_times = 5
//!
//! [headers]
//! X-Channel = stable
//!
//! [download]
//! threads = 4
//! block_size = 4194304
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};

use crate::error::{UpdateError, UpdateResult};

/// Default per-block attempt cap for concurrent downloads.
pub const DEFAULT_BLOCK_ATTEMPTS: u32 = 3;

/// Default block size for concurrent downloads (4 MiB).
pub const DEFAULT_BLOCK_SIZE: u64 = 4 * 1024 * 1024;

/// Default assumed length of a body without Content-Length (1 GiB).
pub const DEFAULT_FALLBACK_LENGTH: u64 = 1024 * 1024 * 1024;

/// Transport settings shared by every server endpoint.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Timeout for each read of a response.
    pub response_timeout: Duration,
    /// Request-level attempts for text fetches and whole downloads.
    pub retry_times: u32,
    /// Base delay of the request-level exponential backoff.
    pub retry_base_delay: Duration,
    /// User-Agent header; empty means the client default.
    pub user_agent: String,
    /// Extra headers sent with every request, in order.
    pub headers: Vec<(String, String)>,
    /// Skip TLS certificate verification.
    pub ignore_certificate: bool,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(3000),
            response_timeout: Duration::from_millis(5000),
            retry_times: 5,
            retry_base_delay: Duration::from_secs(1),
            user_agent: format!("patchup/{}", crate::VERSION),
            headers: Vec::new(),
            ignore_certificate: false,
        }
    }
}

/// Settings of the chunked downloader.
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    /// Maximum number of block workers per download.
    pub threads: usize,
    /// Size of each block in bytes.
    pub block_size: u64,
    /// Assumed length when the server does not declare one.
    pub fallback_length: u64,
    /// Attempts per block before it is recorded as failed.
    pub block_attempts: u32,
    /// Base delay of the per-block exponential backoff.
    pub block_retry_base_delay: Duration,
    /// Upper bound on one concurrent download.
    pub deadline: Duration,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            threads: 4,
            block_size: DEFAULT_BLOCK_SIZE,
            fallback_length: DEFAULT_FALLBACK_LENGTH,
            block_attempts: DEFAULT_BLOCK_ATTEMPTS,
            block_retry_base_delay: Duration::from_secs(1),
            deadline: Duration::from_secs(2 * 60 * 60),
        }
    }
}

/// Configuration for an update run.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Base URLs of the update servers, tried in order.
    pub servers: Vec<String>,

    /// Root of the tree that archives mutate.
    pub update_dir: PathBuf,

    /// Directory the version marker path is relative to.
    pub program_dir: PathBuf,

    /// Directory for downloaded archives.
    pub temp_dir: PathBuf,

    /// Marker file path, relative to `program_dir`.
    pub version_file: PathBuf,

    /// Version list resource, relative to each server base URL.
    pub version_list_file: String,

    /// Suffix appended to a version id to name its archive.
    pub archive_suffix: String,

    /// Schedule every version when the local marker is unknown to the server.
    pub restart_on_unknown_version: bool,

    /// Write the marker base64-encoded behind a `:` sentinel.
    pub obfuscate_marker: bool,

    /// Transport settings.
    pub http: HttpSettings,

    /// Chunked downloader settings.
    pub download: DownloadSettings,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            update_dir: PathBuf::from("."),
            program_dir: PathBuf::from("."),
            temp_dir: std::env::temp_dir().join("patchup"),
            version_file: PathBuf::from("config/patchup-version.txt"),
            version_list_file: "versions.txt".to_string(),
            archive_suffix: ".patch-archive".to_string(),
            restart_on_unknown_version: true,
            obfuscate_marker: false,
            http: HttpSettings::default(),
            download: DownloadSettings::default(),
        }
    }
}

impl UpdaterConfig {
    /// Create a new configuration updating the given directory.
    pub fn new(update_dir: PathBuf) -> Self {
        Self {
            program_dir: update_dir.clone(),
            update_dir,
            ..Default::default()
        }
    }

    /// Add a server base URL.
    pub fn with_server(mut self, url: impl Into<String>) -> Self {
        self.servers.push(url.into());
        self
    }

    /// Set the directory the marker path is relative to.
    pub fn with_program_dir(mut self, path: PathBuf) -> Self {
        self.program_dir = path;
        self
    }

    /// Set the directory for downloaded archives.
    pub fn with_temp_dir(mut self, path: PathBuf) -> Self {
        self.temp_dir = path;
        self
    }

    /// Set the marker file path.
    pub fn with_version_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.version_file = path.into();
        self
    }

    /// Allow or forbid restarting from an unrecognized marker.
    pub fn with_restart_on_unknown_version(mut self, allow: bool) -> Self {
        self.restart_on_unknown_version = allow;
        self
    }

    /// Enable or disable marker obfuscation.
    pub fn with_obfuscate_marker(mut self, obfuscate: bool) -> Self {
        self.obfuscate_marker = obfuscate;
        self
    }

    /// Replace the transport settings.
    pub fn with_http(mut self, http: HttpSettings) -> Self {
        self.http = http;
        self
    }

    /// Replace the downloader settings.
    pub fn with_download(mut self, download: DownloadSettings) -> Self {
        self.download = download;
        self
    }

    /// Absolute location of the marker file.
    pub fn marker_path(&self) -> PathBuf {
        self.program_dir.join(&self.version_file)
    }

    /// Check the configuration for values the client cannot work with.
    pub fn validate(&self) -> UpdateResult<()> {
        if self.servers.is_empty() {
            return Err(UpdateError::Config("no servers configured".to_string()));
        }
        if self.download.block_size == 0 {
            return Err(UpdateError::Config(
                "download.block_size must be greater than zero".to_string(),
            ));
        }
        if self.download.threads == 0 {
            return Err(UpdateError::Config(
                "download.threads must be greater than zero".to_string(),
            ));
        }
        if self.download.block_attempts == 0 {
            return Err(UpdateError::Config(
                "download.block_attempts must be greater than zero".to_string(),
            ));
        }
        if self.version_list_file.trim().is_empty() {
            return Err(UpdateError::Config(
                "version.list_file must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from an INI file, starting from defaults.
    pub fn load(path: &Path) -> UpdateResult<Self> {
        let ini = Ini::load_from_file(path).map_err(|e| {
            UpdateError::Config(format!("failed to load {}: {}", path.display(), e))
        })?;
        Self::from_ini(&ini)
    }

    /// Build configuration from parsed INI contents.
    pub fn from_ini(ini: &Ini) -> UpdateResult<Self> {
        let mut config = Self::default();

        if let Some(section) = ini.section(Some("servers")) {
            if let Some(urls) = section.get("urls") {
                config.servers = urls
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
        }

        if let Some(section) = ini.section(Some("paths")) {
            if let Some(dir) = section.get("update_dir") {
                config.update_dir = PathBuf::from(dir);
                config.program_dir = PathBuf::from(dir);
            }
            if let Some(dir) = section.get("program_dir") {
                config.program_dir = PathBuf::from(dir);
            }
            if let Some(dir) = section.get("temp_dir") {
                config.temp_dir = PathBuf::from(dir);
            }
        }

        if let Some(section) = ini.section(Some("version")) {
            if let Some(file) = section.get("file") {
                config.version_file = PathBuf::from(file);
            }
            if let Some(list) = section.get("list_file") {
                config.version_list_file = list.to_string();
            }
            if let Some(suffix) = section.get("archive_suffix") {
                config.archive_suffix = suffix.to_string();
            }
            if let Some(v) = parse_bool(section, "version", "restart_on_unknown")? {
                config.restart_on_unknown_version = v;
            }
            if let Some(v) = parse_bool(section, "version", "obfuscate")? {
                config.obfuscate_marker = v;
            }
        }

        if let Some(section) = ini.section(Some("http")) {
            let http = &mut config.http;
            if let Some(ms) = parse_value::<u64>(section, "http", "connect_timeout_ms")? {
                http.connect_timeout = Duration::from_millis(ms);
            }
            if let Some(ms) = parse_value::<u64>(section, "http", "response_timeout_ms")? {
                http.response_timeout = Duration::from_millis(ms);
            }
            if let Some(n) = parse_value::<u32>(section, "http", "retry_times")? {
                http.retry_times = n;
            }
            if let Some(agent) = section.get("user_agent") {
                http.user_agent = agent.to_string();
            }
            if let Some(v) = parse_bool(section, "http", "ignore_certificate")? {
                http.ignore_certificate = v;
            }
        }

        if let Some(section) = ini.section(Some("headers")) {
            config.http.headers = section
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
        }

        if let Some(section) = ini.section(Some("download")) {
            let download = &mut config.download;
            if let Some(n) = parse_value::<usize>(section, "download", "threads")? {
                download.threads = n;
            }
            if let Some(n) = parse_value::<u64>(section, "download", "block_size")? {
                download.block_size = n;
            }
            if let Some(n) = parse_value::<u64>(section, "download", "fallback_length")? {
                download.fallback_length = n;
            }
            if let Some(n) = parse_value::<u32>(section, "download", "block_attempts")? {
                download.block_attempts = n;
            }
            if let Some(secs) = parse_value::<u64>(section, "download", "deadline_secs")? {
                download.deadline = Duration::from_secs(secs);
            }
        }

        Ok(config)
    }
}

/// Default location of the configuration file.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("patchup")
        .join("config.ini")
}

fn parse_value<T: FromStr>(
    section: &Properties,
    section_name: &str,
    key: &str,
) -> UpdateResult<Option<T>> {
    match section.get(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            UpdateError::Config(format!("invalid value '{}' for {}.{}", raw, section_name, key))
        }),
    }
}

fn parse_bool(section: &Properties, section_name: &str, key: &str) -> UpdateResult<Option<bool>> {
    match section.get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(None),
        Some(v) => match v.as_str() {
            "true" | "yes" | "on" | "1" => Ok(Some(true)),
            "false" | "no" | "off" | "0" => Ok(Some(false)),
            _ => Err(UpdateError::Config(format!(
                "invalid boolean '{}' for {}.{}",
                v, section_name, key
            ))),
        },
    }
}
