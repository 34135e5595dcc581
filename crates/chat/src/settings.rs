use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use docchat_transport::config::{DEFAULT_BATCH_PATH, DEFAULT_FEEDBACK_PATH, DEFAULT_STREAM_PATH};
use docchat_transport::{DEFAULT_TYPING_INTERVAL, TransportConfig, TransportMode};
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};

use crate::chat::scroll_manager::{DEFAULT_INITIAL_TOP_MARGIN, DEFAULT_LOAD_OLDER_THRESHOLD};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8080/api";
pub const SETTINGS_DIRECTORY_NAME: &str = "docchat";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
/// Environment variables with this prefix override the settings file.
pub const ENV_PREFIX: &str = "DOCCHAT_";

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub mode: TransportMode,
    #[serde(default = "default_stream_path")]
    pub stream_path: String,
    #[serde(default = "default_batch_path")]
    pub batch_path: String,
    #[serde(default = "default_feedback_path")]
    pub feedback_path: String,
    #[serde(default = "default_typing_interval_ms")]
    pub typing_interval_ms: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_load_older_threshold_px")]
    pub load_older_threshold_px: f32,
    #[serde(default = "default_initial_top_margin_px")]
    pub initial_top_margin_px: f32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            mode: TransportMode::default(),
            stream_path: default_stream_path(),
            batch_path: default_batch_path(),
            feedback_path: default_feedback_path(),
            typing_interval_ms: default_typing_interval_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            load_older_threshold_px: default_load_older_threshold_px(),
            initial_top_margin_px: default_initial_top_margin_px(),
        }
    }
}

impl ClientSettings {
    pub fn normalized(mut self) -> Self {
        self.endpoint = match self.endpoint.trim().trim_end_matches('/') {
            "" => default_endpoint(),
            endpoint => endpoint.to_string(),
        };
        self.stream_path = normalized_path(&self.stream_path, DEFAULT_STREAM_PATH);
        self.batch_path = normalized_path(&self.batch_path, DEFAULT_BATCH_PATH);
        self.feedback_path = normalized_path(&self.feedback_path, DEFAULT_FEEDBACK_PATH);

        // Zero timeouts fail every request.
        self.connect_timeout_secs = self.connect_timeout_secs.max(1);
        self.request_timeout_secs = self.request_timeout_secs.max(1);
        self.load_older_threshold_px = self.load_older_threshold_px.max(0.);
        self.initial_top_margin_px = self.initial_top_margin_px.max(0.);

        self
    }

    pub fn to_transport_config(&self) -> TransportConfig {
        let mut config = TransportConfig::new(self.mode, self.endpoint.as_str())
            .with_typing_interval(Duration::from_millis(self.typing_interval_ms));
        config.stream_path = self.stream_path.clone();
        config.batch_path = self.batch_path.clone();
        config.feedback_path = self.feedback_path.clone();
        config.connect_timeout = Duration::from_secs(self.connect_timeout_secs);
        config.request_timeout = Duration::from_secs(self.request_timeout_secs);
        config
    }
}

pub struct SettingsStore {
    settings: Arc<ClientSettings>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".docchat"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_sources(&config_path);
        Self {
            settings: Arc::new(settings),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ClientSettings> {
        Arc::clone(&self.settings)
    }

    fn load_from_sources(path: &Path) -> ClientSettings {
        let mut figment = Figment::from(Serialized::defaults(ClientSettings::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        } else {
            tracing::info!(path = ?path, "settings file not found, using defaults");
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX));

        match figment.extract::<ClientSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = ?path,
                    error = %error,
                    "failed to parse settings, using defaults"
                );
                ClientSettings::default()
            }
        }
    }
}

fn normalized_path(path: &str, fallback: &str) -> String {
    match path.trim() {
        "" => fallback.to_string(),
        path if path.starts_with('/') => path.to_string(),
        path => format!("/{path}"),
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_stream_path() -> String {
    DEFAULT_STREAM_PATH.to_string()
}

fn default_batch_path() -> String {
    DEFAULT_BATCH_PATH.to_string()
}

fn default_feedback_path() -> String {
    DEFAULT_FEEDBACK_PATH.to_string()
}

fn default_typing_interval_ms() -> u64 {
    DEFAULT_TYPING_INTERVAL.as_millis() as u64
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_load_older_threshold_px() -> f32 {
    DEFAULT_LOAD_OLDER_THRESHOLD
}

fn default_initial_top_margin_px() -> f32 {
    DEFAULT_INITIAL_TOP_MARGIN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let directory = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(directory.path().join(SETTINGS_FILE_NAME));

        assert_eq!(*store.settings(), ClientSettings::default());
        assert_eq!(store.settings().typing_interval_ms, 60);
    }

    #[test]
    fn partial_file_is_merged_over_defaults() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join(SETTINGS_FILE_NAME);
        std::fs::write(
            &path,
            r#"{ "mode": "batch", "endpoint": " https://chat.example.com/api/ ", "typing_interval_ms": 25 }"#,
        )
        .unwrap();

        let settings = SettingsStore::new(path).settings();
        assert_eq!(settings.mode, TransportMode::Batch);
        assert_eq!(settings.endpoint, "https://chat.example.com/api");
        assert_eq!(settings.typing_interval_ms, 25);
        assert_eq!(settings.stream_path, DEFAULT_STREAM_PATH);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();

        assert_eq!(*SettingsStore::new(path).settings(), ClientSettings::default());
    }

    #[test]
    fn normalization_restores_unusable_values() {
        let settings = ClientSettings {
            endpoint: "   ".to_string(),
            stream_path: String::new(),
            connect_timeout_secs: 0,
            load_older_threshold_px: -5.,
            ..ClientSettings::default()
        }
        .normalized();

        assert_eq!(settings.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(settings.stream_path, DEFAULT_STREAM_PATH);
        assert_eq!(settings.connect_timeout_secs, 1);
        assert_eq!(settings.load_older_threshold_px, 0.);
    }

    #[test]
    fn transport_config_carries_every_field() {
        let settings = ClientSettings {
            endpoint: "https://chat.example.com".to_string(),
            mode: TransportMode::Batch,
            feedback_path: "/rate".to_string(),
            typing_interval_ms: 15,
            request_timeout_secs: 30,
            ..ClientSettings::default()
        };

        let config = settings.to_transport_config();
        assert_eq!(config.mode, TransportMode::Batch);
        assert_eq!(config.typing_interval, Duration::from_millis(15));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.feedback_url(), "https://chat.example.com/rate");
        assert_eq!(config.batch_url(), "https://chat.example.com/chat");
    }
}
