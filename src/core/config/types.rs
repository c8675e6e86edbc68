use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Settings {
    pub(super) runtime: RuntimeSettings,
    pub(super) proctoring: ProctoringSettings,
    pub(super) store: StoreSettings,
    pub(super) telemetry: TelemetrySettings,
}

/// Thresholds and cadences of the integrity monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct ProctoringSettings {
    pub violation_threshold: u32,
    pub camera_poll_interval_ms: u64,
    pub dark_frame_luma: f32,
    pub dark_frame_streak: u32,
    pub camera_reacquire_attempts: u32,
    pub camera_counts_toward_threshold: bool,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub base_url: Option<String>,
    pub api_key: String,
    pub timeout_seconds: u64,
    pub tests_collection: String,
    pub responses_collection: String,
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub log_level: String,
    pub json: bool,
    pub prometheus_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub environment: Environment,
    pub strict_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Staging,
    Test,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Test => "test",
        }
    }

    pub(super) fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("missing required secret for {0}")]
    MissingSecret(&'static str),
}

impl Default for ProctoringSettings {
    fn default() -> Self {
        Self {
            violation_threshold: 3,
            camera_poll_interval_ms: 3_000,
            dark_frame_luma: 12.0,
            dark_frame_streak: 3,
            camera_reacquire_attempts: 2,
            camera_counts_toward_threshold: false,
        }
    }
}

impl ProctoringSettings {
    pub fn camera_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.camera_poll_interval_ms.max(1))
    }
}

impl StoreSettings {
    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }
}
