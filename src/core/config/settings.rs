use super::parsing::{
    env_optional, env_or_default, normalize_base_url, parse_bool, parse_environment, parse_f32,
    parse_u32, parse_u64,
};
use super::types::{
    ConfigError, ProctoringSettings, RuntimeSettings, Settings, StoreSettings, TelemetrySettings,
};

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let environment = parse_environment(
            env_optional("PROCTOR_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config =
            env_optional("PROCTOR_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let violation_threshold = parse_u32(
            "PROCTOR_VIOLATION_THRESHOLD",
            env_or_default("PROCTOR_VIOLATION_THRESHOLD", "3"),
        )?;
        let camera_poll_interval_ms =
            parse_u64("PROCTOR_CAMERA_POLL_MS", env_or_default("PROCTOR_CAMERA_POLL_MS", "3000"))?;
        let dark_frame_luma = parse_f32(
            "PROCTOR_DARK_FRAME_LUMA",
            env_or_default("PROCTOR_DARK_FRAME_LUMA", "12.0"),
        )?;
        let dark_frame_streak = parse_u32(
            "PROCTOR_DARK_FRAME_STREAK",
            env_or_default("PROCTOR_DARK_FRAME_STREAK", "3"),
        )?;
        let camera_reacquire_attempts = parse_u32(
            "PROCTOR_CAMERA_REACQUIRE_ATTEMPTS",
            env_or_default("PROCTOR_CAMERA_REACQUIRE_ATTEMPTS", "2"),
        )?;
        let camera_counts_toward_threshold =
            env_optional("PROCTOR_CAMERA_STRIKES").map(|value| parse_bool(&value)).unwrap_or(false);

        let store_base_url = normalize_base_url(env_optional("PROCTOR_STORE_URL"));
        let store_api_key = env_or_default("PROCTOR_STORE_API_KEY", "");
        let store_timeout_seconds = parse_u64(
            "PROCTOR_STORE_TIMEOUT_SECONDS",
            env_or_default("PROCTOR_STORE_TIMEOUT_SECONDS", "15"),
        )?;
        let tests_collection = env_or_default("PROCTOR_TESTS_COLLECTION", "tests");
        let responses_collection = env_or_default("PROCTOR_RESPONSES_COLLECTION", "testResponses");

        let log_level = env_or_default("PROCTOR_LOG_LEVEL", "info");
        let json = env_optional("PROCTOR_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            runtime: RuntimeSettings { environment, strict_config },
            proctoring: ProctoringSettings {
                violation_threshold,
                camera_poll_interval_ms,
                dark_frame_luma,
                dark_frame_streak,
                camera_reacquire_attempts,
                camera_counts_toward_threshold,
            },
            store: StoreSettings {
                base_url: store_base_url,
                api_key: store_api_key,
                timeout_seconds: store_timeout_seconds,
                tests_collection,
                responses_collection,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn proctoring(&self) -> &ProctoringSettings {
        &self.proctoring
    }

    pub fn store(&self) -> &StoreSettings {
        &self.store
    }

    pub fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.proctoring.violation_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "PROCTOR_VIOLATION_THRESHOLD",
                value: "0".to_string(),
            });
        }

        if self.proctoring.camera_poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "PROCTOR_CAMERA_POLL_MS",
                value: "0".to_string(),
            });
        }

        if !(0.0..=255.0).contains(&self.proctoring.dark_frame_luma) {
            return Err(ConfigError::InvalidValue {
                field: "PROCTOR_DARK_FRAME_LUMA",
                value: self.proctoring.dark_frame_luma.to_string(),
            });
        }

        if self.proctoring.dark_frame_streak == 0 {
            return Err(ConfigError::InvalidValue {
                field: "PROCTOR_DARK_FRAME_STREAK",
                value: "0".to_string(),
            });
        }

        if self.store.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "PROCTOR_STORE_TIMEOUT_SECONDS",
                value: "0".to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.store.base_url.is_none() {
            return Err(ConfigError::MissingSecret("PROCTOR_STORE_URL"));
        }
        if self.store.api_key.is_empty() {
            return Err(ConfigError::MissingSecret("PROCTOR_STORE_API_KEY"));
        }

        Ok(())
    }
}
