mod parsing;
mod settings;
mod types;

pub use types::{
    ConfigError, Environment, ProctoringSettings, RuntimeSettings, Settings, StoreSettings,
    TelemetrySettings,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[tokio::test]
    async fn load_uses_defaults() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();

        let settings = Settings::load().expect("settings");
        assert_eq!(settings.runtime().environment, Environment::Test);
        assert_eq!(settings.proctoring(), &ProctoringSettings::default());
        assert!(!settings.store().is_configured());
        assert_eq!(settings.store().tests_collection, "tests");
        assert_eq!(settings.store().responses_collection, "testResponses");
    }

    #[tokio::test]
    async fn load_rejects_zero_threshold() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("PROCTOR_VIOLATION_THRESHOLD", "0");

        let result = Settings::load();
        std::env::remove_var("PROCTOR_VIOLATION_THRESHOLD");

        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "PROCTOR_VIOLATION_THRESHOLD", .. })
        ));
    }

    #[tokio::test]
    async fn strict_config_requires_store() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("PROCTOR_STRICT_CONFIG", "1");

        let missing_url = Settings::load();

        std::env::set_var("PROCTOR_STORE_URL", "https://store.example/v1/");
        std::env::set_var("PROCTOR_STORE_API_KEY", "key");
        let configured = Settings::load();

        std::env::remove_var("PROCTOR_STRICT_CONFIG");
        std::env::remove_var("PROCTOR_STORE_URL");
        std::env::remove_var("PROCTOR_STORE_API_KEY");

        assert!(matches!(missing_url, Err(ConfigError::MissingSecret("PROCTOR_STORE_URL"))));
        let configured = configured.expect("strict settings");
        assert_eq!(configured.store().base_url.as_deref(), Some("https://store.example/v1"));
    }

    #[tokio::test]
    async fn camera_strikes_flag_is_parsed() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("PROCTOR_CAMERA_STRIKES", "yes");
        std::env::set_var("PROCTOR_DARK_FRAME_LUMA", "20");

        let settings = Settings::load();
        std::env::remove_var("PROCTOR_CAMERA_STRIKES");
        std::env::remove_var("PROCTOR_DARK_FRAME_LUMA");

        let settings = settings.expect("settings");
        assert!(settings.proctoring().camera_counts_toward_threshold);
        assert_eq!(settings.proctoring().dark_frame_luma, 20.0);
    }
}
