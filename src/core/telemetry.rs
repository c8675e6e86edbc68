use tracing_subscriber::{fmt, EnvFilter};

use crate::core::config::Settings;

/// Installs the global subscriber. Logs go to stderr so stdout stays free for records.
///
/// A host that embeds the session may already own a subscriber; that is not an error.
pub fn init_tracing(settings: &Settings) -> anyhow::Result<()> {
    let builder = fmt()
        .with_env_filter(session_filter(settings))
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_span_events(fmt::format::FmtSpan::CLOSE);

    let installed = if settings.telemetry().json {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.try_init()
    };

    if let Err(err) = installed {
        if tracing::dispatcher::has_been_set() {
            tracing::debug!("Tracing subscriber already installed by the host");
            return Ok(());
        }
        return Err(anyhow::anyhow!(err.to_string()));
    }

    Ok(())
}

fn session_filter(settings: &Settings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.telemetry().log_level.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[tokio::test]
    async fn filter_falls_back_to_configured_level() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::remove_var("RUST_LOG");
        std::env::set_var("PROCTOR_LOG_LEVEL", "proctor_session=debug");

        let settings = Settings::load();
        std::env::remove_var("PROCTOR_LOG_LEVEL");

        let filter = session_filter(&settings.expect("settings"));
        assert_eq!(filter.to_string(), "proctor_session=debug");
    }

    #[tokio::test]
    async fn second_init_is_tolerated() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();

        let settings = Settings::load().expect("settings");
        init_tracing(&settings).expect("first init");
        init_tracing(&settings).expect("second init");
    }
}
