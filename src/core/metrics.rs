use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;
use crate::schemas::submission::{SubmitTrigger, WatcherClass};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    Ok(())
}

pub fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

pub(crate) fn record_violation(class: WatcherClass) {
    metrics::counter!("proctor_violations_total", "class" => class.as_str()).increment(1);
}

pub(crate) fn record_submission(trigger: &SubmitTrigger, outcome: &'static str) {
    metrics::counter!(
        "proctor_submissions_total",
        "trigger" => trigger.label(),
        "outcome" => outcome
    )
    .increment(1);
}

pub(crate) fn record_camera_reacquire(result: &'static str) {
    metrics::counter!("proctor_camera_reacquire_total", "result" => result).increment(1);
}
