pub mod core;
pub mod repositories;
pub mod schemas;
pub mod services;
pub mod session;

#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};

use crate::core::{config::Settings, telemetry};
use crate::repositories::documents::DocumentStore;
use crate::schemas::test::TestDefinition;
use crate::services::gateway::{SubmissionGateway, TestSource};
use crate::session::controller::{Outcome, SessionController};
use crate::session::replay::{LocalGateway, ReplayScript, ScriptedEnvironment};

pub use crate::schemas::submission::{AnswerValue, LearnerIdentity, SubmissionRecord};
pub use crate::session::controller::{Notice, Phase, SessionEvent, SessionHandle};

#[derive(Debug, Clone)]
pub struct ReplayArgs {
    pub script: PathBuf,
    /// Test definition file; without it the test is fetched from the document store.
    pub test: Option<PathBuf>,
}

/// Replays a scripted attempt and prints the resulting submission record as JSON.
pub async fn run_replay(args: ReplayArgs) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let payload = std::fs::read_to_string(&args.script)
        .with_context(|| format!("Failed to read {}", args.script.display()))?;
    let script = ReplayScript::from_json(&payload)?;
    let store = DocumentStore::from_settings(&settings)?;

    let definition = match (&args.test, &store) {
        (Some(path), _) => {
            let payload = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let document = serde_json::from_str(&payload)
                .with_context(|| format!("Invalid JSON in {}", path.display()))?;
            TestDefinition::from_document(document)?
        }
        (None, Some(store)) => store
            .fetch_test(&script.test_id)
            .await?
            .ok_or_else(|| anyhow!("test '{}' was not found", script.test_id))?,
        (None, None) => bail!("--test is required when PROCTOR_STORE_URL is not set"),
    };

    let gateway: Arc<dyn SubmissionGateway> = match store {
        Some(store) => Arc::new(store),
        None => Arc::new(LocalGateway),
    };
    let env = Arc::new(ScriptedEnvironment::from_profile(&script.environment));
    let (controller, handle, mut notices) = SessionController::new(
        script.test_id.clone(),
        definition,
        env.clone(),
        gateway,
        settings.proctoring(),
    );

    tracing::info!(
        session_id = %controller.session_id(),
        test_id = %script.test_id,
        environment = %settings.runtime().environment.as_str(),
        steps = script.events.len(),
        "Replaying session"
    );

    let poll_seconds = settings.proctoring().camera_poll_interval_ms.div_ceil(1_000);
    let poll_seconds = u32::try_from(poll_seconds).unwrap_or(u32::MAX);
    let outcome = session::replay::replay(controller, &handle, &env, &script, poll_seconds).await?;

    while let Ok(notice) = notices.try_recv() {
        tracing::debug!(?notice, "Learner notice");
    }

    let result = match outcome {
        Outcome::Submitted(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Outcome::Failed { record, error } => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            Err(anyhow::Error::new(error).context("Submission write failed"))
        }
        Outcome::Abandoned => Err(anyhow!("session was abandoned before submission")),
    };

    if let Some(rendered) = core::metrics::render() {
        eprintln!("{rendered}");
    }

    result
}
