use async_trait::async_trait;
use thiserror::Error;

use crate::schemas::submission::SubmissionRecord;
use crate::schemas::test::{DefinitionError, TestDefinition};

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error("document store request failed: {0}")]
    Transport(String),
    #[error("document store rejected the request (status {status}): {detail}")]
    Rejected { status: u16, detail: String },
}

/// Read side of the document store: test definitions by identifier.
#[async_trait]
pub trait TestSource: Send + Sync {
    async fn fetch_test(&self, test_id: &str) -> Result<Option<TestDefinition>, GatewayError>;
}

/// Append-only sink for finished sessions. Called at most once per session.
#[async_trait]
pub trait SubmissionGateway: Send + Sync {
    async fn append(&self, record: &SubmissionRecord) -> Result<(), GatewayError>;
}
