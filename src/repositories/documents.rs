use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde_json::Value;

use crate::core::config::Settings;
use crate::schemas::submission::SubmissionRecord;
use crate::schemas::test::TestDefinition;
use crate::services::gateway::{GatewayError, SubmissionGateway, TestSource};

/// REST client for the document store holding tests and test responses.
///
/// Documents live at `{base_url}/{collection}/{id}`. Writes use `If-None-Match: *` so a
/// response document can only ever be created, never overwritten.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    client: Client,
    base_url: String,
    api_key: String,
    tests_collection: String,
    responses_collection: String,
}

impl DocumentStore {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Option<Self>> {
        let store = settings.store();
        let Some(base_url) = store.base_url.clone() else {
            return Ok(None);
        };

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(store.timeout_seconds))
            .build()
            .context("Failed to build document store HTTP client")?;

        Ok(Some(Self {
            client,
            base_url,
            api_key: store.api_key.clone(),
            tests_collection: store.tests_collection.clone(),
            responses_collection: store.responses_collection.clone(),
        }))
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, collection, id.trim_matches('/'))
    }

    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, GatewayError> {
        let url = self.document_url(collection, id);
        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| GatewayError::Transport(format!("invalid JSON from {url}: {err}")))?;

        if !status.is_success() {
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                detail: extract_error_message(&body),
            });
        }

        Ok(Some(body))
    }

    pub async fn create(
        &self,
        collection: &str,
        id: &str,
        document: &Value,
    ) -> Result<(), GatewayError> {
        let url = self.document_url(collection, id);
        let response = self
            .client
            .put(&url)
            .header("X-Api-Key", &self.api_key)
            .header(header::IF_NONE_MATCH, "*")
            .json(document)
            .send()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        Err(GatewayError::Rejected { status: status.as_u16(), detail: extract_error_message(&body) })
    }
}

#[async_trait]
impl TestSource for DocumentStore {
    async fn fetch_test(&self, test_id: &str) -> Result<Option<TestDefinition>, GatewayError> {
        let Some(document) = self.get(&self.tests_collection, test_id).await? else {
            tracing::warn!(test_id, "Test document not found");
            return Ok(None);
        };

        Ok(Some(TestDefinition::from_document(document)?))
    }
}

#[async_trait]
impl SubmissionGateway for DocumentStore {
    async fn append(&self, record: &SubmissionRecord) -> Result<(), GatewayError> {
        let document = serde_json::to_value(record)
            .map_err(|err| GatewayError::Transport(format!("failed to encode record: {err}")))?;
        let id = record.session_id.to_string();

        self.create(&self.responses_collection, &id, &document).await?;
        tracing::info!(
            session_id = %record.session_id,
            test_id = %record.test_id,
            collection = %self.responses_collection,
            "Submission record stored"
        );
        Ok(())
    }
}

fn extract_error_message(payload: &Value) -> String {
    if let Some(detail) = payload.get("detail") {
        if let Some(text) = detail.as_str() {
            return text.to_string();
        }
        if let Some(items) = detail.as_array() {
            let joined = items
                .iter()
                .filter_map(|item| {
                    item.get("msg")
                        .and_then(Value::as_str)
                        .or_else(|| item.get("message").and_then(Value::as_str))
                })
                .collect::<Vec<_>>()
                .join("; ");
            if !joined.is_empty() {
                return joined;
            }
        }
    }

    payload
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| payload.get("error").and_then(Value::as_str))
        .unwrap_or("unknown_error")
        .to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_support;

    #[tokio::test]
    async fn from_settings_is_disabled_without_url() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();

        let settings = Settings::load().expect("settings");
        assert!(DocumentStore::from_settings(&settings).expect("store").is_none());
    }

    #[tokio::test]
    async fn document_urls_follow_collection_layout() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("PROCTOR_STORE_URL", "https://store.example/v1/");
        std::env::set_var("PROCTOR_RESPONSES_COLLECTION", "responses");

        let settings = Settings::load();
        std::env::remove_var("PROCTOR_STORE_URL");
        std::env::remove_var("PROCTOR_RESPONSES_COLLECTION");

        let store = DocumentStore::from_settings(&settings.expect("settings"))
            .expect("store")
            .expect("store enabled");
        assert_eq!(
            store.document_url(&store.tests_collection, "/abc-123"),
            "https://store.example/v1/tests/abc-123"
        );
        assert_eq!(
            store.document_url(&store.responses_collection, "s-1"),
            "https://store.example/v1/responses/s-1"
        );
    }

    #[test]
    fn extract_error_message_prefers_detail() {
        assert_eq!(extract_error_message(&json!({"detail": "already exists"})), "already exists");
        assert_eq!(
            extract_error_message(&json!({"detail": [{"msg": "a"}, {"message": "b"}]})),
            "a; b"
        );
        assert_eq!(extract_error_message(&json!({"error": "quota"})), "quota");
        assert_eq!(extract_error_message(&Value::Null), "unknown_error");
    }
}
