//! HTTP client for a LightRAG-style semantic retrieval service.
//!
//! Two independently configured instances are used: one over the novel's
//! narrative memory and one over the technique library.

use crate::config::RetrievalConfig;
use crate::provider::{IndexHealth, ProviderError, RetrievalIndex};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct HttpRetrievalIndex {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpRetrievalIndex {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Build the narrative and technique indexes from configuration.
    ///
    /// Either may be absent; the engine treats a missing index like a failed
    /// one and simply skips that enrichment.
    pub fn from_config(
        config: &RetrievalConfig,
    ) -> (Option<Arc<dyn RetrievalIndex>>, Option<Arc<dyn RetrievalIndex>>) {
        let build = |url: &Option<String>| -> Option<Arc<dyn RetrievalIndex>> {
            url.as_ref().map(|u| {
                Arc::new(HttpRetrievalIndex::new(u.clone()).with_api_key(config.api_key.clone()))
                    as Arc<dyn RetrievalIndex>
            })
        };
        (build(&config.narrative_url), build(&config.technique_url))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.header("X-API-Key", key),
            None => builder,
        }
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ProviderError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Request(format!("status {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct UploadBody<'a> {
    text: &'a str,
    file_source: &'a str,
}

#[derive(Debug, Deserialize)]
struct UploadReply {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    track_id: Option<String>,
    #[serde(default)]
    doc_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl UploadReply {
    /// First non-empty identifier, whichever name the service used.
    fn document_id(self) -> Option<String> {
        [self.id, self.track_id, self.doc_id]
            .into_iter()
            .flatten()
            .find(|id| !id.is_empty())
    }
}

#[derive(Debug, Serialize)]
struct QueryBody<'a> {
    query: &'a str,
    mode: &'a str,
}

#[derive(Debug, Deserialize)]
struct QueryReply {
    response: String,
}

#[derive(Debug, Deserialize)]
struct HealthReply {
    status: String,
}

#[async_trait]
impl RetrievalIndex for HttpRetrievalIndex {
    async fn upload(&self, content: &str, description: &str) -> Result<String, ProviderError> {
        let body = UploadBody {
            text: content,
            file_source: description,
        };
        let reply: UploadReply = self
            .send_json(self.request(reqwest::Method::POST, "/documents/text").json(&body))
            .await?;

        if reply.status.as_deref() == Some("failure") {
            return Err(ProviderError::InvalidResponse(
                reply.message.unwrap_or_else(|| "upload rejected".to_string()),
            ));
        }
        reply
            .document_id()
            .ok_or_else(|| ProviderError::InvalidResponse("upload reply carried no id".to_string()))
    }

    async fn query(&self, text: &str, mode: &str) -> Result<String, ProviderError> {
        let body = QueryBody { query: text, mode };
        let reply: QueryReply = self
            .send_json(self.request(reqwest::Method::POST, "/query").json(&body))
            .await?;
        Ok(reply.response)
    }

    async fn health(&self) -> Result<IndexHealth, ProviderError> {
        let reply: HealthReply = self
            .send_json(self.request(reqwest::Method::GET, "/health"))
            .await?;
        Ok(IndexHealth {
            healthy: reply.status.eq_ignore_ascii_case("healthy"),
            detail: reply.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_reply_accepts_track_id() {
        let reply: UploadReply =
            serde_json::from_str(r#"{"status":"success","track_id":"insert_1"}"#).unwrap();
        assert_eq!(reply.document_id().as_deref(), Some("insert_1"));
    }

    #[test]
    fn test_upload_reply_with_several_ids_prefers_id() {
        let reply: UploadReply = serde_json::from_str(
            r#"{"status":"success","id":"doc-9","track_id":"insert_1","doc_id":"d9"}"#,
        )
        .unwrap();
        assert_eq!(reply.document_id().as_deref(), Some("doc-9"));

        let reply: UploadReply =
            serde_json::from_str(r#"{"id":"","track_id":"insert_2"}"#).unwrap();
        assert_eq!(reply.document_id().as_deref(), Some("insert_2"));

        let reply: UploadReply = serde_json::from_str(r#"{"status":"success"}"#).unwrap();
        assert_eq!(reply.document_id(), None);
    }

    #[test]
    fn test_from_config_builds_only_configured_indexes() {
        let config = RetrievalConfig {
            narrative_url: Some("http://localhost:9621/".into()),
            ..Default::default()
        };
        let (narrative, technique) = HttpRetrievalIndex::from_config(&config);
        assert!(narrative.is_some());
        assert!(technique.is_none());
    }

    #[test]
    fn test_base_url_is_normalized() {
        let index = HttpRetrievalIndex::new("http://localhost:9621/");
        assert_eq!(index.base_url, "http://localhost:9621");
    }
}
