//! HTTP client for the document assistant backend

use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    stream::ByteChunkStream,
};

/// Backend operation the request is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    /// Answer a question about an indexed document
    Query,
    /// Summarize a whole document
    Summarize,
}

impl Endpoint {
    /// Request path relative to the backend base URL
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Query => "/api/query",
            Endpoint::Summarize => "/api/summarize",
        }
    }
}

/// Per-request configuration supplied by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Key forwarded to the backend's language model provider
    pub api_key: String,
    /// The reader's field of study, used to tailor answers
    pub user_profile: Option<String>,
}

impl Credentials {
    /// Create credentials with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            user_profile: None,
        }
    }

    /// Set the user profile
    pub fn with_user_profile(mut self, profile: impl Into<String>) -> Self {
        self.user_profile = Some(profile.into());
        self
    }
}

/// JSON body sent to the backend
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRequest {
    #[serde(skip)]
    pub endpoint: Endpoint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    pub open_ai_key: String,
    #[serde(rename = "userMajor", skip_serializing_if = "Option::is_none")]
    pub user_profile: Option<String>,
}

impl ExchangeRequest {
    /// Ask a question against a document index
    pub fn query(question: impl Into<String>, index: impl Into<String>, credentials: &Credentials) -> Self {
        Self {
            endpoint: Endpoint::Query,
            query: Some(question.into()),
            file: None,
            index: Some(index.into()),
            open_ai_key: credentials.api_key.clone(),
            user_profile: credentials.user_profile.clone(),
        }
    }

    /// Summarize an uploaded document
    pub fn summarize(file: impl Into<String>, credentials: &Credentials) -> Self {
        Self {
            endpoint: Endpoint::Summarize,
            query: None,
            file: Some(file.into()),
            index: None,
            open_ai_key: credentials.api_key.clone(),
            user_profile: None,
        }
    }
}

/// Backend HTTP client
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    /// Create a client for a backend base URL (e.g. `http://localhost:5000`)
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::InvalidConfig("backend URL is empty".into()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }

    /// The configured base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for an endpoint
    pub fn url_for(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url, endpoint.path())
    }

    /// Send the request and return the response body as a chunk stream
    pub async fn open(&self, request: &ExchangeRequest) -> Result<ByteChunkStream> {
        let url = self.url_for(request.endpoint);
        tracing::debug!("POST {}", url);

        let response = self.client.post(&url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), text));
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::Transport(e.to_string())));
        Ok(Box::pin(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_body_shape() {
        let creds = Credentials::new("sk-test").with_user_profile("Linguistics");
        let req = ExchangeRequest::query("What is a morpheme?", "syntax-notes", &creds);
        let body = serde_json::to_value(&req).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "query": "What is a morpheme?",
                "index": "syntax-notes",
                "openAiKey": "sk-test",
                "userMajor": "Linguistics",
            })
        );
    }

    #[test]
    fn test_summarize_body_shape() {
        let creds = Credentials::new("sk-test").with_user_profile("Biology");
        let req = ExchangeRequest::summarize("paper.pdf", &creds);
        assert_eq!(req.endpoint, Endpoint::Summarize);
        let body = serde_json::to_value(&req).unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "file": "paper.pdf", "openAiKey": "sk-test" })
        );
    }

    #[test]
    fn test_url_for_trims_trailing_slash() {
        let client = BackendClient::new("http://localhost:5000/").unwrap();
        assert_eq!(client.url_for(Endpoint::Query), "http://localhost:5000/api/query");
        assert_eq!(client.url_for(Endpoint::Summarize), "http://localhost:5000/api/summarize");
    }

    #[test]
    fn test_empty_base_url_rejected() {
        assert!(matches!(BackendClient::new(""), Err(Error::InvalidConfig(_))));
    }
}
