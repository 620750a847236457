//! REST adapters for the application's backend.
//!
//! One [`HttpBackend`] implements every text-level service: chat, analysis,
//! correction, session history and knowledge storage. Speech capture and
//! synthesis stay on the device and are not covered here.

use super::{
    AnalysisResult, AnalysisService, ChatReply, ChatRequest, ChatService, CorrectionService,
    KnowledgeStore, SessionStore,
};
use crate::config::ServiceConfig;
use crate::error::{EngineError, Result};
use crate::registration::{Article, NewArticle};
use crate::session::{SessionId, Turn};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct CorrectionResponse {
    corrected: String,
}

/// Client for the backend REST API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpBackend {
    /// Build a client from the service configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_token: config.api_token.clone().filter(|t| !t.is_empty()),
        })
    }

    /// Base URL all paths are resolved against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        debug!("{method} {url}");
        let builder = self.client.request(method, url);
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = builder.send().await?.error_for_status()?;
        Ok(response.json::<T>().await?)
    }

    async fn send_empty(&self, builder: RequestBuilder) -> Result<()> {
        builder.send().await?.error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl ChatService for HttpBackend {
    async fn chat(&self, request: ChatRequest) -> Result<ChatReply> {
        let body = json!({
            "message": request.message,
            "history": request.history,
            "sessionId": request.session_id,
            "hint": request.hint,
        });
        self.send(self.request(Method::POST, "/api/chat").json(&body))
            .await
            .map_err(|e| EngineError::Chat(e.to_string()))
    }
}

#[async_trait]
impl AnalysisService for HttpBackend {
    async fn analyze(&self, turns: &[Turn]) -> Result<AnalysisResult> {
        let body = json!({ "messages": turns });
        self.send(self.request(Method::POST, "/api/chat/analyze").json(&body))
            .await
            .map_err(|e| EngineError::Analysis(e.to_string()))
    }
}

#[async_trait]
impl CorrectionService for HttpBackend {
    async fn correct(&self, text: &str) -> Result<String> {
        let body = json!({ "text": text });
        let response: CorrectionResponse = self
            .send(self.request(Method::POST, "/api/speech/correct").json(&body))
            .await
            .map_err(|e| EngineError::Correction(e.to_string()))?;
        Ok(response.corrected)
    }
}

#[async_trait]
impl SessionStore for HttpBackend {
    async fn create_session(&self, mode: &str) -> Result<SessionId> {
        let body = json!({ "mode": mode });
        let response: IdResponse = self
            .send(self.request(Method::POST, "/api/chat-sessions").json(&body))
            .await
            .map_err(|e| EngineError::Session(e.to_string()))?;
        Ok(response.id)
    }

    async fn append_messages(&self, id: &str, turns: &[Turn]) -> Result<()> {
        let body = json!({ "messages": turns });
        self.send_empty(
            self.request(Method::POST, &format!("/api/chat-sessions/{id}/messages"))
                .json(&body),
        )
        .await
        .map_err(|e| EngineError::Session(e.to_string()))
    }

    async fn complete_session(&self, id: &str) -> Result<()> {
        self.send_empty(self.request(Method::POST, &format!("/api/chat-sessions/{id}/complete")))
            .await
            .map_err(|e| EngineError::Session(e.to_string()))
    }

    async fn delete_session(&self, id: &str) -> Result<()> {
        self.send_empty(self.request(Method::DELETE, &format!("/api/chat-sessions/{id}")))
            .await
            .map_err(|e| EngineError::Session(e.to_string()))
    }
}

#[async_trait]
impl KnowledgeStore for HttpBackend {
    async fn create(&self, article: &NewArticle) -> Result<String> {
        let response: IdResponse = self
            .send(self.request(Method::POST, "/api/knowledge").json(article))
            .await
            .map_err(|e| EngineError::Knowledge(e.to_string()))?;
        Ok(response.id)
    }

    async fn get(&self, id: &str) -> Result<Article> {
        self.send(self.request(Method::GET, &format!("/api/knowledge/{id}")))
            .await
            .map_err(|e| EngineError::Knowledge(e.to_string()))
    }

    // Every read goes to the server; there is no local cache to drop.
    fn invalidate_cache(&self) {}
}
