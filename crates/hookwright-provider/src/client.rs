use std::time::Duration;

use async_trait::async_trait;
use hookwright_schema::HookPage;
use reqwest::{RequestBuilder, Response};
use serde::Serialize;
use tokio_stream::StreamExt;

use crate::{BackendError, ByteStream, GenerationBackend};

/// Assumed route of the streaming service; set `backend.stream_path` when it differs.
pub const DEFAULT_STREAM_PATH: &str = "/api/hooks/generate-stream";
pub const DEFAULT_BOOKMARK_PATH: &str = "/api/hooks/bookmark-hook";
pub const DEFAULT_HOOKS_PATH: &str = "/api/hooks/get-user-hooks";
pub const MAX_HOOKS_PAGE: u32 = 50;

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    stream_path: String,
    bookmark_path: String,
    hooks_path: String,
    request_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    query: &'a str,
}

#[derive(Debug, Serialize)]
struct BookmarkBody<'a> {
    hook: &'a str,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeouts(base_url, Duration::from_secs(10), Duration::from_secs(30))
    }

    /// `connect_timeout` applies to every request. `request_timeout` bounds
    /// the short JSON calls only; the generation stream has no total limit.
    pub fn with_timeouts(
        base_url: impl Into<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(connect_timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: None,
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            bookmark_path: DEFAULT_BOOKMARK_PATH.to_string(),
            hooks_path: DEFAULT_HOOKS_PATH.to_string(),
            request_timeout,
        }
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.api_token = (!token.trim().is_empty()).then_some(token);
        self
    }

    pub fn with_paths(
        mut self,
        stream_path: impl Into<String>,
        bookmark_path: impl Into<String>,
        hooks_path: impl Into<String>,
    ) -> Self {
        self.stream_path = stream_path.into();
        self.bookmark_path = bookmark_path.into();
        self.hooks_path = hooks_path.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, BackendError> {
        let req = match &self.api_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        };

        let resp = req.send().await.map_err(BackendError::from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(BackendError::from_response(status, &text));
        }
        Ok(resp)
    }

    /// Lists hooks the backend has stored for the current user.
    pub async fn list_hooks(&self, limit: u32, offset: u32) -> Result<HookPage, BackendError> {
        if limit == 0 || limit > MAX_HOOKS_PAGE {
            return Err(BackendError::InvalidRequest(format!(
                "limit must be between 1 and {MAX_HOOKS_PAGE}"
            )));
        }

        let req = self
            .client
            .get(self.url(&self.hooks_path))
            .query(&[("limit", limit), ("offset", offset)])
            .timeout(self.request_timeout);
        let resp = self.send(req).await?;
        resp.json::<HookPage>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    async fn open_stream(&self, query: &str) -> Result<ByteStream, BackendError> {
        let req = self
            .client
            .post(self.url(&self.stream_path))
            .header("accept", "text/event-stream")
            .json(&GenerateBody { query });
        let resp = self.send(req).await?;
        tracing::debug!(status = %resp.status(), "generation stream opened");

        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| BackendError::Body(e.to_string())));
        Ok(Box::pin(body))
    }

    async fn bookmark_hook(&self, content: &str) -> Result<(), BackendError> {
        let hook = content.trim();
        if hook.is_empty() {
            return Err(BackendError::InvalidRequest(
                "hook text is required and must be a non-empty string".into(),
            ));
        }

        let req = self
            .client
            .post(self.url(&self.bookmark_path))
            .json(&BookmarkBody { hook })
            .timeout(self.request_timeout);
        self.send(req).await?;
        Ok(())
    }
}
