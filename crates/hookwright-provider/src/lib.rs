pub mod client;
pub mod error;
pub mod sse;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;

pub use client::{HttpBackend, DEFAULT_BOOKMARK_PATH, DEFAULT_HOOKS_PATH, DEFAULT_STREAM_PATH};
pub use error::{BackendError, ErrorKind};
pub use reqwest::StatusCode;
pub use sse::{event_stream, SseParser, Utf8Decoder};

/// Raw response body of a generation request.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, BackendError>> + Send>>;

/// The remote service that runs generations and stores bookmarks.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Starts a generation. An `Err` means the request was not accepted and
    /// no body will follow.
    async fn open_stream(&self, query: &str) -> Result<ByteStream, BackendError>;

    async fn bookmark_hook(&self, content: &str) -> Result<(), BackendError>;
}
