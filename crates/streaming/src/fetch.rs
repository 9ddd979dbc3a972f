//! Background fetch + decode.
//!
//! Tile payloads are fetched on tokio worker tasks and decoded on the
//! blocking pool; only the decoded image crosses back to the main thread, as
//! a [`Completion`] on an mpsc channel.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use foundation::{TileCoord, TileKey};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use image::RgbaImage;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;
use tracing::trace;

use crate::request::Request;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },
    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("could not decode tile payload: {0}")]
    Decode(String),
}

/// Source of raw tile payloads.
///
/// Implementations must be cheap to share; the cache clones the `Arc` into
/// every fetch task.
pub trait TileFetcher: Send + Sync + 'static {
    fn fetch(&self, url: String) -> BoxFuture<'static, Result<Bytes, FetchError>>;
}

/// HTTP(S) fetcher backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self::new(client))
    }
}

impl TileFetcher for HttpFetcher {
    fn fetch(&self, url: String) -> BoxFuture<'static, Result<Bytes, FetchError>> {
        let client = self.client.clone();
        async move {
            let network = |e: reqwest::Error, url: &str| FetchError::Network {
                url: url.to_string(),
                message: e.to_string(),
            };
            let resp = client.get(&url).send().await.map_err(|e| network(e, &url))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    url,
                    status: status.as_u16(),
                });
            }
            resp.bytes().await.map_err(|e| network(e, &url))
        }
        .boxed()
    }
}

/// Decode an encoded image (PNG) into RGBA8.
pub fn decode_rgba(bytes: &[u8]) -> Result<RgbaImage, FetchError> {
    let img = image::load_from_memory(bytes).map_err(|e| FetchError::Decode(e.to_string()))?;
    Ok(img.to_rgba8())
}

/// Result of one fetch task, delivered to the main thread.
#[derive(Debug)]
pub struct Completion {
    pub key: TileKey,
    pub request: Request,
    pub result: Result<RgbaImage, FetchError>,
}

/// Spawn the fetch + decode of `coord` on `runtime`.
///
/// The returned handle aborts the task; an aborted task sends nothing.
pub(crate) fn spawn_fetch(
    runtime: &Handle,
    fetcher: Arc<dyn TileFetcher>,
    coord: TileCoord,
    url: String,
    request: Request,
    completions: UnboundedSender<Completion>,
) -> AbortHandle {
    let task = runtime.spawn(async move {
        trace!(tile = %coord, %url, "fetch start");
        let result = match fetcher.fetch(url).await {
            Ok(bytes) => tokio::task::spawn_blocking(move || decode_rgba(&bytes))
                .await
                .unwrap_or_else(|join| Err(FetchError::Decode(join.to_string()))),
            Err(err) => Err(err),
        };
        // A closed channel means the owning cache was disposed.
        let _ = completions.send(Completion {
            key: coord.key(),
            request,
            result,
        });
    });
    task.abort_handle()
}
