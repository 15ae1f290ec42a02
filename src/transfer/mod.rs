//! Transfer executor
//!
//! One [`Transfer`] is one attempt at moving the bytes of a task. It never
//! touches task state directly: byte counts and response metadata flow out
//! through a [`ProgressSink`], cancellation flows in through a
//! [`CancellationToken`], and the caller decides what a failure means.

mod download;
mod upload;

pub(crate) use download::part_path;

use crate::config::AgentConfig;
use crate::error::TransferError;
use crate::speed_limiter::SpeedLimiter;
use crate::task_config::TaskConfig;
use crate::types::Action;
use reqwest::header::{CONTENT_TYPE, ETAG, LAST_MODIFIED};
use reqwest::redirect::Policy;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Redirect hops followed when `redirect` is on
const MAX_REDIRECTS: usize = 10;

/// Receiver of byte-level observations from a running transfer
pub(crate) trait ProgressSink: Send + Sync {
    /// File sizes are known (-1 when not); `offset` bytes are already done
    fn begin(&self, sizes: Vec<i64>, offset: u64);

    /// Response metadata such as `etag` and `last-modified`
    fn metadata(&self, mime_type: Option<String>, extras: HashMap<String, String>);

    /// The transfer moved on to file `index`
    fn select(&self, index: usize);

    /// `bytes` more bytes were transferred
    fn advance(&self, bytes: u64);
}

/// How an attempt ended when it did not fail
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// All bytes moved; `bytes` is the size of the transferred selection
    Completed {
        /// Bytes in the finished selection
        bytes: u64,
    },
    /// The cancellation token fired; partial data is kept for a later resume
    Cancelled,
}

/// A single transfer attempt
pub(crate) struct Transfer<'a> {
    pub(crate) config: &'a TaskConfig,
    pub(crate) defaults: &'a AgentConfig,
    pub(crate) limiter: &'a SpeedLimiter,
    pub(crate) cancel: &'a CancellationToken,
    pub(crate) sink: Arc<dyn ProgressSink>,
    /// Continue a partial download instead of starting over
    pub(crate) resume: bool,
    /// `ETag` or `Last-Modified` of the partial data, sent as `If-Range`
    pub(crate) validator: Option<String>,
}

impl Transfer<'_> {
    /// Run the attempt to completion, cancellation or failure
    pub(crate) async fn execute(&self) -> Result<Outcome, TransferError> {
        let client = build_client(self.config, self.defaults)?;
        match self.config.action {
            Action::Download => download::run(self, &client).await,
            Action::Upload => upload::run(self, &client).await,
        }
    }

    fn request(&self, client: &reqwest::Client) -> reqwest::RequestBuilder {
        let mut request = client.request(self.config.method.into(), &self.config.url);
        for (name, value) in &self.config.headers {
            // reqwest writes its own multipart content type with the boundary
            if self.config.action == Action::Upload
                && name.eq_ignore_ascii_case(CONTENT_TYPE.as_str())
                && value.to_ascii_lowercase().starts_with("multipart/form-data")
            {
                continue;
            }
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }
}

fn build_client(
    config: &TaskConfig,
    defaults: &AgentConfig,
) -> Result<reqwest::Client, TransferError> {
    let redirect = if config.redirect {
        Policy::limited(MAX_REDIRECTS)
    } else {
        Policy::none()
    };
    reqwest::Client::builder()
        .connect_timeout(config.connection_timeout.unwrap_or(defaults.connect_timeout))
        .timeout(config.total_timeout.unwrap_or(defaults.total_timeout))
        .redirect(redirect)
        .build()
        .map_err(|e| TransferError::BuildClient(e.to_string()))
}

/// Await `fut` unless `cancel` fires first
async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = fut => Some(output),
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransferError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else if status.is_redirection() {
        Err(TransferError::Redirect(format!(
            "redirects are disabled, server answered {status}"
        )))
    } else {
        Err(TransferError::Status {
            status: status.as_u16(),
        })
    }
}

/// Mime type and cache validators of a response
fn response_metadata(response: &reqwest::Response) -> (Option<String>, HashMap<String, String>) {
    let header = |name: reqwest::header::HeaderName| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let mut extras = HashMap::new();
    if let Some(etag) = header(ETAG) {
        extras.insert("etag".to_string(), etag);
    }
    if let Some(modified) = header(LAST_MODIFIED) {
        extras.insert("last-modified".to_string(), modified);
    }
    let mime = header(CONTENT_TYPE).map(|v| {
        v.split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string()
    });
    (mime, extras)
}
