//! Pre-flight check that a URL supports the requested action
//!
//! Only definite answers reject a task. When the server cannot be reached
//! the task is still created and the failure surfaces from the transfer.

use super::TaskConfig;
use crate::error::{Error, Result};
use crate::types::Action;
use reqwest::header::{ALLOW, CONTENT_TYPE};
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Probe `config.url` and reject resources that cannot serve `config.action`
///
/// Downloads send `HEAD` and reject HTML pages. Uploads send `OPTIONS` and
/// reject targets whose `Allow` header excludes the configured method.
pub(crate) async fn probe(client: &reqwest::Client, config: &TaskConfig) -> Result<()> {
    let method = match config.action {
        Action::Download => reqwest::Method::HEAD,
        Action::Upload => reqwest::Method::OPTIONS,
    };

    let mut request = client
        .request(method, &config.url)
        .timeout(config.connection_timeout.unwrap_or(PROBE_TIMEOUT).min(PROBE_TIMEOUT));
    for (name, value) in &config.headers {
        if !name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()) {
            request = request.header(name.as_str(), value.as_str());
        }
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(url = %config.url, error = %e, "URL probe inconclusive");
            return Ok(());
        }
    };

    let unsupported = |reason: String| Error::ResourceUnsupported {
        url: config.url.clone(),
        action: match config.action {
            Action::Download => "download".to_string(),
            Action::Upload => "upload".to_string(),
        },
        reason,
    };

    match config.action {
        Action::Download => {
            let is_html = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with("text/html"));
            if response.status().is_success() && is_html {
                return Err(unsupported("target is an HTML page".to_string()));
            }
        }
        Action::Upload => {
            let allow = response
                .headers()
                .get(ALLOW)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            if response.status().is_success()
                && let Some(allow) = allow
                && !allow
                    .split(',')
                    .any(|m| m.trim().eq_ignore_ascii_case(config.method.as_str()))
            {
                return Err(unsupported(format!(
                    "{} not in allowed methods {allow}",
                    config.method.as_str()
                )));
            }
        }
    }

    tracing::debug!(url = %config.url, status = %response.status(), "URL probe passed");
    Ok(())
}
