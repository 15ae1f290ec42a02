//! Upload of local files, as multipart forms or raw request bodies
//!
//! Files go out one request each, starting at the configured `index`. A
//! `Content-Type` of `multipart/form-data` (or no `Content-Type` on a POST)
//! wraps every file in a form together with the text fields; anything else
//! streams the file bytes as the body and keeps the caller's headers.

use super::{Outcome, Transfer, cancellable, check_status, response_metadata};
use crate::error::TransferError;
use crate::task_config::{FileSpec, TaskConfig};
use crate::types::Method;
use futures::StreamExt;
use reqwest::Body;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use std::io::SeekFrom;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

pub(super) async fn run(
    transfer: &Transfer<'_>,
    client: &reqwest::Client,
) -> Result<Outcome, TransferError> {
    let config = transfer.config;

    let mut slices = Vec::with_capacity(config.files.len());
    for (index, file) in config.files.iter().enumerate() {
        let len = fs::metadata(&file.path)
            .await
            .map_err(|e| upload_error(file, e.to_string()))?
            .len();
        let slice = if index == config.index && config.has_range() {
            slice(config.begins, config.ends, len).ok_or_else(|| {
                upload_error(
                    file,
                    format!("range starts at {} beyond {len} bytes", config.begins),
                )
            })?
        } else {
            (0, len)
        };
        slices.push(slice);
    }

    let first = config.index.min(config.files.len());
    let sizes = slices
        .iter()
        .map(|(_, count)| i64::try_from(*count).unwrap_or(i64::MAX))
        .collect();
    // Files before `index` count as already sent
    let skipped: u64 = slices[..first].iter().map(|(_, count)| count).sum();
    transfer.sink.begin(sizes, skipped);

    let multipart = is_multipart(config);
    let mut sent = 0u64;
    for (index, (file, (start, count))) in config
        .files
        .iter()
        .zip(slices.iter().copied())
        .enumerate()
        .skip(first)
    {
        transfer.sink.select(index);
        let body = file_body(transfer, index, file, start, count).await?;
        tracing::debug!(
            url = %config.url,
            index,
            bytes = count,
            multipart,
            "Sending upload"
        );

        let request = if multipart {
            let mut part = Part::stream_with_length(body, count).file_name(file.filename.clone());
            if let Some(mime) = &file.mimetype {
                part = part
                    .mime_str(mime)
                    .map_err(|e| upload_error(file, format!("invalid mimetype {mime}: {e}")))?;
            }
            let mut form = Form::new();
            for field in &config.forms {
                form = form.text(field.name.clone(), field.value.clone());
            }
            transfer.request(client).multipart(form.part(file.name.clone(), part))
        } else {
            let mut request = transfer.request(client).header(CONTENT_LENGTH, count);
            if config.header(CONTENT_TYPE.as_str()).is_none() {
                request = request.header(CONTENT_TYPE, "application/octet-stream");
            }
            request.body(body)
        };

        let Some(response) = cancellable(transfer.cancel, request.send()).await else {
            return Ok(Outcome::Cancelled);
        };
        let response = check_status(response?)?;
        let (mime, extras) = response_metadata(&response);
        transfer.sink.metadata(mime, extras);
        sent += count;
    }

    Ok(Outcome::Completed {
        bytes: skipped + sent,
    })
}

fn is_multipart(config: &TaskConfig) -> bool {
    match config.header(CONTENT_TYPE.as_str()) {
        Some(value) => value
            .trim()
            .to_ascii_lowercase()
            .starts_with("multipart/form-data"),
        None => config.method == Method::Post,
    }
}

/// Start offset and byte count of the window `begins..=ends` in a file of `len` bytes
fn slice(begins: u64, ends: Option<u64>, len: u64) -> Option<(u64, u64)> {
    if len == 0 {
        return (begins == 0).then_some((0, 0));
    }
    if begins >= len {
        return None;
    }
    let last = ends.map_or(len - 1, |ends| ends.min(len - 1));
    Some((begins, last - begins + 1))
}

/// Stream of `count` bytes of `file` from `start`, metered and throttled
async fn file_body(
    transfer: &Transfer<'_>,
    index: usize,
    file: &FileSpec,
    start: u64,
    count: u64,
) -> Result<Body, TransferError> {
    let mut handle = fs::File::open(&file.path)
        .await
        .map_err(|e| upload_error(file, e.to_string()))?;
    if start > 0 {
        handle
            .seek(SeekFrom::Start(start))
            .await
            .map_err(|e| upload_error(file, e.to_string()))?;
    }

    let sink = transfer.sink.clone();
    let limiter = transfer.limiter.clone();
    let stream = ReaderStream::new(handle.take(count)).then(move |chunk| {
        let sink = sink.clone();
        let limiter = limiter.clone();
        async move {
            if let Ok(bytes) = &chunk {
                let len = bytes.len() as u64;
                limiter.acquire(len).await;
                sink.select(index);
                sink.advance(len);
            }
            chunk
        }
    });
    Ok(Body::wrap_stream(stream))
}

fn upload_error(file: &FileSpec, reason: String) -> TransferError {
    TransferError::UploadFile {
        path: file.path.clone(),
        reason,
    }
}
