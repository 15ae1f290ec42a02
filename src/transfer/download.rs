//! HTTP download into a `.part` file with byte ranges and resume

use super::{Outcome, Transfer, cancellable, check_status, response_metadata};
use crate::error::TransferError;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, IF_RANGE, RANGE};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub(super) async fn run(
    transfer: &Transfer<'_>,
    client: &reqwest::Client,
) -> Result<Outcome, TransferError> {
    let config = transfer.config;
    let dest = config.saveas.as_deref().ok_or_else(|| {
        TransferError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "download has no destination",
        ))
    })?;

    if !config.cover && fs::try_exists(dest).await? {
        let size = fs::metadata(dest).await?.len();
        tracing::info!(
            path = %dest.display(),
            size,
            "Destination exists and cover is off, keeping the existing file"
        );
        transfer.sink.begin(vec![size_as_i64(size)], size);
        return Ok(Outcome::Completed { bytes: size });
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }
    let part = part_path(dest);

    // Length of the requested window, when `ends` bounds it
    let wanted = config
        .ends
        .map(|ends| ends.saturating_sub(config.begins) + 1);

    let mut offset = if transfer.resume {
        match fs::metadata(&part).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        }
    } else {
        0
    };
    if let Some(wanted) = wanted
        && offset >= wanted
    {
        tracing::debug!(path = %part.display(), "Partial file already holds the whole range");
        transfer.sink.begin(vec![size_as_i64(wanted)], wanted);
        finalize(&part, dest, config.cover).await?;
        return Ok(Outcome::Completed { bytes: wanted });
    }

    let start = config.begins + offset;
    let ranged = start > 0 || config.ends.is_some();
    let mut request = transfer.request(client);
    if ranged {
        let range = match config.ends {
            Some(ends) => format!("bytes={start}-{ends}"),
            None => format!("bytes={start}-"),
        };
        request = request.header(RANGE, range);
        if offset > 0
            && let Some(validator) = &transfer.validator
        {
            request = request.header(IF_RANGE, validator.as_str());
        }
    }

    let Some(response) = cancellable(transfer.cancel, request.send()).await else {
        return Ok(Outcome::Cancelled);
    };
    let response = response?;
    // Nothing is left past the partial data: the server reports the full
    // length, which is exactly where the resume range started
    if response.status() == StatusCode::RANGE_NOT_SATISFIABLE
        && offset > 0
        && unsatisfied_length(&response) == Some(start)
    {
        tracing::debug!(path = %part.display(), offset, "Partial file already holds the whole resource");
        transfer.sink.begin(vec![size_as_i64(offset)], offset);
        finalize(&part, dest, config.cover).await?;
        return Ok(Outcome::Completed { bytes: offset });
    }
    let response = check_status(response)?;

    let partial = response.status() == StatusCode::PARTIAL_CONTENT;
    // Appending a window that starts elsewhere would corrupt the file
    if partial
        && let Some((first, _, _)) = content_range(&response)
        && first != start
    {
        return Err(TransferError::UnsupportedRange);
    }
    // The server sent the whole resource despite the range: start over and
    // cut the window out locally.
    let mut skip = 0;
    if ranged && !partial {
        if offset > 0 {
            tracing::info!(
                url = %config.url,
                offset,
                "Server ignored the resume range, restarting from the beginning"
            );
        }
        offset = 0;
        skip = config.begins;
    }

    let expected = if partial {
        partial_length(&response).map(|len| offset + len)
    } else {
        response.content_length().map(|len| {
            let available = len.saturating_sub(skip);
            wanted.map_or(available, |wanted| wanted.min(available))
        })
    };
    if expected.is_none() && config.precise {
        return Err(TransferError::UnknownSize);
    }

    let (mime, extras) = response_metadata(&response);
    transfer.sink.metadata(mime, extras);
    transfer
        .sink
        .begin(vec![expected.map_or(-1, size_as_i64)], offset);

    let mut file = if offset > 0 {
        fs::OpenOptions::new().append(true).open(&part).await?
    } else {
        fs::File::create(&part).await?
    };

    // Only the local cut needs a byte budget; a 206 body is already bounded
    let mut budget = if partial { None } else { wanted.filter(|_| ranged) };
    let mut written = 0u64;
    let mut stream = response.bytes_stream();

    loop {
        let Some(next) = cancellable(transfer.cancel, stream.next()).await else {
            file.flush().await?;
            tracing::debug!(path = %part.display(), written, "Download cancelled, keeping partial file");
            return Ok(Outcome::Cancelled);
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;

        let mut data: &[u8] = &chunk;
        if skip > 0 {
            let n = usize::try_from(skip).unwrap_or(usize::MAX).min(data.len());
            data = &data[n..];
            skip -= n as u64;
        }
        if let Some(left) = budget {
            let n = usize::try_from(left).unwrap_or(usize::MAX).min(data.len());
            data = &data[..n];
            budget = Some(left - n as u64);
        }

        if !data.is_empty() {
            let len = data.len() as u64;
            if cancellable(transfer.cancel, transfer.limiter.acquire(len))
                .await
                .is_none()
            {
                file.flush().await?;
                return Ok(Outcome::Cancelled);
            }
            file.write_all(data).await?;
            written += len;
            transfer.sink.advance(len);
        }
        if budget == Some(0) {
            break;
        }
    }
    file.flush().await?;
    drop(file);

    let total = offset + written;
    if let Some(expected) = expected
        && total < expected
    {
        return Err(TransferError::Request(format!(
            "body ended after {total} of {expected} bytes"
        )));
    }

    finalize(&part, dest, config.cover).await?;
    tracing::debug!(path = %dest.display(), bytes = total, "Download finished");
    Ok(Outcome::Completed { bytes: total })
}

/// Sibling path the data is streamed into before it is renamed
pub(crate) fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

async fn finalize(part: &Path, dest: &Path, cover: bool) -> std::io::Result<()> {
    if !cover && fs::try_exists(dest).await? {
        tracing::info!(path = %dest.display(), "Destination appeared during download, keeping it");
        return fs::remove_file(part).await;
    }
    fs::rename(part, dest).await
}

/// Body length of a 206 response, from `Content-Range` or `Content-Length`
fn partial_length(response: &reqwest::Response) -> Option<u64> {
    content_range(response)
        .map(|(first, last, _)| last - first + 1)
        .or_else(|| response.content_length())
}

fn content_range(response: &reqwest::Response) -> Option<(u64, u64, Option<u64>)> {
    response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range)
}

/// Complete length from the `bytes */total` form sent with a 416
fn unsatisfied_length(response: &reqwest::Response) -> Option<u64> {
    let value = response.headers().get(CONTENT_RANGE)?.to_str().ok()?;
    value
        .trim()
        .strip_prefix("bytes")?
        .trim_start()
        .strip_prefix("*/")?
        .trim()
        .parse()
        .ok()
}

/// Parse `bytes first-last/total` (total may be `*`)
fn parse_content_range(value: &str) -> Option<(u64, u64, Option<u64>)> {
    let spec = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = spec.split_once('/')?;
    let (first, last) = range.split_once('-')?;
    let first: u64 = first.trim().parse().ok()?;
    let last: u64 = last.trim().parse().ok()?;
    if last < first {
        return None;
    }
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some((first, last, total))
}

fn size_as_i64(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}
