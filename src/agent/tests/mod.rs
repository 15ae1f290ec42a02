use super::test_helpers::*;
use super::*;
use crate::error::ErrorCode;
use crate::notify::Listener;
use crate::types::{Progress, Reason, State};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod control;

const BODY: &[u8] = b"0123456789abcdefghij";

/// Serve `BODY` at `route`, delayed by `delay`
async fn serve_body(server: &MockServer, route: &str, delay: Duration) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/octet-stream")
                .insert_header("etag", "\"v1\"")
                .set_body_bytes(BODY)
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

/// Download task for `route` on `server`, saved as `name` in the temp dir
async fn download_task(t: &TestAgent, server: &MockServer, route: &str, name: &str, extra: serde_json::Value) -> Task {
    let caller = t.caller("com.app");
    t.download(
        &caller,
        merge(
            json!({ "url": format!("{}{route}", server.uri()), "saveas": name }),
            extra,
        ),
    )
    .await
}

/// Collect agent events until `done` matches one, with a timeout
async fn events_until(
    rx: &mut tokio::sync::broadcast::Receiver<crate::types::Event>,
    done: impl Fn(&crate::types::Event) -> bool,
) -> Vec<crate::types::Event> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Ok(event) = rx.recv().await {
            let stop = done(&event);
            seen.push(event);
            if stop {
                break;
            }
        }
    })
    .await
    .expect("timed out waiting for events");
    seen
}
