//! Test fixtures: mock HTTP resources and local files

use std::path::{Path, PathBuf};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Body served by the mock download endpoints
pub const TEST_CONTENT: &[u8] = b"0123456789abcdefghij";

/// Serve `TEST_CONTENT` as a binary file at `route`
pub async fn mount_file(server: &MockServer, route: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/octet-stream")
                .set_body_bytes(TEST_CONTENT),
        )
        .mount(server)
        .await;
}

/// Serve an HTML page at `route` for both `HEAD` and `GET`
pub async fn mount_html_page(server: &MockServer, route: &str) {
    Mock::given(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=utf-8")
                .set_body_string("<html><body>hello</body></html>"),
        )
        .mount(server)
        .await;
}

/// Write `contents` to `name` inside `dir`
pub fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let file = dir.join(name);
    std::fs::write(&file, contents).unwrap();
    file
}
