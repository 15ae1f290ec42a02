//! Task configuration validation
//!
//! Callers hand [`TaskConfig::parse`] a loosely typed JSON document. Each
//! field goes through an explicit coercion step (see [`coerce`]) that either
//! produces a typed value, falls back to a documented default with a warning,
//! or rejects the whole configuration with a parameter error. Local paths are
//! checked against the caller's [`Sandbox`] here, so a task never holds a path
//! it may not touch.

mod coerce;
mod probe;

pub(crate) use probe::probe;

use crate::auth::Sandbox;
use crate::error::{Error, Result};
use crate::types::{Action, Method, Mode, Network};
use crate::utils::{display_name, filename_from_url};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for a per-task total timeout
const MAX_TOTAL_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Accepted length of a task token, in characters
const TOKEN_LEN: std::ops::RangeInclusive<usize> = 8..=2048;

/// A local file taking part in an upload
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileSpec {
    /// Multipart form field name
    pub name: String,
    /// Resolved local path
    pub path: PathBuf,
    /// File name sent to the server; defaults to the base name of `path`
    pub filename: String,
    /// MIME type sent with the part, when known
    pub mimetype: Option<String>,
}

/// A plain text field sent alongside upload files
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FormField {
    /// Field name
    pub name: String,
    /// Field value
    pub value: String,
}

/// Normalized, immutable configuration of a task
#[derive(Clone, Debug, Serialize)]
pub struct TaskConfig {
    /// Transfer direction
    pub action: Action,
    /// Remote URL
    pub url: String,
    /// HTTP method
    pub method: Method,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Upload files, in the order given
    pub files: Vec<FileSpec>,
    /// Upload text fields
    pub forms: Vec<FormField>,
    /// Title
    pub title: String,
    /// Description
    pub description: String,
    /// Mode
    pub mode: Mode,
    /// Overwrite an existing download destination
    pub cover: bool,
    /// Network constraint
    pub network: Network,
    /// Retry failed attempts
    pub retry: bool,
    /// Selected file for range-limited transfers
    pub index: usize,
    /// First byte of the range
    pub begins: u64,
    /// Last byte of the range (inclusive), `None` for "to the end"
    pub ends: Option<u64>,
    /// Resolved download destination
    pub saveas: Option<PathBuf>,
    /// Follow HTTP redirects
    pub redirect: bool,
    /// Fail when the server does not report a size
    pub precise: bool,
    /// Emit byte progress on the agent broadcast for BACKGROUND tasks
    pub gauge: bool,
    /// Secret required by `touch`
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Ordering hint for search results
    pub priority: u32,
    /// Caller-supplied extras echoed back in `TaskInfo`
    pub extras: HashMap<String, String>,
    /// Per-task connection timeout
    pub connection_timeout: Option<Duration>,
    /// Per-task total timeout
    pub total_timeout: Option<Duration>,
}

impl TaskConfig {
    /// Validate and normalize a raw configuration document
    ///
    /// Relative `saveas` paths and derived file names resolve under
    /// `download_dir`. Structural problems yield a parameter error (401),
    /// paths outside `sandbox` yield a file access error (13400001).
    pub fn parse(raw: &Value, sandbox: &Sandbox, download_dir: &Path) -> Result<Self> {
        let Value::Object(raw) = raw else {
            return Err(Error::Parameter {
                message: "configuration must be an object".to_string(),
                field: None,
            });
        };

        let action = coerce::action(raw.get("action"))?;
        let url = coerce::url(raw.get("url"))?;

        let method = coerce::method(raw.get("method"), action);
        warn_fallback("method", method.fell_back, method.value.as_str());

        let headers = match coerce::string_map("headers", raw.get("headers"))? {
            Some(headers) => headers,
            None => default_headers(action),
        };

        let title = coerce::text(raw.get("title"));
        warn_fallback("title", title.fell_back, "");
        let description = coerce::text(raw.get("description"));
        warn_fallback("description", description.fell_back, "");

        let mode = coerce::mode(raw.get("mode"));
        warn_fallback("mode", mode.fell_back, "background");
        let network = coerce::network(raw.get("network"));
        warn_fallback("network", network.fell_back, "any");

        let cover = coerce::flag(raw.get("cover"), false);
        warn_fallback("cover", cover.fell_back, "false");
        let retry = coerce::flag(raw.get("retry"), true);
        warn_fallback("retry", retry.fell_back, "false");
        let redirect = coerce::flag(raw.get("redirect"), true);
        warn_fallback("redirect", redirect.fell_back, "false");
        let precise = coerce::flag(raw.get("precise"), false);
        warn_fallback("precise", precise.fell_back, "false");
        let gauge = coerce::flag(raw.get("gauge"), false);
        warn_fallback("gauge", gauge.fell_back, "false");

        let index = coerce::unsigned(raw.get("index"), 0);
        warn_fallback("index", index.fell_back, "0");
        let begins = coerce::unsigned(raw.get("begins"), 0);
        warn_fallback("begins", begins.fell_back, "0");
        let ends = coerce::range_end(raw.get("ends"));
        warn_fallback("ends", ends.fell_back, "-1");
        let priority = coerce::unsigned(raw.get("priority"), 0);
        warn_fallback("priority", priority.fell_back, "0");

        let (files, forms, saveas) = match action {
            Action::Upload => {
                let (files, forms) = parse_upload_data(raw.get("data"), sandbox)?;
                (files, forms, None)
            }
            Action::Download => {
                let saveas = resolve_saveas(raw.get("saveas"), &url, download_dir, sandbox)?;
                (Vec::new(), Vec::new(), Some(saveas))
            }
        };

        let token = parse_token(raw.get("token"))?;
        let extras = coerce::string_map("extras", raw.get("extras"))?.unwrap_or_default();
        let (connection_timeout, total_timeout) = parse_timeout(raw.get("timeout"))?;

        Ok(Self {
            action,
            url,
            method: method.value,
            headers,
            files,
            forms,
            title: title.value,
            description: description.value,
            mode: mode.value,
            cover: cover.value,
            network: network.value,
            retry: retry.value,
            index: usize::try_from(index.value).unwrap_or(usize::MAX),
            begins: begins.value,
            ends: ends.value,
            saveas,
            redirect: redirect.value,
            precise: precise.value,
            gauge: gauge.value,
            token,
            priority: u32::try_from(priority.value).unwrap_or(u32::MAX),
            extras,
            connection_timeout,
            total_timeout,
        })
    }

    /// Checks deferred until `start`: the file index and the range bounds
    pub fn check_startable(&self) -> Result<()> {
        let count = match self.action {
            Action::Download => 1,
            Action::Upload => self.files.len(),
        };
        if self.index >= count {
            return Err(Error::parameter(
                "index",
                format!("index {} out of range for {count} file(s)", self.index),
            ));
        }
        if let Some(ends) = self.ends
            && self.begins > ends
        {
            return Err(Error::parameter(
                "begins",
                format!("begins {} is greater than ends {ends}", self.begins),
            ));
        }
        Ok(())
    }

    /// Whether a byte range narrower than the whole resource was requested
    pub fn has_range(&self) -> bool {
        self.begins > 0 || self.ends.is_some()
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Local file path shown in `TaskInfo`
    pub fn local_path(&self) -> Option<&Path> {
        match self.action {
            Action::Download => self.saveas.as_deref(),
            Action::Upload => self
                .files
                .get(self.index)
                .or_else(|| self.files.first())
                .map(|f| f.path.as_path()),
        }
    }

    /// Number of files whose sizes are tracked in `Progress::sizes`
    pub fn file_count(&self) -> usize {
        self.files.len().max(1)
    }
}

fn warn_fallback(field: &str, fell_back: bool, fallback: &str) {
    if fell_back {
        tracing::warn!(field, fallback, "Invalid configuration value replaced by fallback");
    }
}

fn default_headers(action: Action) -> HashMap<String, String> {
    let content_type = match action {
        Action::Upload => "multipart/form-data",
        Action::Download => "application/json",
    };
    HashMap::from([("Content-Type".to_string(), content_type.to_string())])
}

fn parse_upload_data(
    value: Option<&Value>,
    sandbox: &Sandbox,
) -> Result<(Vec<FileSpec>, Vec<FormField>)> {
    let entries: Vec<&Value> = match value.filter(|v| !v.is_null()) {
        None => return Err(Error::parameter("data", "data is required for uploads")),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ Value::Object(_)) => vec![single],
        Some(_) => {
            return Err(Error::parameter(
                "data",
                "data must be an object or an array of objects",
            ));
        }
    };

    let mut files = Vec::new();
    let mut forms = Vec::new();
    for entry in entries {
        parse_data_entry(entry, sandbox, &mut files, &mut forms)?;
    }
    if files.is_empty() {
        return Err(Error::parameter("data", "data must contain at least one file"));
    }
    Ok((files, forms))
}

fn parse_data_entry(
    entry: &Value,
    sandbox: &Sandbox,
    files: &mut Vec<FileSpec>,
    forms: &mut Vec<FormField>,
) -> Result<()> {
    let Value::Object(obj) = entry else {
        return Err(Error::parameter("data", "data entries must be objects"));
    };

    let name = match obj.get("name") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => return Err(Error::parameter("data.name", "name must be a non-empty string")),
    };
    let Some(value) = obj.get("value") else {
        // Bare file description: { name, path, filename?, mimetype? }
        files.push(parse_file(name, obj, sandbox)?);
        return Ok(());
    };

    match value {
        Value::String(text) => forms.push(FormField {
            name,
            value: text.clone(),
        }),
        Value::Object(file) => files.push(parse_file(name, file, sandbox)?),
        Value::Array(items) if !items.is_empty() => {
            for item in items {
                let Value::Object(file) = item else {
                    return Err(Error::parameter("data.value", "file entries must be objects"));
                };
                files.push(parse_file(name.clone(), file, sandbox)?);
            }
        }
        _ => {
            return Err(Error::parameter(
                "data.value",
                "value must be a string, a file or a list of files",
            ));
        }
    }
    Ok(())
}

fn parse_file(name: String, obj: &Map<String, Value>, sandbox: &Sandbox) -> Result<FileSpec> {
    let path = match obj.get("path") {
        Some(Value::String(s)) if !s.is_empty() => PathBuf::from(s),
        Some(Value::String(_)) => return Err(Error::parameter("data.path", "path must not be empty")),
        _ => return Err(Error::parameter("data.path", "path must be a string")),
    };
    let path = sandbox.check_readable(&path)?;

    let filename = match obj.get("filename") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        None | Some(Value::Null) | Some(Value::String(_)) => display_name(&path),
        Some(_) => {
            warn_fallback("data.filename", true, "base name");
            display_name(&path)
        }
    };
    let mimetype = match obj.get("mimetype") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        None | Some(Value::Null) | Some(Value::String(_)) => None,
        Some(_) => {
            warn_fallback("data.mimetype", true, "none");
            None
        }
    };

    Ok(FileSpec {
        name,
        path,
        filename,
        mimetype,
    })
}

fn resolve_saveas(
    value: Option<&Value>,
    url: &str,
    download_dir: &Path,
    sandbox: &Sandbox,
) -> Result<PathBuf> {
    let requested = match value.filter(|v| !v.is_null()) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.as_str()),
        None | Some(Value::String(_)) => None,
        Some(_) => {
            warn_fallback("saveas", true, "name derived from url");
            None
        }
    };

    let target = match requested {
        Some(s) => {
            let path = Path::new(s);
            let path = if path.is_absolute() {
                path.to_path_buf()
            } else {
                download_dir.join(path)
            };
            if s.ends_with('/') || path.is_dir() {
                path.join(filename_from_url(url))
            } else {
                path
            }
        }
        None => download_dir.join(filename_from_url(url)),
    };
    sandbox.check_writable(&target)
}

fn parse_token(value: Option<&Value>) -> Result<Option<String>> {
    match value.filter(|v| !v.is_null()) {
        None => Ok(None),
        Some(Value::String(s)) if TOKEN_LEN.contains(&s.chars().count()) => Ok(Some(s.clone())),
        Some(_) => Err(Error::parameter(
            "token",
            "token must be a string of 8 to 2048 characters",
        )),
    }
}

fn parse_timeout(value: Option<&Value>) -> Result<(Option<Duration>, Option<Duration>)> {
    let obj = match value.filter(|v| !v.is_null()) {
        None => return Ok((None, None)),
        Some(Value::Object(obj)) => obj,
        Some(_) => return Err(Error::parameter("timeout", "timeout must be an object")),
    };

    let seconds = |key: &str| -> Result<Option<Duration>> {
        match obj.get(key).filter(|v| !v.is_null()) {
            None => Ok(None),
            Some(Value::Number(n)) => match n.as_u64() {
                Some(secs) if secs >= 1 => Ok(Some(Duration::from_secs(secs))),
                _ => Err(Error::parameter(
                    format!("timeout.{key}"),
                    "timeout must be at least one second",
                )),
            },
            Some(_) => Err(Error::parameter(
                format!("timeout.{key}"),
                "timeout must be a number of seconds",
            )),
        }
    };

    let connection = seconds("connectionTimeout")?;
    let total = seconds("totalTimeout")?;
    if total.is_some_and(|t| t > MAX_TOTAL_TIMEOUT) {
        return Err(Error::parameter(
            "timeout.totalTimeout",
            "total timeout may not exceed one week",
        ));
    }
    Ok((connection, total))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        sandbox: Sandbox,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let sandbox = Sandbox::new([dir.path()]);
            Self { dir, sandbox }
        }

        fn file(&self, name: &str, content: &[u8]) -> String {
            let path = self.dir.path().join(name);
            std::fs::write(&path, content).unwrap();
            path.to_string_lossy().into_owned()
        }

        fn parse(&self, raw: Value) -> Result<TaskConfig> {
            TaskConfig::parse(&raw, &self.sandbox, self.dir.path())
        }
    }

    #[test]
    fn upload_defaults_to_multipart_content_type() {
        let fx = Fixture::new();
        let path = fx.file("test.txt", b"hello");
        let config = fx
            .parse(json!({
                "action": "UPLOAD",
                "url": "http://127.0.0.1/upload",
                "data": { "name": "file", "value": { "path": path, "filename": "other.txt" } },
            }))
            .unwrap();

        assert_eq!(config.header("content-type"), Some("multipart/form-data"));
        assert_eq!(config.method, Method::Post);
        assert_eq!(config.files.len(), 1);
        assert_eq!(config.files[0].filename, "other.txt");
    }

    #[test]
    fn download_defaults_to_json_content_type_and_url_name() {
        let fx = Fixture::new();
        let config = fx
            .parse(json!({ "action": 0, "url": "http://127.0.0.1/files/test.apk" }))
            .unwrap();

        assert_eq!(config.header("Content-Type"), Some("application/json"));
        assert_eq!(config.method, Method::Get);
        let saveas = config.saveas.unwrap();
        assert_eq!(saveas.file_name().unwrap(), "test.apk");
        assert_eq!(config.mode, Mode::Background);
        assert!(config.retry);
    }

    #[test]
    fn missing_action_is_a_parameter_error() {
        let fx = Fixture::new();
        let err = fx
            .parse(json!({ "action": null, "url": "http://127.0.0.1" }))
            .unwrap_err();
        assert_eq!(err.code(), 401);
    }

    #[test]
    fn upload_without_data_is_a_parameter_error() {
        let fx = Fixture::new();
        let err = fx
            .parse(json!({ "action": 1, "url": "http://127.0.0.1" }))
            .unwrap_err();
        assert_eq!(err.code(), 401);
    }

    #[test]
    fn upload_entries_need_name_and_path() {
        let fx = Fixture::new();
        let path = fx.file("a.txt", b"a");
        let cases = [
            json!({ "value": { "path": path } }),
            json!({ "path": path }),
            json!([{ "name": "file", "path": path }, { "path": path }]),
            json!({ "name": 5, "value": { "path": path } }),
            json!({ "name": "file", "value": { "path": "" } }),
            json!({ "name": "file", "value": { "path": 12 } }),
            json!({ "name": "file", "value": { "filename": "a.txt" } }),
            json!({ "name": "file", "value": 3 }),
        ];
        for data in cases {
            let err = fx
                .parse(json!({ "action": 1, "url": "http://127.0.0.1", "data": data.clone() }))
                .unwrap_err();
            assert_eq!(err.code(), 401, "{data} should be rejected");
        }
    }

    #[test]
    fn upload_outside_sandbox_is_file_access_error() {
        let fx = Fixture::new();
        let outside = tempfile::tempdir().unwrap();
        let path = outside.path().join("x.txt");
        std::fs::write(&path, b"x").unwrap();

        let err = fx
            .parse(json!({
                "action": 1,
                "url": "http://127.0.0.1",
                "data": [{ "name": "file", "value": { "path": path } }],
            }))
            .unwrap_err();
        assert_eq!(err.code(), 13400001);
    }

    #[test]
    fn upload_collects_form_fields_and_file_lists() {
        let fx = Fixture::new();
        let a = fx.file("a.txt", b"a");
        let b = fx.file("b.txt", b"b");
        let config = fx
            .parse(json!({
                "action": 1,
                "url": "http://127.0.0.1",
                "method": "put",
                "data": [
                    { "name": "files", "value": [{ "path": a }, { "path": b, "mimetype": 42 }] },
                    { "name": "comment", "value": "hello" },
                    { "name": "extra", "path": a },
                ],
            }))
            .unwrap();

        assert_eq!(config.method, Method::Put);
        assert_eq!(config.files.len(), 3);
        assert_eq!(config.files[1].mimetype, None);
        assert_eq!(config.files[2].name, "extra");
        assert_eq!(config.forms, vec![FormField { name: "comment".into(), value: "hello".into() }]);
    }

    #[test]
    fn loose_fields_are_coerced() {
        let fx = Fixture::new();
        let config = fx
            .parse(json!({
                "action": "download",
                "url": "http://127.0.0.1/a.bin",
                "title": 123,
                "description": ["x"],
                "method": 123,
                "cover": "true",
                "retry": 123,
                "mode": "FRONTEND",
                "network": 7,
                "headers": "{\"Accept\":\"*/*\"}",
            }))
            .unwrap();

        assert_eq!(config.title, "");
        assert_eq!(config.description, "");
        assert_eq!(config.method, Method::Get);
        assert!(config.cover);
        assert!(!config.retry);
        assert_eq!(config.mode, Mode::Frontend);
        assert_eq!(config.network, Network::Any);
        assert_eq!(config.header("accept"), Some("*/*"));
        assert_eq!(config.header("content-type"), None);
    }

    #[test]
    fn headers_of_wrong_type_are_rejected() {
        let fx = Fixture::new();
        let err = fx
            .parse(json!({ "action": 0, "url": "http://127.0.0.1/a", "headers": 5 }))
            .unwrap_err();
        assert_eq!(err.code(), 401);
    }

    #[test]
    fn index_and_range_are_checked_at_start() {
        let fx = Fixture::new();
        let path = fx.file("a.txt", b"a");
        let config = fx
            .parse(json!({
                "action": 1,
                "url": "http://127.0.0.1",
                "data": { "name": "file", "path": path },
                "index": 4,
            }))
            .unwrap();
        assert_eq!(config.check_startable().unwrap_err().code(), 401);

        let config = fx
            .parse(json!({ "action": 0, "url": "http://127.0.0.1/a", "begins": 10, "ends": 5 }))
            .unwrap();
        assert_eq!(config.check_startable().unwrap_err().code(), 401);

        let config = fx
            .parse(json!({ "action": 0, "url": "http://127.0.0.1/a", "begins": 5, "ends": -1 }))
            .unwrap();
        assert!(config.check_startable().is_ok());
        assert!(config.has_range());
    }

    #[test]
    fn saveas_resolves_relative_to_download_dir() {
        let fx = Fixture::new();
        let config = fx
            .parse(json!({ "action": 0, "url": "http://127.0.0.1/a", "saveas": "sub/out.bin" }))
            .unwrap();
        let saveas = config.saveas.unwrap();
        assert!(saveas.starts_with(fx.dir.path()));
        assert!(saveas.ends_with("sub/out.bin"));

        let config = fx
            .parse(json!({ "action": 0, "url": "http://127.0.0.1/named.txt", "saveas": 12 }))
            .unwrap();
        assert_eq!(config.saveas.unwrap().file_name().unwrap(), "named.txt");

        let err = fx
            .parse(json!({ "action": 0, "url": "http://127.0.0.1/a", "saveas": "/etc/passwd" }))
            .unwrap_err();
        assert_eq!(err.code(), 13400001);
    }

    #[test]
    fn token_and_timeout_bounds() {
        let fx = Fixture::new();
        let base = |extra: Value| {
            let mut raw = json!({ "action": 0, "url": "http://127.0.0.1/a" });
            raw.as_object_mut()
                .unwrap()
                .extend(extra.as_object().unwrap().clone());
            raw
        };

        assert_eq!(fx.parse(base(json!({ "token": "short" }))).unwrap_err().code(), 401);
        let config = fx.parse(base(json!({ "token": "long-enough-token" }))).unwrap();
        assert_eq!(config.token.as_deref(), Some("long-enough-token"));

        let config = fx
            .parse(base(json!({ "timeout": { "connectionTimeout": 5, "totalTimeout": 60 } })))
            .unwrap();
        assert_eq!(config.connection_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.total_timeout, Some(Duration::from_secs(60)));

        let err = fx
            .parse(base(json!({ "timeout": { "connectionTimeout": 0 } })))
            .unwrap_err();
        assert_eq!(err.code(), 401);
    }
}
