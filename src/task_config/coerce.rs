//! Literal-form coercions for loosely typed configuration fields.
//!
//! Each helper enumerates the accepted JSON shapes for one field and says what
//! happens to anything else: either a typed fallback or a parameter error.

use crate::error::{Error, Result};
use crate::types::{Action, Method, Mode, Network};
use serde_json::Value;
use std::collections::HashMap;

/// Coerced value plus whether the input had to be replaced by the fallback
pub(crate) struct Coerced<T> {
    pub(crate) value: T,
    pub(crate) fell_back: bool,
}

impl<T> Coerced<T> {
    fn exact(value: T) -> Self {
        Self {
            value,
            fell_back: false,
        }
    }

    fn fallback(value: T) -> Self {
        Self {
            value,
            fell_back: true,
        }
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

/// `action`: 0/1 or "download"/"upload" (any case); anything else is 401
pub(crate) fn action(value: Option<&Value>) -> Result<Action> {
    let parsed = match present(value) {
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u8::try_from(n).ok())
            .and_then(Action::from_u8),
        Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "download" => Some(Action::Download),
            "upload" => Some(Action::Upload),
            _ => None,
        },
        _ => None,
    };
    parsed.ok_or_else(|| Error::parameter("action", "action must be DOWNLOAD or UPLOAD"))
}

/// `url`: non-empty http(s) URL no longer than 8192 bytes
pub(crate) fn url(value: Option<&Value>) -> Result<String> {
    const MAX_URL_LEN: usize = 8192;

    let Some(Value::String(raw)) = present(value) else {
        return Err(Error::parameter("url", "url must be a string"));
    };
    if raw.is_empty() || raw.len() > MAX_URL_LEN {
        return Err(Error::parameter("url", "url length out of range"));
    }
    let parsed = url::Url::parse(raw)
        .map_err(|e| Error::parameter("url", format!("url is malformed: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::parameter("url", "url scheme must be http or https"));
    }
    Ok(raw.clone())
}

/// `title`/`description`: strings, anything else becomes ""
pub(crate) fn text(value: Option<&Value>) -> Coerced<String> {
    match present(value) {
        None => Coerced::exact(String::new()),
        Some(Value::String(s)) => Coerced::exact(s.clone()),
        Some(_) => Coerced::fallback(String::new()),
    }
}

/// `method`: GET/POST/PUT (any case) valid for the action, else the action default
pub(crate) fn method(value: Option<&Value>, action: Action) -> Coerced<Method> {
    let default = Method::default_for(action);
    let parsed = match present(value) {
        None => return Coerced::exact(default),
        Some(Value::String(s)) => match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            _ => None,
        },
        Some(_) => None,
    };
    match parsed {
        Some(m) if m.allowed_for(action) => Coerced::exact(m),
        _ => Coerced::fallback(default),
    }
}

/// `mode`: 0/1 or "background"/"frontend" (any case), else BACKGROUND
pub(crate) fn mode(value: Option<&Value>) -> Coerced<Mode> {
    let parsed = match present(value) {
        None => return Coerced::exact(Mode::default()),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u8::try_from(n).ok())
            .and_then(Mode::from_u8),
        Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "background" => Some(Mode::Background),
            "frontend" => Some(Mode::Frontend),
            _ => None,
        },
        Some(_) => None,
    };
    match parsed {
        Some(m) => Coerced::exact(m),
        None => Coerced::fallback(Mode::default()),
    }
}

/// `network`: 0/1/2 or "any"/"wifi"/"cellular" (any case), else ANY
pub(crate) fn network(value: Option<&Value>) -> Coerced<Network> {
    let parsed = match present(value) {
        None => return Coerced::exact(Network::default()),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u8::try_from(n).ok())
            .and_then(Network::from_u8),
        Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "any" => Some(Network::Any),
            "wifi" => Some(Network::Wifi),
            "cellular" => Some(Network::Cellular),
            _ => None,
        },
        Some(_) => None,
    };
    match parsed {
        Some(n) => Coerced::exact(n),
        None => Coerced::fallback(Network::default()),
    }
}

/// Booleans: true/false or "true"/"false" (any case); anything else is false
pub(crate) fn flag(value: Option<&Value>, default: bool) -> Coerced<bool> {
    match present(value) {
        None => Coerced::exact(default),
        Some(Value::Bool(b)) => Coerced::exact(*b),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => Coerced::exact(true),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => Coerced::exact(false),
        Some(_) => Coerced::fallback(false),
    }
}

/// Non-negative integers; anything else falls back to `default`
pub(crate) fn unsigned(value: Option<&Value>, default: u64) -> Coerced<u64> {
    match present(value) {
        None => Coerced::exact(default),
        Some(Value::Number(n)) => match n.as_u64() {
            Some(v) => Coerced::exact(v),
            None => Coerced::fallback(default),
        },
        Some(_) => Coerced::fallback(default),
    }
}

/// `ends`: non-negative integer, or absent/negative meaning "to the end"
pub(crate) fn range_end(value: Option<&Value>) -> Coerced<Option<u64>> {
    match present(value) {
        None => Coerced::exact(None),
        Some(Value::Number(n)) => match (n.as_u64(), n.as_i64()) {
            (Some(v), _) => Coerced::exact(Some(v)),
            (None, Some(neg)) if neg < 0 => Coerced::exact(None),
            _ => Coerced::fallback(None),
        },
        Some(_) => Coerced::fallback(None),
    }
}

/// String maps: an object (non-string values are JSON-encoded) or a JSON
/// string holding such an object. `None` when absent; other shapes are 401.
pub(crate) fn string_map(
    field: &str,
    value: Option<&Value>,
) -> Result<Option<HashMap<String, String>>> {
    let object = match present(value) {
        None => return Ok(None),
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            _ => {
                return Err(Error::parameter(
                    field,
                    format!("{field} string must hold a JSON object"),
                ));
            }
        },
        Some(_) => {
            return Err(Error::parameter(
                field,
                format!("{field} must be an object or a string"),
            ));
        }
    };

    Ok(Some(
        object
            .into_iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, v)
            })
            .collect(),
    ))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_accepts_numbers_and_names() {
        assert_eq!(action(Some(&json!(0))).unwrap(), Action::Download);
        assert_eq!(action(Some(&json!("UPLOAD"))).unwrap(), Action::Upload);
        assert!(action(None).is_err());
        assert!(action(Some(&json!(7))).is_err());
        assert!(action(Some(&json!(true))).is_err());
    }

    #[test]
    fn url_rejects_empty_and_non_http() {
        assert!(url(Some(&json!("http://127.0.0.1"))).is_ok());
        assert!(url(Some(&json!(""))).is_err());
        assert!(url(Some(&json!("ftp://host/file"))).is_err());
        assert!(url(Some(&json!(123))).is_err());
        assert!(url(None).is_err());
    }

    #[test]
    fn method_falls_back_per_action() {
        let m = method(Some(&json!(123)), Action::Download);
        assert_eq!(m.value, Method::Get);
        assert!(m.fell_back);

        let m = method(Some(&json!("")), Action::Download);
        assert_eq!(m.value, Method::Get);

        let m = method(Some(&json!("get")), Action::Upload);
        assert_eq!(m.value, Method::Post);

        let m = method(Some(&json!("put")), Action::Upload);
        assert_eq!(m.value, Method::Put);
        assert!(!m.fell_back);
    }

    #[test]
    fn flags_accept_string_literals() {
        assert!(flag(Some(&json!("true")), false).value);
        assert!(!flag(Some(&json!("FALSE")), true).value);
        let invalid = flag(Some(&json!(1)), true);
        assert!(!invalid.value);
        assert!(invalid.fell_back);
        assert!(flag(None, true).value);
    }

    #[test]
    fn mode_and_network_normalize() {
        assert_eq!(mode(Some(&json!("FrontEnd"))).value, Mode::Frontend);
        assert_eq!(mode(Some(&json!(1))).value, Mode::Frontend);
        assert_eq!(mode(Some(&json!("bogus"))).value, Mode::Background);
        assert_eq!(network(Some(&json!(2))).value, Network::Cellular);
        assert_eq!(network(Some(&json!(99))).value, Network::Any);
        assert!(network(Some(&json!("satellite"))).fell_back);
    }

    #[test]
    fn range_end_treats_negative_as_open() {
        assert_eq!(range_end(Some(&json!(10))).value, Some(10));
        assert_eq!(range_end(Some(&json!(-1))).value, None);
        assert!(range_end(Some(&json!("10"))).fell_back);
    }

    #[test]
    fn string_map_shapes() {
        let map = string_map("headers", Some(&json!({"a": "b", "n": 1})))
            .unwrap()
            .unwrap();
        assert_eq!(map["a"], "b");
        assert_eq!(map["n"], "1");

        let map = string_map("headers", Some(&json!(r#"{"x":"y"}"#)))
            .unwrap()
            .unwrap();
        assert_eq!(map["x"], "y");

        assert!(string_map("headers", None).unwrap().is_none());
        assert!(string_map("headers", Some(&json!(5))).is_err());
        assert!(string_map("headers", Some(&json!("not json"))).is_err());
    }
}
