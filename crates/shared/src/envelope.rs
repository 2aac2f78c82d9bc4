use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response wrapper used by the backend: `{ok, data}` or `{ok, error}`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ApiEnvelope<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiEnvelope<()> {
    pub fn err(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorBody {
    #[serde(default = "default_code")]
    pub code: String,
    pub message: String,
}

fn default_code() -> String {
    "ERROR".to_string()
}

/// Strip the `{ok, data}` wrapper if present. Raw bodies pass through.
pub fn unwrap_envelope(value: Value) -> Result<Value, ErrorBody> {
    let Value::Object(mut map) = value else {
        return Ok(value);
    };

    match map.get("ok").and_then(Value::as_bool) {
        Some(true) => Ok(map.remove("data").unwrap_or(Value::Null)),
        Some(false) => Err(parse_error(map.remove("error"))),
        None => Ok(Value::Object(map)),
    }
}

/// Best-effort read of an error body, which may be an object or a bare string.
pub fn parse_error(value: Option<Value>) -> ErrorBody {
    match value {
        Some(Value::String(message)) => ErrorBody {
            code: default_code(),
            message,
        },
        Some(v @ Value::Object(_)) => serde_json::from_value(v).unwrap_or_else(|_| ErrorBody {
            code: default_code(),
            message: "Unknown error".to_string(),
        }),
        _ => ErrorBody {
            code: default_code(),
            message: "Unknown error".to_string(),
        },
    }
}
