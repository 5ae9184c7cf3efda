use serde_json::{Value as JsonValue, json};

/// A caller supplied statement parameter.
///
/// Most parameters are plain JSON scalars. Byte buffers get their own variant so the mutation
/// compiler can encode them for binary columns instead of serialising them as number arrays.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Json(JsonValue),
    Bytes(Vec<u8>),
}

impl Param {
    pub fn null() -> Self {
        Param::Json(JsonValue::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Param::Json(JsonValue::Null))
    }

    /// The value as it is sent to the store. Buffers become `\x` hex text.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Param::Json(v) => v.clone(),
            Param::Bytes(bytes) => JsonValue::String(crate::binary::to_hex_escape(bytes)),
        }
    }
}

impl From<JsonValue> for Param {
    fn from(v: JsonValue) -> Self {
        Param::Json(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Json(JsonValue::String(v.to_owned()))
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Json(JsonValue::String(v))
    }
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Param::Json(JsonValue::Bool(v))
    }
}

impl From<i32> for Param {
    fn from(v: i32) -> Self {
        Param::Json(json!(v))
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Json(json!(v))
    }
}

impl From<u64> for Param {
    fn from(v: u64) -> Self {
        Param::Json(json!(v))
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::Json(json!(v))
    }
}

impl From<Vec<u8>> for Param {
    fn from(v: Vec<u8>) -> Self {
        Param::Bytes(v)
    }
}

impl<T> From<Option<T>> for Param
where
    T: Into<Param>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Param::null(),
        }
    }
}

/// Renders a scalar the way it appears in a query string. Strings are not quoted.
pub(crate) fn scalar_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "null".to_owned(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
