//! Binary payload handling.
//!
//! The store keeps binary columns as `\x`-prefixed hex text. Callers hand us raw buffers, the
//! JSON form of a Node buffer (`{"type": "Buffer", "data": [..]}`), hex text or base64 text.
//! Rows read back from a binary column are turned into the JSON buffer form again.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value as JsonValue};

use crate::{Error, Param, Row};

const HEX_PREFIX: &str = "\\x";

pub(crate) fn to_hex_escape(bytes: &[u8]) -> String {
    format!("{HEX_PREFIX}{}", hex::encode(bytes))
}

pub(crate) fn buffer_json(bytes: &[u8]) -> JsonValue {
    let mut obj = Map::new();
    obj.insert("type".to_owned(), JsonValue::String("Buffer".to_owned()));
    obj.insert(
        "data".to_owned(),
        JsonValue::Array(bytes.iter().map(|b| JsonValue::from(*b)).collect()),
    );

    JsonValue::Object(obj)
}

/// Turns a parameter into the value written to `column`.
///
/// Buffers are always hex encoded. Strings are only treated as binary payloads when the column
/// is declared binary, in which case anything that is not hex or base64 is rejected.
pub(crate) fn normalize_param(column: &str, param: &Param, binary_column: bool) -> crate::Result<JsonValue> {
    match param {
        Param::Bytes(bytes) => Ok(JsonValue::String(to_hex_escape(bytes))),
        Param::Json(value) => normalize_json(column, value, binary_column),
    }
}

pub(crate) fn normalize_json(column: &str, value: &JsonValue, binary_column: bool) -> crate::Result<JsonValue> {
    if let Some(bytes) = buffer_bytes(column, value)? {
        return Ok(JsonValue::String(to_hex_escape(&bytes)));
    }

    if !binary_column {
        return Ok(value.clone());
    }

    match value {
        JsonValue::Null => Ok(JsonValue::Null),
        JsonValue::String(s) => string_payload(column, s).map(|bytes| JsonValue::String(to_hex_escape(&bytes))),
        JsonValue::Array(items) => byte_array(column, items).map(|bytes| JsonValue::String(to_hex_escape(&bytes))),
        other => Err(Error::encoding(
            column,
            format!("expected a buffer, hex or base64 text, got `{other}`"),
        )),
    }
}

/// Maps a binary column value read from the store back to the JSON buffer shape.
pub(crate) fn decode_column(column: &str, value: &JsonValue) -> crate::Result<JsonValue> {
    match value {
        JsonValue::Null => Ok(JsonValue::Null),
        JsonValue::String(s) if s.starts_with(HEX_PREFIX) => hex::decode(&s[HEX_PREFIX.len()..])
            .map(|bytes| buffer_json(&bytes))
            .map_err(|err| Error::shape(column, format!("malformed hex payload: {err}"))),
        JsonValue::Object(_) if is_buffer_object(value) => Ok(value.clone()),
        JsonValue::String(_) => Err(Error::shape(column, "binary column holds text without a \\x prefix")),
        other => Err(Error::shape(column, format!("binary column holds `{other}`"))),
    }
}

/// Decodes the binary `columns` of a row read from the store, in place.
pub(crate) fn decode_row(row: &mut Row, columns: &[String]) -> crate::Result<()> {
    for column in columns {
        if let Some(value) = row.get_mut(column) {
            *value = decode_column(column, value)?;
        }
    }

    Ok(())
}

fn is_buffer_object(value: &JsonValue) -> bool {
    value
        .as_object()
        .and_then(|obj| obj.get("type"))
        .and_then(JsonValue::as_str)
        .is_some_and(|t| t == "Buffer")
}

/// The bytes of a `{"type": "Buffer", "data": [..]}` object, `None` for any other value.
fn buffer_bytes(column: &str, value: &JsonValue) -> crate::Result<Option<Vec<u8>>> {
    if !is_buffer_object(value) {
        return Ok(None);
    }

    match value.get("data") {
        Some(JsonValue::Array(items)) => byte_array(column, items).map(Some),
        _ => Err(Error::encoding(column, "buffer object without a `data` array")),
    }
}

fn byte_array(column: &str, items: &[JsonValue]) -> crate::Result<Vec<u8>> {
    items
        .iter()
        .map(|item| {
            item.as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| Error::encoding(column, format!("`{item}` is not a byte")))
        })
        .collect()
}

fn string_payload(column: &str, s: &str) -> crate::Result<Vec<u8>> {
    if let Some(hex_digits) = s.strip_prefix(HEX_PREFIX) {
        return hex::decode(hex_digits).map_err(|err| Error::encoding(column, format!("malformed hex text: {err}")));
    }

    STANDARD
        .decode(s)
        .map_err(|_| Error::encoding(column, "text is neither \\x-prefixed hex nor base64"))
}
