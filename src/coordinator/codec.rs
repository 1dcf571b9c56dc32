//! Wire codecs for coordinator file bodies.
//!
//! The tree stores flat byte strings; these helpers define the five body
//! formats the registry uses: UTF-8 strings, ASCII integers, tab-separated
//! string lists, tab-separated integer lists, and JSON documents.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::CoordError;

pub fn decode_string(path: &str, body: &[u8]) -> Result<String, CoordError> {
    String::from_utf8(body.to_vec()).map_err(|e| CoordError::Codec {
        path: path.to_string(),
        reason: format!("invalid utf-8: {e}"),
    })
}

pub fn encode_int(value: i64) -> Vec<u8> {
    value.to_string().into_bytes()
}

pub fn decode_int(path: &str, body: &[u8]) -> Result<i64, CoordError> {
    let s = decode_string(path, body)?;
    s.trim().parse().map_err(|e| CoordError::Codec {
        path: path.to_string(),
        reason: format!("invalid integer `{s}`: {e}"),
    })
}

/// Encode a string list, fields joined by a single tab.
pub fn encode_list(fields: &[String]) -> Vec<u8> {
    fields.join("\t").into_bytes()
}

/// Decode a string list; any run of whitespace separates fields, so both
/// tab-joined lists and single bare strings decode uniformly. An empty body
/// decodes to an empty list.
pub fn decode_list(path: &str, body: &[u8]) -> Result<Vec<String>, CoordError> {
    let s = decode_string(path, body)?;
    Ok(s.split_whitespace().map(str::to_string).collect())
}

pub fn encode_int_list(fields: &[i64]) -> Vec<u8> {
    fields
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("\t")
        .into_bytes()
}

pub fn decode_int_list(path: &str, body: &[u8]) -> Result<Vec<i64>, CoordError> {
    decode_list(path, body)?
        .iter()
        .map(|f| {
            f.parse().map_err(|e| CoordError::Codec {
                path: path.to_string(),
                reason: format!("invalid integer field `{f}`: {e}"),
            })
        })
        .collect()
}

pub fn encode_json<T: Serialize>(path: &str, value: &T) -> Result<Vec<u8>, CoordError> {
    serde_json::to_vec(value).map_err(|e| CoordError::Codec {
        path: path.to_string(),
        reason: format!("json encode: {e}"),
    })
}

pub fn decode_json<T: DeserializeOwned>(path: &str, body: &[u8]) -> Result<T, CoordError> {
    serde_json::from_slice(body).map_err(|e| CoordError::Codec {
        path: path.to_string(),
        reason: format!("json decode: {e}"),
    })
}
