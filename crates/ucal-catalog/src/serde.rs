//! Encoding of catalog exports, sidecars and command output.
//!
//! JSON written here has its object keys sorted at every depth, so the same
//! summary or parameter set always produces the same bytes.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use ucal_core::errors::{ErrorInfo, UcalError};

fn encoding_error(code: &str, err: impl ToString) -> UcalError {
    UcalError::Serde(ErrorInfo::new(code, err.to_string()))
}

/// Reorders object keys recursively; `serde_json::Map` keeps insertion order
/// when `preserve_order` is enabled anywhere in the build.
fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, sorted(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        scalar => scalar,
    }
}

fn sorted_value<T: Serialize>(value: &T) -> Result<Value, UcalError> {
    serde_json::to_value(value)
        .map(sorted)
        .map_err(|err| encoding_error("encode.json", err))
}

/// Compact key-sorted JSON, the input of [`crate::hash::stable_hash_string`].
pub fn to_canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, UcalError> {
    serde_json::to_vec(&sorted_value(value)?).map_err(|err| encoding_error("encode.json", err))
}

/// Indented key-sorted JSON printed by the `ucal` commands.
pub fn to_canonical_json_pretty<T: Serialize>(value: &T) -> Result<String, UcalError> {
    serde_json::to_string_pretty(&sorted_value(value)?)
        .map_err(|err| encoding_error("encode.json", err))
}

/// Parses a JSON catalog export.
pub fn from_json_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, UcalError> {
    serde_json::from_slice(data).map_err(|err| encoding_error("decode.json", err))
}

/// Renders a sidecar or configuration document.
pub fn to_yaml_string<T: Serialize>(value: &T) -> Result<String, UcalError> {
    serde_yaml::to_string(value).map_err(|err| encoding_error("encode.yaml", err))
}

/// Parses a YAML catalog export or configuration file.
pub fn from_yaml_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, UcalError> {
    serde_yaml::from_slice(data).map_err(|err| encoding_error("decode.yaml", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_at_every_depth() {
        let value = json!({"b": {"z": 1, "a": [{"y": 2, "x": 3}]}, "a": null});
        let bytes = to_canonical_json_bytes(&value).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":null,"b":{"a":[{"x":3,"y":2}],"z":1}}"#
        );
    }

    #[test]
    fn malformed_export_reports_decode_code() {
        let err = from_json_slice::<Vec<u32>>(b"[1, 2").unwrap_err();
        assert_eq!(err.code(), "decode.json");
    }
}
