//! Parameter digests recorded in processing sidecars.

use serde::Serialize;
use sha2::{Digest, Sha256};
use ucal_core::errors::UcalError;

use crate::serde::to_canonical_json_bytes;

/// Lowercase hex SHA-256 of `value`'s key-sorted JSON encoding.
///
/// Two parameter sets that serialize to the same fields hash identically no
/// matter the field order of the originating struct.
pub fn stable_hash_string<T: Serialize>(value: &T) -> Result<String, UcalError> {
    let digest = Sha256::digest(to_canonical_json_bytes(value)?);
    Ok(digest.iter().map(|byte| format!("{byte:02x}")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn digest_ignores_field_order() {
        let a = stable_hash_string(&json!({"state": "SCAN1", "rms_cutoff": 0.2})).unwrap();
        let b = stable_hash_string(&json!({"rms_cutoff": 0.2, "state": "SCAN1"})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.bytes().all(|byte| byte.is_ascii_hexdigit() && !byte.is_ascii_uppercase()));
    }
}
