//! Composite keys: `\u{0}objectType\u{0}attr1\u{0}attr2\u{0}`.
//!
//! Composite keys live in their own namespace (they all begin with U+0000),
//! so plain range scans never see them and a partial key turns into a
//! contiguous key range.

use crate::error::{LedgerError, LedgerResult};

pub const COMPOSITE_KEY_NAMESPACE: char = '\u{0}';
const MAX_UNICODE_RUNE: char = '\u{10FFFF}';

fn validate_component(component: &str) -> LedgerResult<()> {
    if component.contains(COMPOSITE_KEY_NAMESPACE) || component.contains(MAX_UNICODE_RUNE) {
        return Err(LedgerError::InvalidArgument(format!(
            "composite key component {:?} contains a reserved character",
            component
        )));
    }
    Ok(())
}

pub fn create_composite_key<S: AsRef<str>>(object_type: &str, attributes: &[S]) -> LedgerResult<String> {
    if object_type.is_empty() {
        return Err(LedgerError::InvalidArgument(
            "composite key object type must be a non-empty string".to_string(),
        ));
    }
    validate_component(object_type)?;

    let mut key = String::with_capacity(2 + object_type.len());
    key.push(COMPOSITE_KEY_NAMESPACE);
    key.push_str(object_type);
    key.push(COMPOSITE_KEY_NAMESPACE);
    for attr in attributes {
        let attr = attr.as_ref();
        validate_component(attr)?;
        key.push_str(attr);
        key.push(COMPOSITE_KEY_NAMESPACE);
    }
    Ok(key)
}

/// Inverse of [`create_composite_key`].
pub fn split_composite_key(key: &str) -> LedgerResult<(String, Vec<String>)> {
    let body = key
        .strip_prefix(COMPOSITE_KEY_NAMESPACE)
        .and_then(|rest| rest.strip_suffix(COMPOSITE_KEY_NAMESPACE))
        .ok_or_else(|| LedgerError::InvalidArgument(format!("{:?} is not a composite key", key)))?;

    let mut parts = body.split(COMPOSITE_KEY_NAMESPACE).map(str::to_string);
    let object_type = parts.next().unwrap_or_default();
    if object_type.is_empty() {
        return Err(LedgerError::InvalidArgument(format!(
            "{:?} has an empty object type",
            key
        )));
    }
    Ok((object_type, parts.collect()))
}

pub fn is_composite_key(key: &str) -> bool {
    key.starts_with(COMPOSITE_KEY_NAMESPACE)
}

/// Half-open key range covering every composite key that starts with the
/// given object type and leading attributes.
pub fn partial_key_range<S: AsRef<str>>(object_type: &str, attributes: &[S]) -> LedgerResult<(String, String)> {
    let start = create_composite_key(object_type, attributes)?;
    let mut end = start.clone();
    end.push(MAX_UNICODE_RUNE);
    Ok((start, end))
}
