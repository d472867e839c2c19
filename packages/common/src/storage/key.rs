use super::error::StorageError;

/// Validate a blob key before it is mapped onto a backend namespace.
///
/// Keys are flat or `/`-separated relative names. Empty segments, `.`/`..`
/// segments, backslashes, and control characters are rejected.
pub fn validate_key(key: &str) -> Result<&str, StorageError> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("key cannot be empty".into()));
    }
    if key.chars().any(|c| c.is_control()) {
        return Err(StorageError::InvalidKey(
            "key cannot contain control characters".into(),
        ));
    }
    if key.contains('\\') {
        return Err(StorageError::InvalidKey(
            "key cannot contain backslashes".into(),
        ));
    }
    for segment in key.split('/') {
        match segment {
            "" => {
                return Err(StorageError::InvalidKey(format!(
                    "key has an empty segment: {key}"
                )));
            }
            "." | ".." => {
                return Err(StorageError::InvalidKey(format!(
                    "key cannot contain '{segment}' segments"
                )));
            }
            _ => {}
        }
    }
    Ok(key)
}

/// Join an optional prefix and a validated key with `/`.
pub fn prefixed_key(prefix: &str, key: &str) -> Result<String, StorageError> {
    let key = validate_key(key)?;
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        Ok(key.to_string())
    } else {
        validate_key(prefix)?;
        Ok(format!("{prefix}/{key}"))
    }
}
