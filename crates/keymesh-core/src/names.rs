use crate::constants::{NAME_MAX_CHARS, NAME_MIN_CHARS};
use crate::error::KeymeshError;

/// Validate a registrable name and return its normalized (lowercase) form.
///
/// Names are 3–20 ASCII alphanumerics, compared case-insensitively; the
/// lowercase form is what gets keyed.
pub fn normalize_name(name: &str) -> Result<String, KeymeshError> {
    if name.len() < NAME_MIN_CHARS || name.len() > NAME_MAX_CHARS {
        return Err(KeymeshError::InvalidArgument(format!(
            "name must be {}-{} characters",
            NAME_MIN_CHARS, NAME_MAX_CHARS
        )));
    }
    if !name.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(KeymeshError::InvalidArgument(
            "name must be alphanumeric".into(),
        ));
    }
    Ok(name.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_and_normalizes() {
        assert_eq!(normalize_name("Alice").unwrap(), "alice");
        assert_eq!(normalize_name("bob42").unwrap(), "bob42");
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(normalize_name("ab").is_err());
        assert!(normalize_name(&"x".repeat(21)).is_err());
        assert!(normalize_name("has space").is_err());
        assert!(normalize_name("dash-ed").is_err());
        assert!(normalize_name("").is_err());
    }
}
