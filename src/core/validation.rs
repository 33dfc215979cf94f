//! Secret path validation and lexical cleaning.
//!
//! Secret names are forward-slash separated, relative and normalized.
//! Storage paths are cleaned lexically and must stay inside the store root.

use crate::error::{Result, StorageError, StoreError};

/// Convert native separators to forward slashes.
///
/// Only Windows uses backslashes as separators; elsewhere a backslash is
/// an ordinary filename byte.
pub fn to_slash(name: &str) -> String {
    if cfg!(windows) {
        name.replace('\\', "/")
    } else {
        name.to_string()
    }
}

/// Validate a secret name supplied through the public API.
///
/// # Arguments
///
/// * `name` - Secret path as given by the caller
///
/// # Returns
///
/// The normalized name.
///
/// # Errors
///
/// Returns `StorageError::Sneaky` for absolute paths or `..` segments and
/// `StoreError::InvalidName` for empty names, empty segments or `.` segments.
pub fn validate_name(name: &str) -> Result<String> {
    let name = to_slash(name);
    if name.is_empty() {
        return Err(invalid(&name, "name is empty"));
    }
    if name.starts_with('/') {
        return Err(StorageError::Sneaky(name).into());
    }
    if name.contains("//") {
        return Err(invalid(&name, "contains an empty path segment"));
    }
    for segment in name.split('/') {
        match segment {
            ".." => return Err(StorageError::Sneaky(name).into()),
            "." => return Err(invalid(&name, "contains a `.` segment")),
            "" => return Err(invalid(&name, "ends with a separator")),
            _ => {}
        }
    }
    Ok(name)
}

fn invalid(name: &str, reason: &str) -> crate::error::Error {
    StoreError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Lexically clean a store-relative path.
///
/// Leading separators are ignored, `.` segments dropped and `..` resolved.
/// The empty string denotes the store root.
///
/// # Errors
///
/// Returns `StorageError::Sneaky` if a `..` segment would leave the root.
pub fn clean(name: &str) -> Result<String> {
    let name = to_slash(name);
    let mut parts: Vec<&str> = Vec::new();
    for segment in name.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(StorageError::Sneaky(name.clone()).into());
                }
            }
            s => parts.push(s),
        }
    }
    Ok(parts.join("/"))
}

/// Parent directory of a slash path, or `""` at the top level.
pub fn parent(name: &str) -> &str {
    match name.trim_end_matches('/').rfind('/') {
        Some(i) => &name[..i],
        None => "",
    }
}

/// Last segment of a slash path.
pub fn basename(name: &str) -> &str {
    let trimmed = name.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(i) => &trimmed[i + 1..],
        None => trimmed,
    }
}

/// Join two slash paths, skipping empty components.
pub fn join(a: &str, b: &str) -> String {
    let a = a.trim_end_matches('/');
    let b = b.trim_start_matches('/');
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_string(),
        (_, true) => a.to_string(),
        _ => format!("{a}/{b}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ErrorKind};
    use proptest::prelude::*;

    #[test]
    fn test_valid_names() {
        assert_eq!(validate_name("note").unwrap(), "note");
        assert_eq!(validate_name("a/b/c").unwrap(), "a/b/c");
        assert_eq!(validate_name("web/.hidden").unwrap(), "web/.hidden");
    }

    #[test]
    fn test_rejects_dot_dot() {
        let err = validate_name("a/../../etc/passwd").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Sneaky);
    }

    #[test]
    fn test_rejects_absolute() {
        let err = validate_name("/etc/passwd").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Sneaky);
    }

    #[test]
    fn test_rejects_double_slash() {
        let err = validate_name("a//b").unwrap_err();
        assert!(matches!(
            err,
            Error::Store(StoreError::InvalidName { .. })
        ));
    }

    #[test]
    fn test_rejects_empty_and_trailing() {
        assert!(validate_name("").is_err());
        assert!(validate_name("a/").is_err());
        assert!(validate_name("a/./b").is_err());
    }

    #[test]
    fn test_clean() {
        assert_eq!(clean("a/./b/../c").unwrap(), "a/c");
        assert_eq!(clean("/a/b").unwrap(), "a/b");
        assert_eq!(clean("").unwrap(), "");
        assert!(clean("a/../../b").is_err());
    }

    #[test]
    fn test_parent_and_basename() {
        assert_eq!(parent("a/b/c"), "a/b");
        assert_eq!(parent("c"), "");
        assert_eq!(basename("a/b/c"), "c");
        assert_eq!(basename("a/b/"), "b");
        assert_eq!(join("", "x"), "x");
        assert_eq!(join("a/", "/x"), "a/x");
    }

    proptest! {
        #[test]
        fn prop_clean_never_escapes(segments in proptest::collection::vec("[a-z]{1,4}|\\.\\.|\\.", 0..8)) {
            let path = segments.join("/");
            if let Ok(cleaned) = clean(&path) {
                prop_assert!(!cleaned.split('/').any(|s| s == ".." || s == "."));
                prop_assert!(!cleaned.starts_with('/'));
            }
        }

        #[test]
        fn prop_valid_names_are_fixed_points(segments in proptest::collection::vec("[a-z0-9_-]{1,6}", 1..6)) {
            let name = segments.join("/");
            let validated = validate_name(&name).unwrap();
            prop_assert_eq!(clean(&validated).unwrap(), validated);
        }
    }
}
