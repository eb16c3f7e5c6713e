use crate::common::{RollcallError, Result};

/// Lowercases the name and collapses every whitespace run to a single `_`.
///
/// The result names an enrollment directory, so empty names and anything
/// that could escape the enrollment root are rejected.
pub fn normalize_name(raw: &str) -> Result<String> {
    let name = raw
        .split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join("_");

    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(RollcallError::InvalidName(raw.to_string()));
    }

    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases_and_joins_whitespace() {
        assert_eq!(normalize_name("  Ada   Lovelace ").unwrap(), "ada_lovelace");
        assert_eq!(normalize_name("Grace\tHopper").unwrap(), "grace_hopper");
    }

    #[test]
    fn test_rejects_blank() {
        assert!(matches!(normalize_name("   "), Err(RollcallError::InvalidName(_))));
        assert!(normalize_name("").is_err());
    }

    #[test]
    fn test_rejects_path_components() {
        assert!(normalize_name("..").is_err());
        assert!(normalize_name("ada/../bob").is_err());
    }
}
