//! Environment helpers shared by the configuration loaders.

use crate::error::{Error, Result};

/// Reads a non-empty string from the environment.
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Reads an unsigned integer from the environment.
///
/// A missing or blank variable yields `None`; a present but malformed one is
/// a configuration error rather than a silent fallback.
pub fn env_u64(name: &str) -> Result<Option<u64>> {
    match env_string(name) {
        None => Ok(None),
        Some(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|e| Error::config(format!("{name}={value:?}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_string_trims_and_drops_blank() {
        std::env::set_var("OCULUS_TEST_STRING", "  http://example.test  ");
        assert_eq!(
            env_string("OCULUS_TEST_STRING").as_deref(),
            Some("http://example.test")
        );

        std::env::set_var("OCULUS_TEST_BLANK", "   ");
        assert_eq!(env_string("OCULUS_TEST_BLANK"), None);
    }

    #[test]
    fn test_env_u64_parses_and_rejects_garbage() {
        std::env::set_var("OCULUS_TEST_U64", "2500");
        assert_eq!(env_u64("OCULUS_TEST_U64").unwrap(), Some(2500));

        std::env::set_var("OCULUS_TEST_U64_BAD", "soon");
        assert!(matches!(
            env_u64("OCULUS_TEST_U64_BAD"),
            Err(Error::Config(_))
        ));

        assert_eq!(env_u64("OCULUS_TEST_U64_MISSING_98765").unwrap(), None);
    }
}
