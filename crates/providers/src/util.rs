//! Shared utility functions for provider adapters.

use ak_domain::error::Error;

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Resolve an API key from the named environment variable.
pub fn resolve_api_key(env_var: &str) -> ak_domain::error::Result<String> {
    std::env::var(env_var).map_err(|_| {
        Error::Auth(format!(
            "environment variable '{env_var}' not set or not valid UTF-8"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_api_key_reads_env_var() {
        let var_name = "AK_TEST_RESOLVE_ENV_KEY_1234";
        std::env::set_var(var_name, "env-secret-value");
        assert_eq!(resolve_api_key(var_name).unwrap(), "env-secret-value");
        std::env::remove_var(var_name);
    }

    #[test]
    fn resolve_api_key_missing_is_an_error() {
        let err = resolve_api_key("AK_TEST_NONEXISTENT_VAR_8888").unwrap_err();
        assert!(err.to_string().contains("AK_TEST_NONEXISTENT_VAR_8888"));
    }
}
