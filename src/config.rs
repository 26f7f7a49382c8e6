//! Configuration (ambient stack): env-var and process-default resolution for
//! per-provider API keys/base URLs (§4.4 pre-flight step 2, §6 "Env
//! variables"). No file-format parsing dependency is introduced — callers
//! construct a [`ProcessDefaults`] however they like (from env, from their own
//! config file, from hard-coded test values).

use crate::provider::ProviderShape;

/// Process-wide fallback base URL, tried only after the request field and the
/// per-provider env var have both come up empty (§4.4 pre-flight step 2).
pub const DEFAULT_BASE_URL_ENV: &str = "CONVOY_DEFAULT_BASE_URL";

/// Resolve the API token for `shape`: `<PROVIDER>_API_KEY` (§6). No request-
/// field fallback here — callers that have an explicit token skip this and
/// pass it directly; this is only consulted when the Request didn't supply one.
pub fn resolve_token_from_env(shape: ProviderShape) -> Option<String> {
    std::env::var(format!("{}_API_KEY", shape.env_prefix())).ok()
}

/// Resolve a base URL with the precedence §4.4 pre-flight step 2 specifies:
/// the request field, then `<PROVIDER>_BASE_URL`, then the process-level
/// default env var, then the provider's hard-coded default.
pub fn resolve_base_url(shape: ProviderShape, request_field: Option<&str>) -> String {
    if let Some(url) = request_field {
        if !url.is_empty() {
            return url.to_string();
        }
    }
    if let Ok(url) = std::env::var(format!("{}_BASE_URL", shape.env_prefix())) {
        if !url.is_empty() {
            return url;
        }
    }
    if let Ok(url) = std::env::var(DEFAULT_BASE_URL_ENV) {
        if !url.is_empty() {
            return url;
        }
    }
    shape.default_base_url().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests that touch process env must not run concurrently with each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn request_field_wins_over_everything() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("OPENAI_BASE_URL", "https://env.example.com");
        let resolved = resolve_base_url(ProviderShape::OpenAI, Some("https://request.example.com"));
        assert_eq!(resolved, "https://request.example.com");
        std::env::remove_var("OPENAI_BASE_URL");
    }

    #[test]
    fn falls_back_to_provider_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("ANTHROPIC_BASE_URL");
        std::env::remove_var(DEFAULT_BASE_URL_ENV);
        let resolved = resolve_base_url(ProviderShape::Anthropic, None);
        assert_eq!(resolved, ProviderShape::Anthropic.default_base_url());
    }
}
