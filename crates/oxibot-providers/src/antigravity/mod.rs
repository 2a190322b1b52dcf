//! Antigravity provider: OAuth credential management, Gemini wire format
//! translation, and the `LlmProvider` implementation that ties them together.
//!
//! Ported from nanobot's `providers/antigravity/` package.

mod constants;
mod credentials;
mod oauth;
mod provider;
mod schema;

pub use constants::{DEFAULT_MODEL, KNOWN_MODELS};
pub use credentials::{Credential, CredentialError, CredentialStore, LogoutTarget};
pub use oauth::{login, LoginError};
pub use provider::AntigravityProvider;
pub use schema::{messages_to_gemini, parse_gemini_response, parse_sse_chunk, sanitize_schema, tools_to_gemini};

/// Whether `model` should be routed to the Antigravity provider rather than
/// a configured HTTP provider: it matches a known Antigravity model name, or
/// carries the `antigravity-` routing prefix.
pub fn is_antigravity_model(model: &str) -> bool {
    let lower = model.to_lowercase();
    if lower.starts_with("antigravity-") {
        return true;
    }
    KNOWN_MODELS.iter().any(|m| m.eq_ignore_ascii_case(model))
}
