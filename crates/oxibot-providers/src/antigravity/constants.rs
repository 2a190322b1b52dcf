//! Static constants for the Antigravity OAuth provider.
//!
//! Ported from nanobot's `providers/antigravity/constants.py`. Client ID and
//! secret are the public credentials shipped in the Antigravity desktop
//! client — not a secret we're responsible for protecting.

use rand::seq::SliceRandom;

pub const CLIENT_ID: &str =
    "1071006060591-tmhssin2h21lcre235vtolojh4g403ep.apps.googleusercontent.com";
pub const CLIENT_SECRET: &str = "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";

pub const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
    "https://www.googleapis.com/auth/cclog",
    "https://www.googleapis.com/auth/experimentsandconfigs",
];

pub const API_ENDPOINT_DAILY: &str = "https://daily-cloudcode-pa.sandbox.googleapis.com";
pub const API_ENDPOINT_AUTOPUSH: &str = "https://autopush-cloudcode-pa.sandbox.googleapis.com";
pub const API_ENDPOINT_PROD: &str = "https://cloudcode-pa.googleapis.com";
pub const DEFAULT_API_ENDPOINT: &str = API_ENDPOINT_PROD;

/// Fallback order: daily -> autopush -> prod.
pub const API_ENDPOINT_FALLBACKS: &[&str] =
    &[API_ENDPOINT_DAILY, API_ENDPOINT_AUTOPUSH, API_ENDPOINT_PROD];

pub const GENERATE_CONTENT_PATH: &str = "/v1internal:generateContent";
pub const STREAM_GENERATE_CONTENT_PATH: &str = "/v1internal:streamGenerateContent";
pub const LOAD_CODE_ASSIST_PATH: &str = "/v1internal:loadCodeAssist";

pub const OAUTH_REDIRECT_PORT: u16 = 51121;

pub fn oauth_redirect_uri() -> String {
    format!("http://localhost:{OAUTH_REDIRECT_PORT}/oauth-callback")
}

pub const ANTIGRAVITY_VERSION: &str = "1.15.8";

const ANTIGRAVITY_PLATFORMS: &[&str] = &["windows/amd64", "darwin/arm64", "darwin/amd64"];

/// Short-format User-Agent matching Antigravity Manager behaviour, randomized
/// per request the same way the reference client does.
pub fn randomized_user_agent() -> String {
    let plat = ANTIGRAVITY_PLATFORMS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("windows/amd64");
    format!("antigravity/{ANTIGRAVITY_VERSION} {plat}")
}

fn platform_tag() -> &'static str {
    if cfg!(target_os = "macos") {
        "MACOS"
    } else {
        "WINDOWS"
    }
}

/// Platform tag for the `metadata.platform` field sent to `loadCodeAssist`
/// (same value [`discovery_headers`] embeds in its `Client-Metadata` header).
pub fn platform_tag_for_metadata() -> &'static str {
    platform_tag()
}

/// Full header set used for `loadCodeAssist` (discovery) requests only.
/// Content requests (`generateContent`) must NOT send these — see
/// [`content_request_headers`].
pub fn discovery_headers() -> Vec<(&'static str, String)> {
    vec![
        ("Content-Type", "application/json".to_string()),
        (
            "User-Agent",
            format!(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Antigravity/{ANTIGRAVITY_VERSION} \
                 Chrome/138.0.7204.235 Electron/37.3.1 Safari/537.36"
            ),
        ),
        (
            "X-Goog-Api-Client",
            "google-cloud-sdk vscode_cloudshelleditor/0.1".to_string(),
        ),
        (
            "Client-Metadata",
            format!(
                r#"{{"ideType":"ANTIGRAVITY","platform":"{}","pluginType":"GEMINI"}}"#,
                platform_tag()
            ),
        ),
    ]
}

/// Headers for `generateContent` / `streamGenerateContent` requests.
///
/// Per the reference implementation: Antigravity Manager only sends
/// `User-Agent` on content requests — no `X-Goog-Api-Client`, no
/// `Client-Metadata`. Adding either breaks the request.
pub fn content_request_headers() -> Vec<(&'static str, String)> {
    vec![("User-Agent", randomized_user_agent())]
}

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// Deprecated/shorthand model names mapped to their current equivalents.
pub const MODEL_ALIASES: &[(&str, &str)] = &[
    ("claude-opus-4-5", "claude-opus-4-6-thinking"),
    ("claude-opus-4-5-thinking", "claude-opus-4-6-thinking"),
    ("claude-opus-4-6", "claude-opus-4-6-thinking"),
];

/// Fallback project id when Antigravity doesn't return one (e.g. business accounts).
pub const DEFAULT_PROJECT_ID: &str = "rising-fact-p41fc";

pub const CREDENTIALS_DIR: &str = "antigravity";
pub const CREDENTIALS_FILE: &str = "credentials.json";

pub const RETRYABLE_STATUS_CODES: &[u16] = &[429, 500, 503];
pub const FALLBACK_STATUS_CODES: &[u16] = &[403, 404];
pub const MAX_RETRIES: u32 = 3;
pub const RETRY_BASE_DELAY_SECS: f64 = 1.0;

pub const REJECTED_SCHEMA_KEYS: &[&str] = &["const", "$ref", "$defs", "default", "examples", "title"];
pub const COMPOSITION_SCHEMA_KEYS: &[&str] = &["anyOf", "oneOf", "allOf"];

/// LiteLLM-style provider prefixes stripped during model name resolution.
pub const LITELLM_PREFIXES: &[&str] = &[
    "anthropic/",
    "openai/",
    "google/",
    "bedrock/",
    "vertex_ai/",
    "deepseek/",
    "groq/",
    "openrouter/",
];

/// Bare model names the Antigravity API understands — used to recognize
/// when a user-facing model string should be routed to this provider.
pub const KNOWN_MODELS: &[&str] = &[
    "claude-sonnet-4-5",
    "claude-sonnet-4-5-thinking",
    "claude-opus-4-6-thinking",
    "gemini-3-pro",
    "gemini-3-flash",
    "gemini-2.5-flash",
    "gemini-2.5-pro",
    "gemini-3-flash-preview",
    "gemini-3-pro-preview",
];
