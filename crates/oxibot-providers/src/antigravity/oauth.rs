//! PKCE authorization-code login flow for Antigravity.
//!
//! Ported from nanobot's `providers/antigravity/auth.py::AntigravityAuthManager.login`.
//! Opens the system browser against Google's OAuth consent screen and runs a
//! single-request local HTTP server to catch the redirect.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::info;

use super::constants::{
    oauth_redirect_uri, AUTH_URL, CLIENT_ID, CLIENT_SECRET, OAUTH_REDIRECT_PORT, SCOPES,
    TOKEN_URL, USERINFO_URL,
};
use super::credentials::{Credential, CredentialError};

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(thiserror::Error, Debug)]
pub enum LoginError {
    #[error("login timed out waiting for browser redirect")]
    Timeout,
    #[error("OAuth consent was denied or failed: {0}")]
    Denied(String),
    #[error("state mismatch — possible CSRF, aborting login")]
    StateMismatch,
    #[error("failed to start local callback server: {0}")]
    ServerStart(String),
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
    #[error("failed to fetch account email: {0}")]
    Userinfo(String),
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

fn random_urlsafe(num_bytes: usize) -> String {
    let mut buf = vec![0u8; num_bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

fn pkce_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Run the full interactive login flow: open the browser, wait for the
/// redirect, exchange the code, fetch the account email, and return the
/// resulting credential. The caller is responsible for storing it.
pub async fn login() -> Result<Credential, LoginError> {
    let verifier = random_urlsafe(64);
    let challenge = pkce_challenge(&verifier);
    let state = random_urlsafe(32);

    let auth_url = build_auth_url(&challenge, &state);

    info!("opening browser for Antigravity login");
    if open::that(&auth_url).is_err() {
        println!("Open this URL to continue login:\n  {auth_url}");
    }

    let code = wait_for_callback(&state)?;

    let (access_token, refresh_token, expires_in) = exchange_code(&code, &verifier).await?;
    let email = fetch_email(&access_token).await?;

    Ok(Credential {
        access_token,
        refresh_token,
        expires_at: chrono::Utc::now().timestamp() + expires_in,
        email,
    })
}

fn build_auth_url(challenge: &str, state: &str) -> String {
    let scope = SCOPES.join(" ");
    let redirect_uri = oauth_redirect_uri();
    let params = [
        ("client_id", CLIENT_ID),
        ("redirect_uri", redirect_uri.as_str()),
        ("response_type", "code"),
        ("scope", scope.as_str()),
        ("state", state),
        ("code_challenge", challenge),
        ("code_challenge_method", "S256"),
        ("access_type", "offline"),
        ("prompt", "consent"),
    ];
    let query: String = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    format!("{AUTH_URL}?{query}")
}

/// Block the current thread on a single HTTP request to the local callback
/// server, validating `state` and extracting `code` (or the OAuth `error`
/// parameter).
fn wait_for_callback(expected_state: &str) -> Result<String, LoginError> {
    let server = tiny_http::Server::http(format!("127.0.0.1:{OAUTH_REDIRECT_PORT}"))
        .map_err(|e| LoginError::ServerStart(e.to_string()))?;

    let request = server
        .recv_timeout(CALLBACK_TIMEOUT)
        .map_err(|e| LoginError::ServerStart(e.to_string()))?
        .ok_or(LoginError::Timeout)?;

    let query = request.url().splitn(2, '?').nth(1).unwrap_or("").to_string();
    let params: std::collections::HashMap<String, String> =
        url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();

    let body_for = |ok: bool| {
        if ok {
            "<html><body><h3>Antigravity login complete. You can close this tab.</h3></body></html>"
        } else {
            "<html><body><h3>Antigravity login failed. You can close this tab.</h3></body></html>"
        }
    };

    if let Some(err) = params.get("error") {
        let err = err.clone();
        let response = tiny_http::Response::from_string(body_for(false))
            .with_header(html_header());
        let _ = request.respond(response);
        return Err(LoginError::Denied(err));
    }

    let state = params.get("state").cloned().unwrap_or_default();
    let code = params.get("code").cloned();

    if state != expected_state {
        let response = tiny_http::Response::from_string(body_for(false)).with_header(html_header());
        let _ = request.respond(response);
        return Err(LoginError::StateMismatch);
    }

    let code = code.ok_or_else(|| LoginError::Denied("no authorization code returned".to_string()))?;
    let response = tiny_http::Response::from_string(body_for(true)).with_header(html_header());
    let _ = request.respond(response);

    Ok(code)
}

fn html_header() -> tiny_http::Header {
    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..]).unwrap()
}

async fn exchange_code(code: &str, verifier: &str) -> Result<(String, String, i64), LoginError> {
    #[derive(Deserialize)]
    struct TokenResponse {
        access_token: String,
        #[serde(default)]
        refresh_token: String,
        #[serde(default = "default_expires_in")]
        expires_in: i64,
    }
    fn default_expires_in() -> i64 {
        3600
    }

    let redirect_uri = oauth_redirect_uri();
    let client = reqwest::Client::new();
    let resp = client
        .post(TOKEN_URL)
        .form(&[
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
            ("code", code),
            ("code_verifier", verifier),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri.as_str()),
        ])
        .send()
        .await
        .map_err(|e| LoginError::TokenExchange(e.to_string()))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(LoginError::TokenExchange(format!("{status}: {body}")));
    }

    let data: TokenResponse = resp
        .json()
        .await
        .map_err(|e| LoginError::TokenExchange(e.to_string()))?;

    if data.refresh_token.is_empty() {
        return Err(LoginError::TokenExchange(
            "no refresh token in response — revoke access at myaccount.google.com/permissions \
             and try again"
                .to_string(),
        ));
    }

    Ok((data.access_token, data.refresh_token, data.expires_in))
}

async fn fetch_email(access_token: &str) -> Result<String, LoginError> {
    #[derive(Deserialize)]
    struct UserInfo {
        #[serde(default)]
        email: String,
    }

    let client = reqwest::Client::new();
    let resp = client
        .get(USERINFO_URL)
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| LoginError::Userinfo(e.to_string()))?;

    if !resp.status().is_success() {
        let status = resp.status();
        return Err(LoginError::Userinfo(format!("userinfo request failed: {status}")));
    }

    let info: UserInfo = resp.json().await.map_err(|e| LoginError::Userinfo(e.to_string()))?;
    if info.email.is_empty() {
        return Err(LoginError::Userinfo("userinfo response had no email".to_string()));
    }
    Ok(info.email)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_challenge_is_stable_and_urlsafe() {
        let verifier = "a-fixed-test-verifier-string";
        let challenge = pkce_challenge(verifier);
        assert_eq!(challenge, pkce_challenge(verifier));
        assert!(!challenge.contains('+'));
        assert!(!challenge.contains('/'));
        assert!(!challenge.contains('='));
    }

    #[test]
    fn random_urlsafe_produces_distinct_values() {
        let a = random_urlsafe(32);
        let b = random_urlsafe(32);
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn auth_url_contains_required_params() {
        let url = build_auth_url("challenge123", "state456");
        assert!(url.starts_with(AUTH_URL));
        assert!(url.contains("code_challenge=challenge123"));
        assert!(url.contains("state=state456"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("access_type=offline"));
    }
}
