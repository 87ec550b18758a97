//! OAuth2 implicit-grant helpers for the Dropbox backend
//!
//! The caller opens the authorization URL, keeps the returned state token, and
//! hands the redirect fragment back to [`complete_authorization`] which checks
//! that the state round-tripped unchanged.

use lmio_common::config::BackendConfig;
use lmio_common::{Error, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::Url;

const AUTHORIZE_URL: &str = "https://www.dropbox.com/1/oauth2/authorize";
const STATE_LENGTH: usize = 100;

/// A started authorization: where to send the user and what to expect back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub state: String,
}

/// Opaque CSRF state token
pub fn random_state(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Build the authorization URL with a fresh state token
pub fn authorize(config: &BackendConfig) -> Result<AuthorizationRequest> {
    let state = random_state(STATE_LENGTH);

    let url = Url::parse_with_params(
        AUTHORIZE_URL,
        &[
            ("response_type", "token"),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("state", state.as_str()),
            ("client_id", config.client_id.as_str()),
        ],
    )
    .map_err(|e| Error::Config(format!("Invalid authorization URL: {}", e)))?;

    Ok(AuthorizationRequest { url, state })
}

/// Extract the access token from the redirect fragment after verifying the state
///
/// Accepts either the bare fragment (`access_token=..&state=..`) or a full
/// redirect URL containing it after `#`.
pub fn complete_authorization(redirect: &str, expected_state: &str) -> Result<String> {
    let fragment = redirect
        .split_once('#')
        .map(|(_, f)| f)
        .unwrap_or(redirect);

    let mut token = None;
    let mut state = None;
    let mut error = None;

    for (key, value) in url_pairs(fragment) {
        match key.as_str() {
            "access_token" => token = Some(value),
            "state" => state = Some(value),
            "error" => error = Some(value),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(Error::Auth(format!("Authorization refused: {}", error)));
    }

    if state.as_deref() != Some(expected_state) {
        return Err(Error::Auth("State token mismatch".to_string()));
    }

    token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Auth("Redirect carried no access token".to_string()))
}

fn url_pairs(fragment: &str) -> Vec<(String, String)> {
    // Reuse the URL parser's form decoding for the fragment
    let mut url = match Url::parse("http://fragment.invalid/") {
        Ok(url) => url,
        Err(_) => return Vec::new(),
    };
    url.set_query(Some(fragment));
    url.query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}
