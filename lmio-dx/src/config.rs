//! Access token and navigator option resolution for lmio-dx
//!
//! Token priority: command line → environment (`LMIO_DROPBOX_TOKEN`) →
//! persisted preferences.

use crate::navigation::NavigatorOptions;
use lmio_common::config::TomlConfig;
use lmio_common::preferences::keys;
use lmio_common::{Error, Preferences, Result};
use tracing::{info, warn};

/// Environment variable holding a Dropbox access token
pub const TOKEN_ENV_VAR: &str = "LMIO_DROPBOX_TOKEN";

/// Resolve the access token from its three sources
pub fn resolve_access_token(cli_token: Option<&str>, prefs: &Preferences) -> Result<String> {
    let env_token = std::env::var(TOKEN_ENV_VAR).ok();
    let pref_token = prefs.get_str(keys::DROPBOX_TOKEN);

    let candidates = [
        ("command line", cli_token.map(str::to_string)),
        ("environment", env_token),
        ("preferences", pref_token),
    ];

    let sources: Vec<&str> = candidates
        .iter()
        .filter(|(_, token)| token.as_deref().is_some_and(is_valid_token))
        .map(|(source, _)| *source)
        .collect();

    if sources.len() > 1 {
        warn!(
            "Access token found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    for (source, token) in candidates {
        if let Some(token) = token.filter(|t| is_valid_token(t)) {
            info!("Access token loaded from {}", source);
            return Ok(token);
        }
    }

    Err(Error::Auth(format!(
        "No access token configured. Provide one using one of:\n\
         1. Command line: lmio-dx --token <token>\n\
         2. Environment: {}=<token>\n\
         3. Run `lmio-dx authorize` and complete the sign-in",
        TOKEN_ENV_VAR
    )))
}

/// Non-empty, non-whitespace
pub fn is_valid_token(token: &str) -> bool {
    !token.trim().is_empty()
}

/// Navigator options from the TOML `[navigation]` section; CLI values win
pub fn navigator_options(
    config: &TomlConfig,
    cli_index: Option<usize>,
    cli_auto_save: Option<bool>,
) -> NavigatorOptions {
    NavigatorOptions {
        auto_save: cli_auto_save.unwrap_or(config.navigation.auto_save),
        initial_index: cli_index.or(config.navigation.initial_index),
        preferred_template: None,
        preferred_collection: None,
    }
}
