//! Client configuration loaded from environment variables.
//!
//! Every setting has a default that targets a local development backend, so
//! a session can be opened with zero configuration. Identity is deliberately
//! absent: the local user and the conversation target are passed to
//! [`ChatSession::open`](crate::session::ChatSession::open) explicitly.

use std::time::Duration;

use portal_shared::constants::{
    DEFAULT_API_URL, DEFAULT_SOCKET_URL, RECONCILE_WINDOW, RECONNECT_DELAY, RECONNECT_MAX_ATTEMPTS,
    RECONNECT_MAX_DELAY, TYPING_WINDOW,
};

use crate::connection::ReconnectPolicy;
use crate::presence::TypingMode;

/// Chat client configuration.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Base URL of the REST API (no trailing slash).
    /// Env: `PORTAL_API_URL`
    /// Default: `http://localhost:5000/api`
    pub api_base_url: String,

    /// URL of the live WebSocket channel.
    /// Env: `PORTAL_SOCKET_URL`
    /// Default: `ws://localhost:5000/ws`
    pub socket_url: String,

    /// Bearer token sent on both the REST and the socket channel.
    /// Env: `PORTAL_AUTH_TOKEN`
    /// Default: none.
    pub auth_token: Option<String>,

    /// Timeout applied to each REST request.
    /// Env: `PORTAL_REQUEST_TIMEOUT_SECS`
    /// Default: 15 seconds.
    pub request_timeout: Duration,

    /// Reconnect schedule after an unexpected drop.
    /// Env: `PORTAL_RECONNECT_DELAY_SECS`, `PORTAL_RECONNECT_MAX_DELAY_SECS`,
    /// `PORTAL_RECONNECT_MAX_ATTEMPTS`
    pub reconnect: ReconnectPolicy,

    /// Window after which a local `stopTyping` is emitted.
    /// Env: `PORTAL_TYPING_WINDOW_MS`
    /// Default: 1000 ms.
    pub typing_window: Duration,

    /// Whether further keystrokes extend the typing window.
    /// Env: `PORTAL_TYPING_MODE` (`fixed` / `debounce`)
    /// Default: `fixed`.
    pub typing_mode: TypingMode,

    /// Timestamp tolerance of the content-based reconcile fallback.
    /// Env: `PORTAL_RECONCILE_WINDOW_MS`
    /// Default: 1000 ms.
    pub reconcile_window: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            socket_url: DEFAULT_SOCKET_URL.to_string(),
            auth_token: None,
            request_timeout: Duration::from_secs(15),
            reconnect: ReconnectPolicy {
                initial_delay: RECONNECT_DELAY,
                max_delay: RECONNECT_MAX_DELAY,
                max_attempts: RECONNECT_MAX_ATTEMPTS,
            },
            typing_window: TYPING_WINDOW,
            typing_mode: TypingMode::FixedWindow,
            reconcile_window: RECONCILE_WINDOW,
        }
    }
}

impl ChatConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("PORTAL_API_URL") {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }

        if let Some(url) = lookup("PORTAL_SOCKET_URL") {
            config.socket_url = url;
        }

        if let Some(token) = lookup("PORTAL_AUTH_TOKEN") {
            if !token.is_empty() {
                config.auth_token = Some(token);
            }
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "PORTAL_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "PORTAL_RECONNECT_DELAY_SECS") {
            config.reconnect.initial_delay = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "PORTAL_RECONNECT_MAX_DELAY_SECS") {
            config.reconnect.max_delay = Duration::from_secs(secs);
        }

        if let Some(n) = parse_var::<u32>(&lookup, "PORTAL_RECONNECT_MAX_ATTEMPTS") {
            config.reconnect.max_attempts = n;
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "PORTAL_TYPING_WINDOW_MS") {
            config.typing_window = Duration::from_millis(ms);
        }

        if let Some(mode) = lookup("PORTAL_TYPING_MODE") {
            match mode.as_str() {
                "fixed" => config.typing_mode = TypingMode::FixedWindow,
                "debounce" => config.typing_mode = TypingMode::Debounce,
                other => {
                    tracing::warn!(value = %other, "Invalid PORTAL_TYPING_MODE, using default");
                }
            }
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "PORTAL_RECONCILE_WINDOW_MS") {
            config.reconcile_window = Duration::from_millis(ms);
        }

        config
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = key, value = %raw, "Invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ChatConfig::default();
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(3));
        assert_eq!(config.typing_window, Duration::from_millis(1000));
        assert_eq!(config.typing_mode, TypingMode::FixedWindow);
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = ChatConfig::from_lookup(lookup_from(&[
            ("PORTAL_API_URL", "https://portal.example.org/api/"),
            ("PORTAL_AUTH_TOKEN", "secret"),
            ("PORTAL_RECONNECT_MAX_ATTEMPTS", "8"),
            ("PORTAL_TYPING_MODE", "debounce"),
        ]));
        assert_eq!(config.api_base_url, "https://portal.example.org/api");
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.reconnect.max_attempts, 8);
        assert_eq!(config.typing_mode, TypingMode::Debounce);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = ChatConfig::from_lookup(lookup_from(&[
            ("PORTAL_RECONNECT_DELAY_SECS", "soon"),
            ("PORTAL_TYPING_MODE", "sometimes"),
            ("PORTAL_AUTH_TOKEN", ""),
        ]));
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(3));
        assert_eq!(config.typing_mode, TypingMode::FixedWindow);
        assert!(config.auth_token.is_none());
    }
}
