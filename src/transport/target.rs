use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::error::{SessionError, SessionResult};
use crate::session::SettingsContext;

/// Bearer credential for the voice service
///
/// Never printed: `Debug` is redacted and the value is only reachable through
/// `expose`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// Everything the voice service needs to authenticate and route a session
#[derive(Debug, Clone)]
pub struct SessionTarget {
    pub session_id: String,
    pub token: AuthToken,
    pub settings: SettingsContext,
}

impl SessionTarget {
    pub fn new(session_id: impl Into<String>, token: AuthToken, settings: SettingsContext) -> Self {
        Self {
            session_id: session_id.into(),
            token,
            settings,
        }
    }

    /// Connection URL carrying session id, token and settings as query fields
    pub fn connect_url(&self, endpoint: &str) -> SessionResult<Url> {
        self.build_url(endpoint, self.token.expose())
    }

    /// Connection URL safe to log
    pub fn redacted_url(&self, endpoint: &str) -> String {
        match self.build_url(endpoint, "redacted") {
            Ok(url) => url.into(),
            Err(_) => endpoint.to_string(),
        }
    }

    fn build_url(&self, endpoint: &str, token: &str) -> SessionResult<Url> {
        let mut url = Url::parse(endpoint)
            .map_err(|e| SessionError::ConnectFailed(format!("invalid endpoint {}: {}", endpoint, e)))?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("sessionId", &self.session_id)
                .append_pair("token", token);
            for (key, value) in self.settings.query_pairs() {
                query.append_pair(key, value);
            }
        }

        Ok(url)
    }
}
