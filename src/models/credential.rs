// src/models/credential.rs

//! Upstream API credentials.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Secrets needed to authenticate one API session.
///
/// `Debug` output is masked; use [`Credential::label`] in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Application bearer token
    pub bearer_token: String,

    /// CSRF token, sent as both cookie and header
    pub ct0: String,

    /// Session cookie
    pub auth_token: String,
}

impl Credential {
    pub fn new(
        bearer_token: impl Into<String>,
        ct0: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            bearer_token: bearer_token.into(),
            ct0: ct0.into(),
            auth_token: auth_token.into(),
        }
    }

    /// Masked identifier safe for logs.
    pub fn label(&self) -> String {
        mask(&self.auth_token)
    }

    /// Value of the `cookie` request header.
    pub fn cookie_header(&self) -> String {
        format!("auth_token={}; ct0={}", self.auth_token, self.ct0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("bearer_token", &mask(&self.bearer_token))
            .field("ct0", &mask(&self.ct0))
            .field("auth_token", &mask(&self.auth_token))
            .finish()
    }
}

fn mask(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}***")
}
