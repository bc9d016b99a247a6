//! Runtime configuration, sourced from the environment.
//!
//! The Earth Engine service-account credentials arrive as three separate
//! variables rather than as the JSON key file Google hands out, because that's
//! what is convenient to paste into the Lambda console. The private key in
//! particular usually comes through with its line breaks flattened into
//! literal `\n` sequences, which we have to undo before the PEM parser will
//! look at it.

use anyhow::{Context, Result};
use lambda_runtime::tracing;
use std::{fmt, time::Duration};

pub const DEFAULT_API_BASE: &str = "https://earthengine.googleapis.com";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Service-account credentials. Immutable once loaded.
#[derive(Clone, Default)]
pub struct Credentials {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
}

// Hand-written so that the key never ends up in a log line.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field(
                "private_key",
                &if self.private_key.is_empty() {
                    "<unset>"
                } else {
                    "<redacted>"
                },
            )
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub credentials: Credentials,
    pub api_base: String,
    pub token_uri: String,
    pub http_timeout: Duration,
}

impl Settings {
    /// Load settings from the process environment, after pulling in a `.env`
    /// file from the working directory if there is one.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through an arbitrary variable lookup. Missing
    /// credentials are not an error here: they're reported, and then
    /// authentication fails on the first request that needs it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credentials = Credentials {
            project_id: lookup("EE_PROJECT_ID").unwrap_or_default(),
            client_email: lookup("EE_CLIENT_EMAIL").unwrap_or_default(),
            private_key: decode_private_key(&lookup("EE_PRIVATE_KEY").unwrap_or_default()),
        };

        tracing::info!(
            project_id = %credentials.project_id,
            client_email = %credentials.client_email,
            private_key_defined = !credentials.private_key.is_empty(),
            "checked Earth Engine credentials"
        );

        let http_timeout = match lookup("EE_HTTP_TIMEOUT_SECS") {
            Some(text) => Duration::from_secs(
                text.trim()
                    .parse()
                    .with_context(|| format!("illegal EE_HTTP_TIMEOUT_SECS value `{text}`"))?,
            ),
            None => Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        };

        Ok(Settings {
            credentials,
            api_base: lookup("EE_API_BASE")
                .map(|s| s.trim_end_matches('/').to_owned())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_owned()),
            token_uri: lookup("EE_TOKEN_URI").unwrap_or_else(|| DEFAULT_TOKEN_URI.to_owned()),
            http_timeout,
        })
    }

    /// Load settings from a fixed set of variables.
    #[cfg(test)]
    pub fn from_map(vars: &std::collections::HashMap<&str, &str>) -> Result<Self> {
        Self::from_lookup(|name| vars.get(name).map(|v| (*v).to_owned()))
    }
}

/// Turn literal backslash-n sequences into real newlines.
pub fn decode_private_key(raw: &str) -> String {
    raw.replace("\\n", "\n")
}
