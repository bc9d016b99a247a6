//! Service-account authentication against Google's OAuth2 token endpoint.
//!
//! `yup-oauth2` does the actual two-legged JWT-bearer flow (see
//! <https://developers.google.com/identity/protocols/oauth2/service-account#httprest>).
//! Our credentials arrive as loose environment variables rather than as a
//! key file, so this module is mostly about mapping them onto its
//! `ServiceAccountKey` and mapping its tokens back onto ours.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use yup_oauth2::{ServiceAccountAuthenticator, ServiceAccountKey};

use crate::config::Credentials;

pub const SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/earthengine",
    "https://www.googleapis.com/auth/cloud-platform",
];

/// Google's tokens last an hour unless told otherwise.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// A bearer token and the moment it stops being useful.
#[derive(Clone, Debug)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Whether the token expires within `margin` of `now`.
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at - margin <= now
    }
}

/// Assemble the key-file structure from our environment credentials.
pub fn service_account_key(credentials: &Credentials, token_uri: &str) -> Result<ServiceAccountKey> {
    if credentials.client_email.is_empty() {
        bail!("service account email is not configured (EE_CLIENT_EMAIL)");
    }

    if credentials.private_key.trim().is_empty() {
        bail!("service account private key is not configured (EE_PRIVATE_KEY)");
    }

    Ok(ServiceAccountKey {
        key_type: Some("service_account".to_owned()),
        project_id: Some(credentials.project_id.clone()).filter(|p| !p.is_empty()),
        private_key_id: None,
        private_key: credentials.private_key.clone(),
        client_email: credentials.client_email.clone(),
        client_id: None,
        auth_uri: None,
        token_uri: token_uri.to_owned(),
        auth_provider_x509_cert_url: None,
        client_x509_cert_url: None,
    })
}

/// Convert what the OAuth library hands back into our token type.
fn convert_token(
    value: Option<&str>,
    expires_at_unix: Option<i64>,
    now: DateTime<Utc>,
) -> Result<AccessToken> {
    let value = match value {
        Some(v) if !v.is_empty() => v.to_owned(),
        _ => bail!("token endpoint returned no access token"),
    };

    let expires_at = match expires_at_unix {
        Some(t) => DateTime::from_timestamp(t, 0)
            .with_context(|| format!("token expiry {t} is out of range"))?,
        None => now + Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS),
    };

    Ok(AccessToken { value, expires_at })
}

/// Run the service-account flow and return a fresh access token.
pub async fn request_token(credentials: &Credentials, token_uri: &str) -> Result<AccessToken> {
    let key = service_account_key(credentials, token_uri)?;

    let auth = ServiceAccountAuthenticator::builder(key)
        .build()
        .await
        .context("unable to load service account key")?;

    let token = auth.token(&SCOPES).await?;

    convert_token(
        token.token(),
        token.expiration_time().map(|t| t.unix_timestamp()),
        Utc::now(),
    )
}
