//! The authenticated session with the imagery service.
//!
//! Setting up a session is a two-step handshake (authenticate, then
//! initialize) that should happen once and then be reused. Requests can arrive
//! concurrently, so the whole handshake runs while holding an async mutex:
//! whoever gets there first does the work, and everyone else queued on the
//! lock picks up the finished session when it's released. A failed handshake
//! leaves the state at `Uninitialized` so that the next request starts over.

use anyhow::Result;
use chrono::{Duration, Utc};
use lambda_runtime::tracing;
use tokio::sync::Mutex;

use crate::{auth::AccessToken, config::Credentials, earthengine::ImageryService};

/// Sessions this close to expiry get re-established.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Clone, Debug)]
pub struct Session {
    pub token: AccessToken,
    pub project: String,
}

#[derive(Clone, Debug, Default)]
pub enum SessionState {
    #[default]
    Uninitialized,
    Authenticating,
    Initializing,
    Ready(Session),
}

impl SessionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready(_))
    }
}

#[derive(Debug, Default)]
pub struct SessionManager {
    state: Mutex<SessionState>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of the current state. Waits for any in-flight handshake.
    pub async fn state(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    /// Return the live session, establishing it first if needed.
    pub async fn ensure(
        &self,
        credentials: &Credentials,
        service: &dyn ImageryService,
    ) -> Result<Session> {
        let mut state = self.state.lock().await;

        if let SessionState::Ready(session) = &*state {
            if !session
                .token
                .expires_within(Duration::seconds(EXPIRY_MARGIN_SECS), Utc::now())
            {
                return Ok(session.clone());
            }

            tracing::info!("Earth Engine token is expiring; re-authenticating");
        }

        match handshake(&mut state, credentials, service).await {
            Ok(session) => {
                *state = SessionState::Ready(session.clone());
                Ok(session)
            }
            Err(e) => {
                *state = SessionState::Uninitialized;
                Err(e)
            }
        }
    }
}

async fn handshake(
    state: &mut SessionState,
    credentials: &Credentials,
    service: &dyn ImageryService,
) -> Result<Session> {
    *state = SessionState::Authenticating;
    tracing::info!("starting Earth Engine authentication");

    let token = match service.authenticate(credentials).await {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("Earth Engine authentication failed: {e:#}");
            return Err(e);
        }
    };

    tracing::info!("Earth Engine authentication succeeded");
    *state = SessionState::Initializing;

    if let Err(e) = service.initialize(&token, &credentials.project_id).await {
        tracing::error!("Earth Engine initialization failed: {e:#}");
        return Err(e);
    }

    tracing::info!("Earth Engine initialized");

    Ok(Session {
        token,
        project: credentials.project_id.clone(),
    })
}
