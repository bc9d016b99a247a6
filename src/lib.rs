//! The Lambda-powered Sentinel-2 thumbnail service
//!
//! This library crate implements a single HTTP endpoint: POST a polygon, get
//! back a link to a true-color thumbnail of the least-cloudy Sentinel-2 scene
//! covering it, courtesy of Google Earth Engine. The common codebase is
//! compiled into three executables: `sentinel-thumb-lambda-proxyevent`, which
//! speaks AWS API Gateway's "proxy event" protocol and is what we deploy;
//! `sentinel-thumb-lambda-bare`, a plain JSON-in, JSON-out Lambda that's handy
//! for local runtime testing; and `sentinel-thumb-lambda-oneshot`, which runs
//! one request from the command line.
//!
//! Earth Engine's official clients are JavaScript and Python. We talk to its
//! REST API directly instead, so there's a bit of OAuth plumbing in here that
//! the client libraries would otherwise hide.

use lambda_http::{http::Method, Body, Request, Response};
use lambda_runtime::Error;
use tracing_subscriber::EnvFilter;

pub mod auth;
pub mod config;
pub mod earthengine;
pub mod expr;
pub mod session;
pub mod thumbnail;

#[cfg(test)]
mod testing;

use config::Settings;
use earthengine::{EarthEngine, ImageryService};
use session::SessionManager;
use thumbnail::Reply;

pub struct Services {
    settings: Settings,
    session: SessionManager,
    imagery: Box<dyn ImageryService>,
}

impl Services {
    /// Create a state object for the thumbnail Lambda service.
    pub fn init() -> Result<Self, Error> {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_target(false) // don't print the module name
            .without_time() // don't print time (CloudWatch has it)
            .with_writer(std::io::stderr) // keep stdout clean for the oneshot tool
            .init();

        let settings = Settings::from_env()?;

        let client = reqwest::Client::builder()
            .timeout(settings.http_timeout)
            .build()?;
        let imagery = Box::new(EarthEngine::new(client, &settings));

        Ok(Self::with_service(settings, imagery))
    }

    /// Assemble the services around an arbitrary imagery backend.
    pub fn with_service(settings: Settings, imagery: Box<dyn ImageryService>) -> Self {
        Services {
            settings,
            session: SessionManager::new(),
            imagery,
        }
    }

    /// Handle a thumbnail request given its method and raw body.
    pub async fn handle(&self, method: &Method, body: &[u8]) -> Reply {
        thumbnail::handler(
            method,
            body,
            &self.session,
            &self.settings.credentials,
            self.imagery.as_ref(),
        )
        .await
    }

    /// Handle an API Gateway request.
    ///
    /// We read the body as JSON regardless of its declared content type,
    /// since plenty of callers don't bother to set one.
    pub async fn respond(&self, req: Request) -> Result<Response<Body>, Error> {
        let reply = self.handle(req.method(), req.body()).await;

        Ok(Response::builder()
            .status(reply.status)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&reply.body)?))
            .map_err(Box::new)?)
    }
}
