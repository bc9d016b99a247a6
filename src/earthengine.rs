//! The remote imagery service, and our HTTP client for it.
//!
//! The handler only ever talks to the [`ImageryService`] trait, so that the
//! tests can swap in a mock. The real implementation speaks the Earth Engine
//! REST API (<https://developers.google.com/earth-engine/reference/rest>)
//! through a `reqwest` client that is built once and handed in.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use lambda_runtime::tracing;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::{
    auth::{self, AccessToken},
    config::{Credentials, Settings},
    expr::{self, SceneQuery},
    session::Session,
};

/// Rendering parameters for the thumbnail.
#[derive(Clone, Debug, PartialEq)]
pub struct ThumbnailParams {
    pub bands: [&'static str; 3],
    pub min: f64,
    pub max: f64,
    pub width: u32,
    pub height: u32,
    pub format: &'static str,
}

/// An image picked out by a query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    pub id: String,
}

#[async_trait]
pub trait ImageryService: Send + Sync {
    /// First half of the handshake: obtain a token for the service account.
    async fn authenticate(&self, credentials: &Credentials) -> Result<AccessToken>;

    /// Second half of the handshake: check that the token can actually be used
    /// against the project.
    async fn initialize(&self, token: &AccessToken, project: &str) -> Result<()>;

    /// Run the query over the polygon and return the best match, if any.
    async fn first_image(
        &self,
        session: &Session,
        query: &SceneQuery,
        ring: &[[f64; 2]],
    ) -> Result<Option<ImageRef>>;

    /// Ask for a rendering of `image` and return the thumbnail identifier.
    async fn thumbnail_id(
        &self,
        session: &Session,
        image: &ImageRef,
        params: &ThumbnailParams,
    ) -> Result<String>;
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Deserialize)]
struct ComputeValueResponse {
    #[serde(default)]
    result: Value,
}

#[derive(Deserialize)]
struct ThumbnailResponse {
    name: String,
}

#[derive(Debug)]
pub struct EarthEngine {
    client: reqwest::Client,
    api_base: String,
    token_uri: String,
    http_timeout: Duration,
}

impl EarthEngine {
    pub fn new(client: reqwest::Client, settings: &Settings) -> Self {
        EarthEngine {
            client,
            api_base: settings.api_base.clone(),
            token_uri: settings.token_uri.clone(),
            http_timeout: settings.http_timeout,
        }
    }

    fn project_url(&self, project: &str, rest: &str) -> String {
        format!("{}/v1/projects/{}/{}", self.api_base, project, rest)
    }

    /// Send a prepared request and decode the JSON reply, turning Google's
    /// error envelope into something readable.
    async fn send_json<T: DeserializeOwned>(
        &self,
        what: &str,
        req: reqwest::RequestBuilder,
    ) -> Result<T> {
        let resp = req
            .send()
            .await
            .with_context(|| format!("{what} request failed"))?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .with_context(|| format!("failed to read {what} response"))?;

        if !status.is_success() {
            let detail = match serde_json::from_slice::<ErrorEnvelope>(&body) {
                Ok(env) => match (env.error.status, env.error.message) {
                    (Some(s), Some(m)) => format!("{s}: {m}"),
                    (None, Some(m)) => m,
                    (Some(s), None) => s,
                    (None, None) => String::from_utf8_lossy(&body).into_owned(),
                },
                Err(_) => String::from_utf8_lossy(&body).into_owned(),
            };
            bail!("{what} returned {status}: {detail}");
        }

        serde_json::from_slice(&body).with_context(|| format!("malformed {what} response"))
    }
}

#[async_trait]
impl ImageryService for EarthEngine {
    async fn authenticate(&self, credentials: &Credentials) -> Result<AccessToken> {
        // The OAuth library brings its own HTTP client, so it doesn't see our
        // reqwest timeout.
        tokio::time::timeout(
            self.http_timeout,
            auth::request_token(credentials, &self.token_uri),
        )
        .await
        .context("token request timed out")?
    }

    async fn initialize(&self, token: &AccessToken, project: &str) -> Result<()> {
        if project.is_empty() {
            bail!("Earth Engine project is not configured (EE_PROJECT_ID)");
        }

        let _: Value = self
            .send_json(
                "project config",
                self.client
                    .get(self.project_url(project, "config"))
                    .bearer_auth(&token.value),
            )
            .await?;
        Ok(())
    }

    async fn first_image(
        &self,
        session: &Session,
        query: &SceneQuery,
        ring: &[[f64; 2]],
    ) -> Result<Option<ImageRef>> {
        let expression = expr::first_matching_image(query, expr::polygon(ring)).to_expression();

        let resp: ComputeValueResponse = self
            .send_json(
                "computeValue",
                self.client
                    .post(self.project_url(&session.project, "value:compute"))
                    .bearer_auth(&session.token.value)
                    .json(&json!({ "expression": expression })),
            )
            .await?;

        if resp.result.is_null() {
            return Ok(None);
        }

        let id = resp
            .result
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("query result is not a stored image (no `id`)"))?;

        tracing::debug!(id, "query matched an image");
        Ok(Some(ImageRef { id: id.to_owned() }))
    }

    async fn thumbnail_id(
        &self,
        session: &Session,
        image: &ImageRef,
        params: &ThumbnailParams,
    ) -> Result<String> {
        let body = json!({
            "expression": expr::load_image(&image.id).to_expression(),
            "fileFormat": params.format,
            "bandIds": params.bands,
            "visualizationOptions": {
                "ranges": [{ "min": params.min, "max": params.max }],
            },
            "grid": {
                "dimensions": { "width": params.width, "height": params.height },
            },
        });

        let resp: ThumbnailResponse = self
            .send_json(
                "thumbnail",
                self.client
                    .post(self.project_url(&session.project, "thumbnails"))
                    .bearer_auth(&session.token.value)
                    .json(&body),
            )
            .await?;

        thumbnail_id_from_name(&resp.name)
    }
}

/// Thumbnail names look like `projects/{project}/thumbnails/{id}`.
pub fn thumbnail_id_from_name(name: &str) -> Result<String> {
    match name.rsplit_once("/thumbnails/") {
        Some((_, id)) if !id.is_empty() && !id.contains('/') => Ok(id.to_owned()),
        _ => Err(anyhow!("unexpected thumbnail name `{name}`")),
    }
}
