//! The Sentinel-2 thumbnail service.
//!
//! Given a polygon, find the least-cloudy Sentinel-2 surface reflectance scene
//! over it from the first half of 2024 and hand back a link to a true-color
//! PNG rendering. All of the real work happens on the Earth Engine side; our
//! job is to check the input, keep the session alive, and shape the reply.
//!
//! Request:
//!
//! ```json
//! { "coordinates": [[lng, lat], [lng, lat], [lng, lat], [lng, lat]] }
//! ```
//!
//! Replies are always JSON: `{"url": ...}` on success, otherwise
//! `{"error": ..., "details"?: ...}` with a matching status code.

use lambda_http::http::{Method, StatusCode};
use lambda_runtime::{tracing, Error};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;

use crate::{
    config::Credentials,
    earthengine::{ImageryService, ThumbnailParams},
    expr::SceneQuery,
    session::SessionManager,
};

pub const THUMB_ENDPOINT: &str = "https://earthengine.googleapis.com/api/thumb";

pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub const SCENE_QUERY: SceneQuery = SceneQuery {
    collection: "COPERNICUS/S2_SR",
    start_date: "2024-01-01",
    end_date: "2024-06-01",
    cloud_property: "CLOUDY_PIXEL_PERCENTAGE",
    max_cloud_percent: 20.,
};

pub const THUMBNAIL_PARAMS: ThumbnailParams = ThumbnailParams {
    bands: ["B4", "B3", "B2"],
    min: 0.,
    max: 3000.,
    width: 512,
    height: 512,
    format: "PNG",
};

/// Everything that can go wrong, sorted by how we report it.
#[derive(Debug)]
pub enum ApiError {
    MethodNotAllowed,
    PayloadTooLarge,
    InvalidJson,
    MissingCoordinates,
    InvalidCoordinates(String),
    NoImages,
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::InvalidJson
            | ApiError::MissingCoordinates
            | ApiError::InvalidCoordinates(_) => StatusCode::BAD_REQUEST,
            ApiError::NoImages => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> Value {
        match self {
            ApiError::MethodNotAllowed => json!({ "error": "method not allowed" }),
            ApiError::PayloadTooLarge => json!({ "error": "payload too large" }),
            ApiError::InvalidJson => json!({ "error": "invalid JSON body" }),
            ApiError::MissingCoordinates => json!({ "error": "missing coordinates" }),
            ApiError::InvalidCoordinates(why) => {
                json!({ "error": "invalid coordinates", "details": why })
            }
            ApiError::NoImages => json!({ "error": "no images found" }),
            ApiError::Internal(e) => {
                json!({ "error": "internal server error", "details": format!("{e:#}") })
            }
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::MethodNotAllowed => write!(f, "method not allowed"),
            ApiError::PayloadTooLarge => write!(f, "payload too large"),
            ApiError::InvalidJson => write!(f, "invalid JSON body"),
            ApiError::MissingCoordinates => write!(f, "missing coordinates"),
            ApiError::InvalidCoordinates(why) => write!(f, "invalid coordinates: {}", why),
            ApiError::NoImages => write!(f, "no images found"),
            ApiError::Internal(e) => write!(f, "internal server error: {:#}", e),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

/// A finished HTTP reply.
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
}

impl Reply {
    fn url(url: String) -> Self {
        Reply {
            status: StatusCode::OK,
            body: json!({ "url": url }),
        }
    }

    /// Collapse into the JSON-in, JSON-out convention of the plain Lambda
    /// runtime, where failures have to be errors.
    pub fn into_result(self) -> Result<Value, Error> {
        if self.status.is_success() {
            return Ok(self.body);
        }

        let mut msg = format!(
            "{} {}",
            self.status.as_u16(),
            self.body["error"].as_str().unwrap_or("error")
        );

        if let Some(details) = self.body["details"].as_str() {
            msg.push_str(": ");
            msg.push_str(details);
        }

        Err(msg.into())
    }
}

impl From<ApiError> for Reply {
    fn from(e: ApiError) -> Self {
        Reply {
            status: e.status(),
            body: e.body(),
        }
    }
}

pub fn thumbnail_url(thumb_id: &str) -> String {
    format!("{}?thumbid={}", THUMB_ENDPOINT, thumb_id)
}

/// Handle one request.
pub async fn handler(
    method: &Method,
    body: &[u8],
    session: &SessionManager,
    credentials: &Credentials,
    service: &dyn ImageryService,
) -> Reply {
    tracing::info!(%method, body_bytes = body.len(), "thumbnail request received");

    match handle_inner(method, body, session, credentials, service).await {
        Ok(url) => {
            tracing::info!(%url, "generated thumbnail URL");
            Reply::url(url)
        }

        Err(e) => {
            if matches!(e, ApiError::Internal(_)) {
                tracing::error!("{e}");
            } else {
                tracing::warn!("{e}");
            }

            e.into()
        }
    }
}

async fn handle_inner(
    method: &Method,
    body: &[u8],
    session: &SessionManager,
    credentials: &Credentials,
    service: &dyn ImageryService,
) -> Result<String, ApiError> {
    if *method != Method::POST {
        return Err(ApiError::MethodNotAllowed);
    }

    if body.len() > MAX_BODY_BYTES {
        return Err(ApiError::PayloadTooLarge);
    }

    let payload: Value = serde_json::from_slice(body).map_err(|_| ApiError::InvalidJson)?;
    let ring = parse_ring(&payload)?;

    // Only now do we need the remote service.

    let session = session.ensure(credentials, service).await?;

    let image = service
        .first_image(&session, &SCENE_QUERY, &ring)
        .await?
        .ok_or(ApiError::NoImages)?;

    tracing::info!(image = %image.id, "selected least-cloudy image");

    let thumb_id = service
        .thumbnail_id(&session, &image, &THUMBNAIL_PARAMS)
        .await?;

    Ok(thumbnail_url(&thumb_id))
}

#[derive(Deserialize)]
struct Request {
    coordinates: Option<Vec<Value>>,
}

/// Pull the polygon ring out of the payload.
///
/// Absent, `null`, and empty coordinates all count as missing. Anything else
/// that isn't at least three in-range `[lng, lat]` pairs is invalid.
pub fn parse_ring(payload: &Value) -> Result<Vec<[f64; 2]>, ApiError> {
    if !payload.is_object() {
        return Err(ApiError::InvalidJson);
    }

    let request = Request::deserialize(payload).map_err(|_| {
        ApiError::InvalidCoordinates("coordinates must be an array of [lng, lat] pairs".to_owned())
    })?;

    let coords = match request.coordinates {
        Some(c) if !c.is_empty() => c,
        _ => return Err(ApiError::MissingCoordinates),
    };

    if coords.len() < 3 {
        return Err(ApiError::InvalidCoordinates(format!(
            "a polygon ring needs at least 3 positions, got {}",
            coords.len()
        )));
    }

    let mut ring = Vec::with_capacity(coords.len());

    for (i, pos) in coords.iter().enumerate() {
        let pair = match pos.as_array() {
            Some(p) if p.len() == 2 => p,
            _ => {
                return Err(ApiError::InvalidCoordinates(format!(
                    "position {i} is not a [lng, lat] pair"
                )))
            }
        };

        let (lng, lat) = match (pair[0].as_f64(), pair[1].as_f64()) {
            (Some(lng), Some(lat)) => (lng, lat),
            _ => {
                return Err(ApiError::InvalidCoordinates(format!(
                    "position {i} has non-numeric values"
                )))
            }
        };

        // Written this way so that NaNs fail too.

        if !(lng >= -180. && lng <= 180.) {
            return Err(ApiError::InvalidCoordinates(format!(
                "position {i} has illegal longitude {lng}"
            )));
        }

        if !(lat >= -90. && lat <= 90.) {
            return Err(ApiError::InvalidCoordinates(format!(
                "position {i} has illegal latitude {lat}"
            )));
        }

        ring.push([lng, lat]);
    }

    Ok(ring)
}
