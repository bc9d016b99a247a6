//! "Bare" version of the Sentinel-2 thumbnail Lambda.
//!
//! This executable defines a server that you can easily interact with locally.
//! The event payload is the request body and the request is always treated as
//! a POST. Non-200 replies come back as Lambda errors, since the buffered
//! runtime has no other way to signal failure.

use lambda_http::http::Method;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::Value;

use sentinel_thumb_lambda::Services;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let svcs = Services::init()?;
    let ref_svcs = &svcs;

    run(service_fn(|event: LambdaEvent<Value>| async move {
        let (payload, _context) = event.into_parts();
        let body = serde_json::to_vec(&payload)?;
        ref_svcs.handle(&Method::POST, &body).await.into_result()
    }))
    .await?;
    Ok(())
}
