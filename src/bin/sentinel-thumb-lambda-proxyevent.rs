//! "Proxy event" version of the Sentinel-2 thumbnail Lambda.
//!
//! This executable defines a server that expects to be interacted with
//! according to AWS API Gateway's "proxy event" protocol. This is what we
//! deploy. The "bare" version of the server is simpler and is more useful for
//! local testing.

use lambda_http::{run, service_fn, Error, Request};

use sentinel_thumb_lambda::Services;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let svcs = Services::init()?;
    let ref_svcs = &svcs;

    run(service_fn(|req: Request| async move { ref_svcs.respond(req).await })).await?;
    Ok(())
}
