//! "Oneshot" version of the Sentinel-2 thumbnail Lambda.
//!
//! This executable runs one thumbnail request, with the JSON payload given on
//! the command line, and prints the reply. Credentials come from the
//! environment or a `.env` file, same as the Lambdas.

use lambda_http::http::Method;
use lambda_runtime::Error;
use std::env;

use sentinel_thumb_lambda::Services;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let mut args = env::args();
    args.next(); // skip argv[0]

    let json_text = args.next().ok_or_else(|| -> Error {
        r#"first argument should be JSON payload text, e.g. '{"coordinates": [[lng, lat], ...]}'"#
            .into()
    })?;

    let svcs = Services::init()?;
    let reply = svcs.handle(&Method::POST, json_text.as_bytes()).await;

    serde_json::to_writer(std::io::stdout().lock(), &reply.body)?;
    println!();

    reply.into_result()?;
    Ok(())
}
