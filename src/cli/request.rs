use reqwest::Method;

use crate::args::parse_body_args;
use crate::cli::connect;
use crate::cli::output::{print_response, report_session_events, OutputMode};
use crate::error::FarmgateError;
use crate::types::ApiRequest;

pub fn parse_method(raw: &str) -> Result<Method, FarmgateError> {
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
        .map_err(|_| FarmgateError::InvalidArgument(format!("invalid HTTP method '{raw}'")))
}

/// Send an arbitrary request through the authorization pipeline.
pub async fn run_request(
    config_path: Option<&str>,
    method: &str,
    path: &str,
    args: &[String],
    json: bool,
) -> Result<(), FarmgateError> {
    let method = parse_method(method)?;
    let mut request = ApiRequest::new(method, path);
    if let Some(body) = parse_body_args(args)? {
        request = request.with_body(body);
    }
    let label = request.label();

    let client = connect(config_path)?;
    let mut events = client.session().subscribe();
    let result = client.send(request).await;
    report_session_events(&mut events);

    let response = result?.error_for_status(&label)?;
    print_response(&response, OutputMode::from_flag(json));
    Ok(())
}
