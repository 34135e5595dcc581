use snafu::ResultExt;

use super::auth::TokenProvider;
use super::config::TransportConfig;
use super::error::{BuildHttpClientSnafu, HttpStatusSnafu, TransportResult};

// Streaming bodies may stay open for minutes, so only the connect phase is bounded here.
pub(crate) fn build_client(config: &TransportConfig) -> TransportResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .build()
        .context(BuildHttpClientSnafu {
            stage: "build-http-client",
        })
}

pub(crate) fn authorize(
    builder: reqwest::RequestBuilder,
    tokens: &dyn TokenProvider,
) -> reqwest::RequestBuilder {
    match tokens.bearer_token() {
        Some(token) => builder.bearer_auth(token),
        None => builder,
    }
}

pub(crate) async fn ensure_success(
    response: reqwest::Response,
    stage: &'static str,
) -> TransportResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    HttpStatusSnafu {
        stage,
        status: status.as_u16(),
        body,
    }
    .fail()
}
