use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("failed to build http client on `{stage}`: {source}"))]
    BuildHttpClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("request to {url} failed on `{stage}`: {source}"))]
    SendRequest {
        stage: &'static str,
        url: String,
        source: reqwest::Error,
    },
    #[snafu(display("server returned status {status}: {body}"))]
    HttpStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to read response stream on `{stage}`: {source}"))]
    ReadStream {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("failed to decode batch response on `{stage}`: {source}"))]
    DecodeBatch {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("malformed stream frame '{data}': {source}"))]
    DecodeFrame {
        stage: &'static str,
        data: String,
        source: serde_json::Error,
    },
    #[snafu(display("stream ended before a terminal frame ({buffered} bytes left unframed)"))]
    StreamIncomplete {
        stage: &'static str,
        buffered: usize,
    },
    #[snafu(display("{message}"))]
    RemoteFailure {
        stage: &'static str,
        message: String,
    },
}

pub type TransportResult<T> = Result<T, TransportError>;
