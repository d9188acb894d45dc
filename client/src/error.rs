//! Client error type.

use wire::Fault;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned status {0}")]
    Status(u16),
    #[error("websocket failed: {0}")]
    Ws(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("invalid header value: {0}")]
    InvalidHeader(String),
    #[error("event stream failed: {0}")]
    EventStream(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Ws(Box::new(error))
    }
}

impl From<ClientError> for Fault {
    fn from(error: ClientError) -> Self {
        Fault::Transport(error.to_string())
    }
}
