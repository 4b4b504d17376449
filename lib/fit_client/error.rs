use thiserror::Error;

#[derive(Error, Debug)]
pub enum FitClientErr {
    #[error("unexpected status {status} while calling {resource}")]
    UnexpectedStatus { resource: String, status: u16 },

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error("invalid JSON payload from fitness API: {0}")]
    JsonParseError(#[from] serde_json::Error),
}
