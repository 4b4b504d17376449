use thiserror::Error;
use tokio::task::JoinError;

use crate::credentials::CredentialError;
use crate::fit_client::FitClientErr;

#[derive(Error, Debug)]
pub enum Error {
    #[error("connection error: {0}")]
    ConnectError(String),

    #[error(transparent)]
    FitClient(#[from] FitClientErr),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("task join error: {0}")]
    TaskJoinError(#[from] JoinError),

    #[error("orchestration error: {0}")]
    Orchestration(String),
}
