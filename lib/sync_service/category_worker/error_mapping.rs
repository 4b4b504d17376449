//! Maps transport, storage, and credential failures onto the normalized
//! sync error classes that drive retry decisions.

use diesel::result::{DatabaseErrorKind, Error as DieselError};

use crate::credentials::CredentialError;
use crate::fit_client::FitClientErr;

use super::super::types::{SyncError, SyncErrorKind};

/// Classifies an upstream API failure.
///
/// Status codes that cannot improve within one run (bad credentials, missing
/// resources, malformed requests) are fatal; everything transport-shaped is
/// recoverable.
pub fn map_fit_error(err: FitClientErr, operation: &str) -> SyncError {
    match err {
        FitClientErr::UnexpectedStatus { resource, status } => {
            let kind = match status {
                401 => SyncErrorKind::AuthExpired,
                403 => SyncErrorKind::Forbidden,
                404 => SyncErrorKind::NotFound,
                429 => SyncErrorKind::UpstreamUnavailable,
                400..=499 => SyncErrorKind::BadRequest,
                _ => SyncErrorKind::UpstreamUnavailable,
            };
            SyncError::new(
                kind,
                format!("{operation} failed with status {status} on {resource}"),
            )
        }
        FitClientErr::RequestError(err) => SyncError::new(
            SyncErrorKind::UpstreamUnavailable,
            format!("{operation} transport failure: {err}"),
        ),
        FitClientErr::JsonParseError(err) => SyncError::new(
            SyncErrorKind::UpstreamUnavailable,
            format!("{operation} returned an unparseable body: {err}"),
        ),
    }
}

/// Classifies a warehouse write/read failure.
///
/// Unique violations and dropped connections can clear up on the next
/// attempt (the reconciler re-reads existing keys first). Schema-level
/// failures will not.
pub fn map_diesel_error(err: DieselError, operation: &str) -> SyncError {
    let kind = match &err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)
        | DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, _)
        | DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _)
        | DieselError::BrokenTransactionManager => SyncErrorKind::WriteRejected,
        _ => SyncErrorKind::Internal,
    };
    SyncError::new(kind, format!("{operation} failed: {err}"))
}

/// Classifies a connection checkout failure as recoverable; pool exhaustion
/// and transient network faults both clear up on their own.
pub fn map_pool_error(err: impl std::fmt::Display, operation: &str) -> SyncError {
    SyncError::new(
        SyncErrorKind::WriteRejected,
        format!("{operation} could not check out a connection: {err}"),
    )
}

/// Classifies a credential resolution failure.
pub fn map_credential_error(err: CredentialError) -> SyncError {
    match err {
        CredentialError::RefreshRejected { username, message } => SyncError::new(
            SyncErrorKind::AuthExpired,
            format!("refresh token rejected for {username}: {message}"),
        ),
        CredentialError::UnknownUser(username) => SyncError::new(
            SyncErrorKind::NotFound,
            format!("no stored credentials for {username}"),
        ),
        CredentialError::InvalidTimezone { username, timezone } => SyncError::new(
            SyncErrorKind::Internal,
            format!("stored timezone `{timezone}` for {username} does not parse"),
        ),
        CredentialError::Store(message) => SyncError::new(
            SyncErrorKind::UpstreamUnavailable,
            format!("credential store unavailable: {message}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_are_fatal() {
        for (status, kind) in [
            (401, SyncErrorKind::AuthExpired),
            (403, SyncErrorKind::Forbidden),
            (404, SyncErrorKind::NotFound),
            (400, SyncErrorKind::BadRequest),
        ] {
            let mapped = map_fit_error(
                FitClientErr::UnexpectedStatus {
                    resource: "aggregate steps".into(),
                    status,
                },
                "aggregate",
            );
            assert_eq!(mapped.kind, kind, "status {status}");
            assert!(!mapped.is_recoverable(), "status {status}");
        }
    }

    #[test]
    fn server_and_throttle_statuses_are_recoverable() {
        for status in [429, 500, 502, 503] {
            let mapped = map_fit_error(
                FitClientErr::UnexpectedStatus {
                    resource: "aggregate steps".into(),
                    status,
                },
                "aggregate",
            );
            assert_eq!(mapped.kind, SyncErrorKind::UpstreamUnavailable);
            assert!(mapped.is_recoverable());
        }
    }

    #[test]
    fn unique_violation_is_recoverable_write_rejection() {
        let err = DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new("duplicate key value".to_string()),
        );
        let mapped = map_diesel_error(err, "insert steps");
        assert_eq!(mapped.kind, SyncErrorKind::WriteRejected);
        assert!(mapped.is_recoverable());
    }

    #[test]
    fn schema_error_is_fatal() {
        let mapped = map_diesel_error(DieselError::NotFound, "select existing dates");
        assert_eq!(mapped.kind, SyncErrorKind::Internal);
        assert!(!mapped.is_recoverable());
    }

    #[test]
    fn rejected_refresh_maps_to_auth_expired() {
        let mapped = map_credential_error(CredentialError::RefreshRejected {
            username: "casey".into(),
            message: "invalid_grant".into(),
        });
        assert_eq!(mapped.kind, SyncErrorKind::AuthExpired);
    }
}
