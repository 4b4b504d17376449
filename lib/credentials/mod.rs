use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use diesel::prelude::*;
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use futures::future::BoxFuture;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::db::schema::fit_users;

const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("unknown user: {0}")]
    UnknownUser(String),

    #[error("refresh token rejected for {username}: {message}")]
    RefreshRejected { username: String, message: String },

    #[error("invalid timezone `{timezone}` stored for {username}")]
    InvalidTimezone { username: String, timezone: String },

    #[error("credential store error: {0}")]
    Store(String),
}

/// One user's authenticated upstream session plus their home timezone.
///
/// Attempt-scoped: the coordinator resolves one session per user per run and
/// hands it to every category attempt for that user.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub username: String,
    pub access_token: String,
    pub timezone: Tz,
}

/// Supplies a valid authenticated session per username.
///
/// A rejected refresh is surfaced as `RefreshRejected` and classified fatal
/// downstream: stale refresh tokens will not self-heal within a retry window.
pub trait SessionProvider: Send + Sync {
    fn session_for<'a>(
        &'a self,
        username: &'a str,
    ) -> BoxFuture<'a, Result<AuthenticatedSession, CredentialError>>;

    fn list_usernames<'a>(&'a self) -> BoxFuture<'a, Result<Vec<String>, CredentialError>>;
}

impl<T> SessionProvider for Arc<T>
where
    T: SessionProvider + ?Sized,
{
    fn session_for<'a>(
        &'a self,
        username: &'a str,
    ) -> BoxFuture<'a, Result<AuthenticatedSession, CredentialError>> {
        (**self).session_for(username)
    }

    fn list_usernames<'a>(&'a self) -> BoxFuture<'a, Result<Vec<String>, CredentialError>> {
        (**self).list_usernames()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Production provider: reads the user registry from the warehouse and
/// exchanges the stored refresh token at the OAuth token endpoint.
pub struct OauthSessionProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    pool: Pool<AsyncPgConnection>,
}

impl OauthSessionProvider {
    pub fn new(
        token_url: String,
        client_id: String,
        client_secret: String,
        pool: Pool<AsyncPgConnection>,
    ) -> Result<Self, CredentialError> {
        let http = reqwest::Client::builder()
            .timeout(TOKEN_REQUEST_TIMEOUT)
            .build()
            .map_err(|err| CredentialError::Store(format!("http client build failed: {err}")))?;

        Ok(Self {
            http,
            token_url,
            client_id,
            client_secret,
            pool,
        })
    }

    async fn lookup_user(&self, username: &str) -> Result<(String, String), CredentialError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|err| CredentialError::Store(format!("pool connection failed: {err}")))?;

        let row: Option<(String, String)> = fit_users::table
            .filter(fit_users::username.eq(username))
            .select((fit_users::refresh_token, fit_users::timezone))
            .first::<(String, String)>(&mut conn)
            .await
            .optional()
            .map_err(|err| CredentialError::Store(format!("user lookup failed: {err}")))?;

        row.ok_or_else(|| CredentialError::UnknownUser(username.to_string()))
    }

    async fn exchange_refresh_token(
        &self,
        username: &str,
        refresh_token: &str,
    ) -> Result<String, CredentialError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|err| CredentialError::Store(format!("token endpoint unreachable: {err}")))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::RefreshRejected {
                username: username.to_string(),
                message: format!("token endpoint returned {status}: {body}"),
            });
        }
        if !status.is_success() {
            return Err(CredentialError::Store(format!(
                "token endpoint returned {status} for {username}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| CredentialError::Store(format!("token response decode failed: {err}")))?;

        Ok(token.access_token)
    }
}

impl SessionProvider for OauthSessionProvider {
    fn session_for<'a>(
        &'a self,
        username: &'a str,
    ) -> BoxFuture<'a, Result<AuthenticatedSession, CredentialError>> {
        Box::pin(async move {
            let (refresh_token, timezone_name) = self.lookup_user(username).await?;
            let timezone: Tz =
                timezone_name
                    .parse()
                    .map_err(|_| CredentialError::InvalidTimezone {
                        username: username.to_string(),
                        timezone: timezone_name.clone(),
                    })?;

            let access_token = self.exchange_refresh_token(username, &refresh_token).await?;
            debug!(event = "session_resolved", username, timezone = %timezone, "resolved session");

            Ok(AuthenticatedSession {
                username: username.to_string(),
                access_token,
                timezone,
            })
        })
    }

    fn list_usernames<'a>(&'a self) -> BoxFuture<'a, Result<Vec<String>, CredentialError>> {
        Box::pin(async move {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|err| CredentialError::Store(format!("pool connection failed: {err}")))?;

            fit_users::table
                .select(fit_users::username)
                .load::<String>(&mut conn)
                .await
                .map_err(|err| CredentialError::Store(format!("user list failed: {err}")))
        })
    }
}
