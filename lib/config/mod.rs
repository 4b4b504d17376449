use std::env;
use std::path::PathBuf;

const DEFAULT_FIT_API_URL: &str = "https://www.googleapis.com/fitness/v1";
const DEFAULT_TOKEN_URL: &str = "https://accounts.google.com/o/oauth2/token";

/// External data-source identifiers, one per metric category.
///
/// These are the upstream aggregate stream names; overriding them is only
/// needed when pointing at a mock upstream in integration environments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceIds {
    pub steps: String,
    pub activities: String,
    pub heart_rate: String,
    pub calories: String,
}

impl Default for DataSourceIds {
    fn default() -> Self {
        Self {
            steps: "derived:com.google.step_count.delta:com.google.android.gms:estimated_steps"
                .to_string(),
            activities:
                "derived:com.google.activity.segment:com.google.android.gms:merge_activity_segments"
                    .to_string(),
            heart_rate:
                "derived:com.google.heart_rate.bpm:com.google.android.gms:merge_heart_rate_bpm"
                    .to_string(),
            calories: "derived:com.google.calories.expended:com.google.android.gms:merge_calories_expended"
                .to_string(),
        }
    }
}

pub struct Config {
    pub db_url: String,
    /// Fitness API base url. Defaults to the production endpoint.
    pub fit_api_url: String,
    /// OAuth token endpoint used to exchange stored refresh tokens.
    pub token_url: String,
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    /// Shared secret required on the ad-hoc sync endpoint.
    pub api_key: String,
    /// Root directory for raw-payload archive blobs.
    pub archive_root: PathBuf,
    pub data_sources: DataSourceIds,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        let db_url = env::var("DATABASE_URL")?;
        let fit_api_url =
            env::var("FIT_API_URL").unwrap_or_else(|_| DEFAULT_FIT_API_URL.to_string());
        let token_url = env::var("TOKEN_URL").unwrap_or_else(|_| DEFAULT_TOKEN_URL.to_string());
        let oauth_client_id = env::var("OAUTH_CLIENT_ID")?;
        let oauth_client_secret = env::var("OAUTH_CLIENT_SECRET")?;
        let api_key = env::var("API_KEY")?;
        let archive_root = env::var("ARCHIVE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("archive"));

        Ok(Self {
            db_url,
            fit_api_url,
            token_url,
            oauth_client_id,
            oauth_client_secret,
            api_key,
            archive_root,
            data_sources: DataSourceIds::default(),
        })
    }
}
