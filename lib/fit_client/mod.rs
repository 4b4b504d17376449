pub mod error;

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use tracing::debug;

pub use error::FitClientErr;

/// Fixed bucketing period: one calendar day.
pub const ONE_DAY_MS: i64 = 86_400_000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Millis/nanos fields arrive as JSON strings from the upstream API but as
/// plain numbers from recorded fixtures. Accept both.
fn i64_from_string_or_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(text) => text.parse::<i64>().map_err(serde::de::Error::custom),
    }
}

/// One sampled or aggregated value inside a data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DataValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub int_val: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fp_val: Option<f64>,
}

/// One fine-grained point in a bucket or resolved dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    #[serde(default, deserialize_with = "i64_from_string_or_number")]
    pub start_time_nanos: i64,
    #[serde(default, deserialize_with = "i64_from_string_or_number")]
    pub end_time_nanos: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_data_source_id: Option<String>,
    #[serde(default)]
    pub value: Vec<DataValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BucketDataset {
    #[serde(default)]
    pub point: Vec<DataPoint>,
}

/// One calendar day's worth of aggregated data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateBucket {
    #[serde(deserialize_with = "i64_from_string_or_number")]
    pub start_time_millis: i64,
    #[serde(deserialize_with = "i64_from_string_or_number")]
    pub end_time_millis: i64,
    #[serde(default)]
    pub dataset: Vec<BucketDataset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResponse {
    #[serde(default)]
    pub bucket: Vec<AggregateBucket>,
}

/// Fine-grained dataset resolved for one `{startNanos}-{endNanos}` interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    #[serde(default)]
    pub point: Vec<DataPoint>,
}

/// Thin HTTP client for the external fitness API.
///
/// Authentication is per-call: the access token belongs to one user's
/// session, while the client itself is shared across a worker's lifetime.
pub struct FitClient {
    client: reqwest::Client,
    base_url: String,
}

impl FitClient {
    pub fn new(base_url: String) -> Result<Self, FitClientErr> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, base_url })
    }

    /// Fetches day-bucketed aggregates for one data source over a window.
    pub async fn aggregate(
        &self,
        access_token: &str,
        data_source_id: &str,
        start_time_millis: i64,
        end_time_millis: i64,
    ) -> Result<AggregateResponse, FitClientErr> {
        let url = format!("{}/users/me/dataset:aggregate", self.base_url);
        let body = json!({
            "aggregateBy": [{ "dataSourceId": data_source_id }],
            "bucketByTime": { "durationMillis": ONE_DAY_MS },
            "startTimeMillis": start_time_millis,
            "endTimeMillis": end_time_millis,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FitClientErr::UnexpectedStatus {
                resource: format!("aggregate {data_source_id}"),
                status: response.status().as_u16(),
            });
        }

        Ok(response.json::<AggregateResponse>().await?)
    }

    /// Fetches the fine-grained dataset for one `{startNanos}-{endNanos}` id.
    pub async fn get_dataset(
        &self,
        access_token: &str,
        data_source_id: &str,
        dataset_id: &str,
    ) -> Result<Dataset, FitClientErr> {
        let url = format!(
            "{}/users/me/dataSources/{}/datasets/{}",
            self.base_url, data_source_id, dataset_id
        );
        debug!(
            event = "dataset_fetch",
            data_source_id,
            dataset_id,
            "calling fitness API for fine-grained dataset"
        );

        let response = self.client.get(&url).bearer_auth(access_token).send().await?;

        if !response.status().is_success() {
            return Err(FitClientErr::UnexpectedStatus {
                resource: format!("dataset {dataset_id}"),
                status: response.status().as_u16(),
            });
        }

        Ok(response.json::<Dataset>().await?)
    }
}
