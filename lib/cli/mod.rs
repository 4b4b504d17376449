use std::net::SocketAddr;

use clap::Parser;

use crate::sync_service::types::Category;

#[derive(Parser, Debug)]
#[command(about = "Daily fitness-data warehouse sync service", version)]
pub struct Cli {
    /// Bind address for the HTTP surface
    #[clap(long, default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// Run one sync for these comma-separated users, print the report as
    /// JSON, and exit instead of serving
    #[clap(long, value_delimiter = ',')]
    pub sync_users: Vec<String>,

    /// Categories to sync; defaults to steps,activities,heartrate
    #[clap(long, value_delimiter = ',')]
    pub categories: Vec<Category>,

    /// Sync window starts at local midnight this many days back
    #[clap(long, default_value_t = 1)]
    pub days_back: i64,

    /// Extra attempts granted per category after the first one
    #[clap(long, default_value_t = 1)]
    pub retry_budget: u32,

    /// Wall-time limit for a single category attempt, in seconds
    #[clap(long, default_value_t = 120)]
    pub attempt_timeout_secs: u64,

    /// Global upstream request budget shared by all user workers
    #[clap(long, default_value_t = 10)]
    pub global_rps: u32,
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
