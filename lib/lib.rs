pub mod archive;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod db;
pub mod fit_client;
pub mod logging;
pub mod server;
pub mod sync_service;
