pub mod config;
pub mod db;
pub mod fetch_error;
pub mod fetcher;
pub mod parsing;
pub mod services;
pub mod source;
pub mod station_directory;
