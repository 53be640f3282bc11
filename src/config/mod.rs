//! authstore configuration module
//! Resolves `DATABASE_URL` and the optional YAML config file

pub mod config;

pub use config::{Config, ConfigError, DatabaseUrl, CONFIG_PATH_ENV, DATABASE_URL_ENV};
