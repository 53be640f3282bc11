//! authstore - persistence layer for user accounts and login sessions

pub mod auth;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod session;

pub use config::Config;
pub use db::{Database, UnitOfWork};
pub use error::{ConstraintKind, Result, StoreError};
