//! Database module

pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod schema;
pub mod unit_of_work;

pub use connection::{Database, DbPool};
pub use repositories::user::{NewUser, User, UserRepository, UserUpdate};
pub use repositories::user_session::{UserSession, UserSessionRepository};
pub use unit_of_work::UnitOfWork;
