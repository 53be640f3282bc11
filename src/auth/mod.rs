//! Registration, login and session checks

pub mod password;
pub mod services;

pub use services::{
    authenticate, change_password, check_session, login, login_at, logout, logout_everywhere,
    purge_expired_sessions, register, start_anonymous_session, Registration, MIN_PASSWORD_LEN,
};
