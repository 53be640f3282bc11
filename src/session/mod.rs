//! Session lifecycle module

pub mod lifecycle;

pub use lifecycle::{classify, default_session_ttl, SessionState, DEFAULT_SESSION_TTL_DAYS};
