//! Database models and queries (§3, §4.B).

pub mod health;
pub mod kv;
pub mod meetings;
pub mod models;
pub mod outbox;
pub mod users;
