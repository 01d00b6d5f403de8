//! HTTP route definitions

pub mod downloads;
pub mod health;
