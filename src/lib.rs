//! mediagrab - background media retrieval service
//!
//! Accepts download requests over HTTP, runs each one as an isolated job,
//! places the artifact on local storage or Google Cloud Storage depending on
//! its size, and reports the outcome to a caller-supplied callback endpoint.

pub mod api;
pub mod app;
pub mod cli;
pub mod config;
pub mod jobs;
pub mod services;

pub use app::{AppState, build_app};
