// ABOUTME: Library root for lookout - exposes the update engine, runtimes and agent.
// ABOUTME: The main binary is in main.rs.

pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod notify;
pub mod runtime;
pub mod types;
pub mod update;
