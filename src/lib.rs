//! Export job center: submission, bounded execution, retention-driven
//! expiry, and download accounting for report artifacts.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod monitoring;
pub mod services;
