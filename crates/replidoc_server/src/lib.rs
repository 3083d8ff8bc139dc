//! Replidoc Sync Server
//!
//! The authoritative primary behind an HTTP surface. Replicas push
//! their overlay as a multipart changeset and pull attachment payloads
//! by id; everything under `/api` except the login endpoint is gated by
//! a password-derived session token.
//!
//! ## Environment Variables
//!
//! - `HOST`: Server host (default: 0.0.0.0)
//! - `PORT`: Server port (default: 3030)
//! - `DATA_DIR`: Primary storage root (default: ./replidoc_data)
//! - `REPLIDOC_PASSWORD`: Login password (required)
//! - `CORS_ORIGINS`: Comma-separated list of allowed origins

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;

pub use config::Config;
