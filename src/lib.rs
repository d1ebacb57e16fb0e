//! # Cloud Apps Library
//!
//! Registers OAuth2 apps against cloud provider identity endpoints, drives
//! their authorization-code flows, keeps the resulting tokens fresh and
//! sends authenticated requests to the providers' APIs.

pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod oauth;
pub mod repositories;
pub mod request_engine;
pub mod seeds;
pub mod server;
pub mod services;
pub mod state_cache;
pub mod telemetry;
pub mod token_refresh;
pub use migration;
