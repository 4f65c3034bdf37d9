//! SurveyFlow API Library
//!
//! This crate contains the HTTP server components for the SurveyFlow
//! billing service.

pub mod config;
pub mod error;
pub mod generation;
pub mod routes;
pub mod state;

pub use config::{Config, ConfigError};
pub use error::{ApiError, ApiResult};
pub use state::AppState;
