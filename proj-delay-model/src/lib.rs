//! Estimators for validating an aggregation-delay model against request traces.
//!
//! The pipeline runs in three stages over an immutable [`proj_models::Trace`]:
//! popularity and intensity estimation ([`skew`], [`intensity`]), burstiness
//! ([`burstiness`]) and delay verification ([`verify`], built on [`replay`]).

pub mod burstiness;
pub mod config;
pub mod error;
pub mod intensity;
pub mod io;
pub mod replay;
pub mod report;
pub mod series;
pub mod skew;
pub mod trace_gen;
pub mod verify;

pub use error::{EstimationError, Result};
