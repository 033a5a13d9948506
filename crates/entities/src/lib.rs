//! Core entity definitions for Pulselog.
//!
//! This crate defines the data types shared across the Pulselog workspace:
//! users, health readings and their permissions, together with the pure
//! derivation rules (blood-pressure category, glucose conversion, BMI) and
//! the validation rules applied before anything is persisted.

pub mod metrics;
mod reading;
mod user;
pub mod validation;

pub use metrics::{BloodPressureCategory, GlucoseUnit};
pub use reading::*;
pub use user::*;
pub use validation::{ValidationErrors, ValidationResult};
