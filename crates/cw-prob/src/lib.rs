//! Probability building blocks for Causeway.
//!
//! - numerically stable logistic primitives used by the propensity model
//! - normal and Student-t critical values / p-values used to build confidence
//!   intervals and significance tests

pub mod math;
pub mod normal;
pub mod student_t;
