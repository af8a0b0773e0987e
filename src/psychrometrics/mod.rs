//! Quantities derived from temperature and relative humidity.
//!
//! Both computations validate their humidity input; a reading outside
//! 0–100 % is reported as [`DerivationError::InvalidHumidity`] instead of
//! producing a meaningless number.

pub mod dewpoint;
mod solver;
pub mod wetbulb;

use thiserror::Error;

/// Errors from derived-quantity computations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DerivationError {
    #[error("invalid humidity: {0}")]
    InvalidHumidity(f64),
    #[error("solver did not converge after {0} iterations")]
    SolverDidNotConverge(usize),
    /// The saturation curve was evaluated outside its valid range. This is
    /// an internal error: user input is validated before reaching the curve.
    #[error("temperature {0} K is outside the saturation vapor pressure domain")]
    OutOfDomain(f64),
}
