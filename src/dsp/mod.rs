//! Numerical building blocks shared by the HR/SpO2 and HRV estimators

pub mod filter;
pub mod peaks;

pub use filter::{SosFilter, SosSection};
pub use peaks::find_peaks;
