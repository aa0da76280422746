pub mod access;
pub mod config;
pub mod entities;
pub mod error;
pub mod ports;
pub mod providers;
pub mod use_cases;

#[cfg(test)]
mod test_support;

pub use error::{Error, RejectionReason};
