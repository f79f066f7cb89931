//! Entitle Core
//!
//! Domain types, port traits and configuration for license validation,
//! activation and trials. Storage and network adapters live in
//! `entitle-db` and `entitle-licensing`.

pub mod activation;
pub mod config;
pub mod error;
pub mod ids;
pub mod license;
pub mod ports;
pub mod remote;
pub mod validation;

pub use error::{Error, FailureClass, Result};
pub use ids::*;
