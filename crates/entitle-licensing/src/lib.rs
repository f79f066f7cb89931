//! License validation, activation and trials for Entitle.
//!
//! Components receive their store and remote authority at construction;
//! [`LicensingContext`] wires one of each together.

pub mod activation;
pub mod cloud;
pub mod context;
pub mod engine;
pub mod machine;
pub mod startup;
pub mod trial;

pub use activation::{ActivationManager, ActivationOutcome, ActivationStatus, ExistingActivation};
pub use cloud::HttpRemoteAuthority;
pub use context::LicensingContext;
pub use engine::{KeyPolicy, ValidationEngine};
pub use machine::{MachineIdentity, MachineInfo};
pub use startup::{
    InvalidReason, LicenseState, StartupAction, StartupChecker, StartupDecision, StartupState,
};
pub use trial::{LicenseType, TrialService, TrialState, TrialStatus};
