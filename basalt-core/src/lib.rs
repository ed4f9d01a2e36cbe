//! Basalt: remote state backend bootstrapping
//!
//! Solves the chicken-and-egg problem of an infrastructure engine that
//! keeps its state remotely: the store holding that state must exist
//! before the engine can manage anything, including the store itself.
//!
//! A run walks a small state machine:
//!
//! - **Probe**: read-only inspection of the store ([`BackendProbe`])
//! - **Provision**: create and harden the store in dependency order ([`Provisioner`])
//! - **Migrate**: copy a local state snapshot with checksum verification ([`Migrator`])
//! - **Validate**: lock, read and unlock the store like the engine will ([`HandoffValidator`])
//!
//! Cloud access goes through the [`CloudApi`] trait. Provider crates
//! implement it; [`LocalBackend`] implements it over a directory.
//!
//! # Example
//!
//! ```ignore
//! use basalt_core::{BackendSpec, Bootstrapper, LocalBackend};
//!
//! let spec = BackendSpec::new("state-store-1", "ap-northeast-1");
//! let cloud = LocalBackend::new("/var/lib/basalt");
//!
//! let result = Bootstrapper::new(&cloud, &spec)
//!     .with_snapshot("terraform.tfstate")
//!     .run()
//!     .await;
//!
//! std::process::exit(result.exit_code());
//! ```

pub mod audit;
pub mod backends;
pub mod bootstrap;
pub mod cloud;
pub mod config;
pub mod error;
pub mod handoff;
pub mod lock;
pub mod migrator;
pub mod plan;
pub mod probe;
pub mod provisioner;
pub mod result;
pub mod retry;
pub mod snapshot;
pub mod spec;
pub mod state;

#[cfg(test)]
mod mock;

// Re-export main types for convenience
pub use audit::{AuditLog, AuditRecord};
pub use backends::LocalBackend;
pub use bootstrap::{Bootstrapper, RunContext};
pub use cloud::{CloudApi, CloudError, CloudResult, StoreId, StoreSetting, TrustRole};
pub use config::{BootstrapConfig, ConfigError, ProviderKind};
pub use error::{BootstrapError, ErrorKind};
pub use handoff::HandoffValidator;
pub use lock::LockInfo;
pub use migrator::{MigrationOutcome, Migrator};
pub use plan::{ProvisionPlan, ProvisionStep};
pub use probe::BackendProbe;
pub use provisioner::Provisioner;
pub use result::{BootstrapResult, BootstrapStatus, FailureReport, HandoffOutputs, Phase};
pub use retry::RetryPolicy;
pub use snapshot::{Checksum, StateSnapshot};
pub use spec::BackendSpec;
pub use state::{BackendState, Drift};
