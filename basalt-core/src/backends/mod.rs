//! Built-in `CloudApi` implementations

mod local;

pub use local::{LocalBackend, StoreMetadata};
