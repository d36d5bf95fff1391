//! Domain types: identities, limiter settings, decisions.

mod decision;
mod identity;
mod settings;

pub use decision::Decision;
pub use identity::{
    Dimension, Identity, LOOPBACK_PLACEHOLDER, RequestMetadata, Resolution, resolve,
};
pub use settings::{CountingMode, FailurePolicy, LimiterSettings};
