//! Ports - trait definitions for counter backends.
//! These are the "interfaces" that infrastructure must implement.

mod counter;

pub use counter::{LocalVerdict, SharedCounter, SharedVerdict, WindowCounter};
