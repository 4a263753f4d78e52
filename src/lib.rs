//! Facade crate re-exporting the drydock fixture library.

pub use drydock_core::*;
