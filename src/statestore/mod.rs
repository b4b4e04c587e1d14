//! Shared store registry
//!
//! The registry is the process-wide catalog of open stores. It is created
//! once at startup, handed to every component that needs persistence, and
//! closed at shutdown after all of them released their handles.
//!
//! # Overview
//!
//! The statestore module provides:
//! - `Registry` - opens stores lazily and reference counts them
//! - `StoreHandle` - typed access to one backend collection

mod registry;

pub use registry::{Registry, StoreHandle};

#[cfg(test)]
mod tests;
