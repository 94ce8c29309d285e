//! Bundled [`crate::Engine`] implementations.

#[cfg(feature = "default-engine")]
pub mod sync;
