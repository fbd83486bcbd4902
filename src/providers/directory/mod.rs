//! College directory service client.
//!
//! The directory maps mail domains to institutions. [`DirectoryApi`] is the
//! seam the classifier and discovery stages depend on; [`HttpDirectoryClient`]
//! is the production implementation.

mod client;

#[cfg(test)]
pub use client::MockDirectoryApi;
pub use client::{DirectoryApi, DirectoryError, HttpDirectoryClient, Result};
