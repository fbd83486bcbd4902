//! spamguard - keeps college admissions mail out of a Gmail inbox
//!
//! This crate finds admissions mail, groups its senders by institution using
//! a college directory service, and provisions server-side Gmail filters that
//! mark it read, archive it or trash it. Everything it creates is tagged with a
//! hidden label so it can be listed and removed again.

pub mod app;
pub mod config;
pub mod domain;
pub mod providers;
pub mod services;

pub use app::{RemovalSession, SetupSession};
