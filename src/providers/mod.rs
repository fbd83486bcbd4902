//! External service clients.
//!
//! - [`mail`] - Mail services (Gmail API, in-memory mailbox)
//! - [`directory`] - The college directory REST service

pub mod directory;
pub mod mail;
