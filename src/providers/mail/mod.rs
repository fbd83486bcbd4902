//! Mail service implementations.
//!
//! This module contains the [`MailService`] trait and its implementations:
//!
//! - [`GmailProvider`] - Gmail REST API with OAuth 2.0
//! - [`InMemoryMailbox`] - in-process mailbox with filters applied on delivery
//!
//! # Example
//!
//! ```ignore
//! use spamguard::domain::{known_sender_query, known_sender_term, SearchQuery};
//! use spamguard::providers::mail::MailService;
//!
//! async fn first_page(mail: &dyn MailService) {
//!     let query = SearchQuery::text(known_sender_query(&known_sender_term::<&str>(&[])));
//!     let page = mail
//!         .search_messages(&query.in_all_folders(), None, 500)
//!         .await
//!         .expect("search failed");
//!     println!("{} college messages on the first page", page.ids.len());
//! }
//! ```

mod gmail;
mod memory;
mod traits;

pub use gmail::{GmailCredentials, GmailProvider, REQUIRED_SCOPES};
pub use memory::{InMemoryMailbox, MailboxOp};
pub use traits::{MailService, MessageMetadata, ProviderError, Result, SearchPage};
