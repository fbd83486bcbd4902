//! Pipeline services.
//!
//! This module contains the stages of the pipeline and the plumbing they
//! share.
//!
//! # Architecture
//!
//! ```text
//! DiscoveryService -> classify -> (user review) -> ProvisioningService
//!                                                  RemovalService
//!          |                  |                        |
//!          v                  v                        v
//!   PaginatedSearch    DirectoryApi       RateLimitedBatcher, MailService
//! ```
//!
//! # Services Overview
//!
//! - [`DiscoveryService`]: searches the mailbox and loads message headers
//! - [`classify`]: groups senders by organization against the directory
//! - [`ProvisioningService`]: creates the label, filters and retroactive changes
//! - [`RemovalService`]: undoes everything provisioning created
//! - [`ManageService`]: reports what an earlier run left in place

mod batcher;
mod classifier_service;
mod discovery_service;
mod error;
mod manage_service;
mod progress;
mod provisioning_service;
mod removal_service;
mod search;

pub use batcher::RateLimitedBatcher;
pub use classifier_service::{
    classify, filter_groups, move_member, report_unknown_domains, Classification, Selection,
    SenderSets, SetKind,
};
pub use discovery_service::{
    discovery_lanes, load_directory, DiscoveredMessages, DiscoveryService, KNOWN_LANE,
    POTENTIAL_LANE,
};
pub use error::{PipelineError, Result};
pub use manage_service::{ManageService, ProvisioningStatus};
pub use progress::{ProgressEvent, ProgressReporter, Stage};
pub use provisioning_service::{ProvisioningReport, ProvisioningService};
pub use removal_service::{RemovalReport, RemovalService};
pub use search::{PaginatedSearch, SearchOutcome};
