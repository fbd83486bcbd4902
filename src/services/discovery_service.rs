//! Message discovery.
//!
//! The [`DiscoveryService`] finds candidate admissions mail with two search
//! lanes and loads the `From` and `Subject` headers of every hit:
//!
//! - `knownPass` matches every `.edu` sender plus the non-`.edu` addresses and
//!   domains the directory knows about.
//! - `potentialPass` matches subscription-style wording from senders whose
//!   address looks institutional, or from the known senders.

use std::sync::Arc;

use futures::future::try_join;

use super::batcher::RateLimitedBatcher;
use super::error::Result;
use super::progress::{ProgressEvent, ProgressReporter, Stage};
use super::search::PaginatedSearch;
use crate::config::LimitSettings;
use crate::domain::{
    known_sender_query, known_sender_term, potential_sender_query, DirectorySnapshot, QueryLane,
    SearchQuery,
};
use crate::providers::directory::DirectoryApi;
use crate::providers::mail::{MailService, MessageMetadata};

/// Name of the lane searching known senders.
pub const KNOWN_LANE: &str = "knownPass";
/// Name of the lane searching likely senders.
pub const POTENTIAL_LANE: &str = "potentialPass";

const METADATA_HEADERS: [&str; 2] = ["From", "Subject"];

/// Headers of every discovered message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredMessages {
    /// Message headers in discovery order: known-lane hits first.
    pub messages: Vec<MessageMetadata>,
    /// Hits of the known lane.
    pub known_hits: usize,
    /// Hits of the potential lane.
    pub potential_hits: usize,
}

impl DiscoveredMessages {
    /// Number of distinct messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether nothing was found.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Loads the directory listings both discovery and classification need.
pub async fn load_directory(directory: &dyn DirectoryApi) -> Result<DirectorySnapshot> {
    let (entries, blocked) =
        try_join(directory.college_domains(), directory.blocked_emails()).await?;
    tracing::info!(
        domains = entries.len(),
        blocked = blocked.len(),
        "Loaded college directory"
    );
    Ok(DirectorySnapshot::new(entries, blocked))
}

/// Builds the two discovery lanes for a directory snapshot.
pub fn discovery_lanes(directory: &DirectorySnapshot) -> Vec<QueryLane> {
    let known_term = known_sender_term(directory.non_edu_terms().as_slice());

    vec![
        QueryLane::new(
            KNOWN_LANE,
            SearchQuery::text(known_sender_query(&known_term)).in_all_folders(),
        ),
        QueryLane::new(
            POTENTIAL_LANE,
            SearchQuery::text(potential_sender_query(&known_term)).in_all_folders(),
        ),
    ]
}

/// Finds candidate messages and loads their headers.
pub struct DiscoveryService {
    mail: Arc<dyn MailService>,
    limits: LimitSettings,
    progress: ProgressReporter,
}

impl DiscoveryService {
    /// Creates a discovery service.
    pub fn new(mail: Arc<dyn MailService>, limits: LimitSettings, progress: ProgressReporter) -> Self {
        Self {
            mail,
            limits,
            progress,
        }
    }

    /// Runs both lanes to exhaustion, then fetches headers for the union of
    /// their hits in rate-limited groups.
    pub async fn discover(&self, directory: &DirectorySnapshot) -> Result<DiscoveredMessages> {
        self.progress.emit(ProgressEvent::Started {
            stage: Stage::Discovery,
        });

        let outcome = PaginatedSearch::new(self.mail.as_ref(), self.limits.page_size)
            .with_progress(&self.progress)
            .run(discovery_lanes(directory))
            .await?;

        let hits = |name: &str| outcome.lane(name).map_or(0, |l| l.collected_ids.len());
        let known_hits = hits(KNOWN_LANE);
        let potential_hits = hits(POTENTIAL_LANE);
        let ids = outcome.union_ids();
        tracing::info!(
            known = known_hits,
            potential = potential_hits,
            unique = ids.len(),
            "Search finished"
        );

        let batcher = RateLimitedBatcher::new(
            self.limits.metadata_group_size,
            self.limits.metadata_group_delay(),
        );
        let mail = self.mail.as_ref();
        let messages = batcher
            .run(
                ids,
                |id| async move { mail.get_message_metadata(&id, &METADATA_HEADERS).await },
                |loaded, total| {
                    self.progress
                        .emit(ProgressEvent::MetadataLoaded { loaded, total })
                },
            )
            .await?;

        self.progress.emit(ProgressEvent::Finished {
            stage: Stage::Discovery,
        });
        Ok(DiscoveredMessages {
            messages,
            known_hits,
            potential_hits,
        })
    }
}
