//! Multi-lane paginated search.
//!
//! Each [`QueryLane`] pages through one query independently. Every round
//! issues the next page of all active lanes together; a lane drops out as soon
//! as a page comes back empty or without a next-page cursor.

use std::collections::HashSet;

use futures::future::try_join_all;

use super::progress::{ProgressEvent, ProgressReporter};
use crate::domain::{MessageId, QueryLane};
use crate::providers::mail::{MailService, Result};

/// Lanes after every one of them has been exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOutcome {
    /// The lanes, in the order they were given.
    pub lanes: Vec<QueryLane>,
    /// Number of combined rounds issued.
    pub rounds: usize,
}

impl SearchOutcome {
    /// Looks up a lane by name.
    pub fn lane(&self, name: &str) -> Option<&QueryLane> {
        self.lanes.iter().find(|l| l.name == name)
    }

    /// Identifiers from every lane, de-duplicated. Lanes are taken in order
    /// and the first occurrence of an identifier wins.
    pub fn union_ids(&self) -> Vec<MessageId> {
        let mut seen = HashSet::new();
        self.lanes
            .iter()
            .flat_map(|lane| lane.collected_ids.iter())
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect()
    }

    /// Total identifiers collected across lanes, duplicates included.
    pub fn collected(&self) -> usize {
        self.lanes.iter().map(|l| l.collected_ids.len()).sum()
    }
}

/// Drives query lanes to exhaustion.
pub struct PaginatedSearch<'a> {
    mail: &'a dyn MailService,
    page_size: u32,
    progress: Option<&'a ProgressReporter>,
}

impl<'a> PaginatedSearch<'a> {
    /// Creates a search over `mail` with the given page size (capped at 500).
    pub fn new(mail: &'a dyn MailService, page_size: u32) -> Self {
        Self {
            mail,
            page_size: page_size.clamp(1, 500),
            progress: None,
        }
    }

    /// Reports a [`ProgressEvent::SearchRound`] after every round.
    pub fn with_progress(mut self, progress: &'a ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Runs rounds until no lane is active.
    ///
    /// Any failed page fails the whole search; nothing collected so far is
    /// returned.
    pub async fn run(&self, mut lanes: Vec<QueryLane>) -> Result<SearchOutcome> {
        let mut rounds = 0;

        loop {
            let active: Vec<usize> = lanes
                .iter()
                .enumerate()
                .filter(|(_, lane)| lane.is_active())
                .map(|(i, _)| i)
                .collect();
            if active.is_empty() {
                break;
            }

            let pages = try_join_all(active.iter().map(|&i| {
                let lane = &lanes[i];
                self.mail
                    .search_messages(&lane.query, lane.page_token.as_deref(), self.page_size)
            }))
            .await?;
            rounds += 1;

            for (&i, page) in active.iter().zip(pages) {
                let lane = &mut lanes[i];
                if page.ids.is_empty() {
                    lane.exhausted = true;
                    lane.page_token = None;
                    continue;
                }

                lane.collected_ids.extend(page.ids);
                lane.exhausted = page.next_page_token.is_none();
                lane.page_token = page.next_page_token;
            }

            let collected: usize = lanes.iter().map(|l| l.collected_ids.len()).sum();
            let still_active = lanes.iter().filter(|l| l.is_active()).count();
            tracing::debug!(round = rounds, active = still_active, collected, "Search round");
            if let Some(progress) = self.progress {
                progress.emit(ProgressEvent::SearchRound {
                    active_lanes: still_active,
                    collected,
                });
            }
        }

        Ok(SearchOutcome { lanes, rounds })
    }
}
