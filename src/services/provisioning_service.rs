//! Filter provisioning.
//!
//! The [`ProvisioningService`] turns the blocked set into server-side state:
//!
//! 1. A hidden label named after the chosen action.
//! 2. One filter per group of up to 30 addresses, created 25 at a time.
//! 3. The same label changes applied retroactively to every matching message
//!    already in the mailbox, in chunks of up to 1000 ids.
//!
//! Everything created is tagged with the label so removal can find it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::batcher::RateLimitedBatcher;
use super::error::Result;
use super::progress::{ProgressEvent, ProgressReporter, Stage};
use super::search::PaginatedSearch;
use crate::config::LimitSettings;
use crate::domain::{
    or_group, sender_history_query, FilterAction, FilterCriteria, FilterSpec, LabelMutation,
    MessageId, ProvisioningLabel, QueryLane, SearchQuery,
};
use crate::providers::mail::MailService;

/// Summary of a finished provisioning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningReport {
    /// The label everything was tagged with.
    pub label: ProvisioningLabel,
    /// Action applied to blocked mail.
    pub action: FilterAction,
    /// Distinct blocked addresses.
    pub blocked_addresses: usize,
    /// Filters created.
    pub filters_created: usize,
    /// Existing messages modified.
    pub messages_modified: usize,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

/// Creates the label, filters and retroactive modifications for a blocked set.
pub struct ProvisioningService {
    mail: Arc<dyn MailService>,
    limits: LimitSettings,
    label_prefix: String,
    progress: ProgressReporter,
}

impl ProvisioningService {
    /// Creates a provisioning service.
    pub fn new(
        mail: Arc<dyn MailService>,
        limits: LimitSettings,
        label_prefix: impl Into<String>,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            mail,
            limits,
            label_prefix: label_prefix.into(),
            progress,
        }
    }

    /// Provisions filters for `addresses` with `action`.
    ///
    /// With no addresses the label is still created, but no filters are made
    /// and no mail is touched.
    pub async fn provision(
        &self,
        action: FilterAction,
        addresses: &[String],
    ) -> Result<ProvisioningReport> {
        self.progress.emit(ProgressEvent::Started {
            stage: Stage::Provisioning,
        });

        let name = ProvisioningLabel::name_for(&self.label_prefix, action);
        let created = self.mail.create_label(&name, true).await?;
        let label = ProvisioningLabel {
            id: created.id,
            name: created.name,
            action,
        };
        tracing::info!(label = %label.name, addresses = addresses.len(), "Provisioning filters");

        let mutation = action.provisioning_mutation(&label.id);
        let address_groups: Vec<Vec<String>> = addresses
            .chunks(self.limits.addresses_per_filter.clamp(1, 30))
            .map(<[String]>::to_vec)
            .collect();

        let filters_created = self.create_filters(&address_groups, &mutation).await?;
        let ids = self.find_existing_mail(action, &address_groups).await?;
        let messages_modified = self.modify_existing_mail(&ids, &mutation).await?;

        tracing::info!(
            filters = filters_created,
            messages = messages_modified,
            "Provisioning finished"
        );
        self.progress.emit(ProgressEvent::Finished {
            stage: Stage::Provisioning,
        });

        Ok(ProvisioningReport {
            label,
            action,
            blocked_addresses: addresses.len(),
            filters_created,
            messages_modified,
            finished_at: Utc::now(),
        })
    }

    async fn create_filters(
        &self,
        address_groups: &[Vec<String>],
        mutation: &LabelMutation,
    ) -> Result<usize> {
        let specs: Vec<FilterSpec> = address_groups
            .iter()
            .map(|group| FilterSpec {
                criteria: FilterCriteria {
                    from: Some(or_group(group.as_slice())),
                },
                action: mutation.clone(),
            })
            .collect();

        let mail = self.mail.as_ref();
        let created = RateLimitedBatcher::without_delay(self.limits.filter_group_size)
            .run(
                specs,
                |spec| async move { mail.create_filter(&spec).await },
                |created, total| {
                    self.progress
                        .emit(ProgressEvent::FiltersCreated { created, total })
                },
            )
            .await?;
        Ok(created.len())
    }

    /// Existing mail from the blocked senders that the action would change.
    /// Mail already missing the action's label is skipped so removal does not
    /// give it back a label it never had.
    async fn find_existing_mail(
        &self,
        action: FilterAction,
        address_groups: &[Vec<String>],
    ) -> Result<Vec<MessageId>> {
        let lanes = address_groups
            .iter()
            .enumerate()
            .map(|(i, group)| {
                let mut query = SearchQuery::text(sender_history_query(group.as_slice()));
                query.label_ids = vec![action.affected_label()];
                QueryLane::new(format!("senders-{}", i), query)
            })
            .collect();

        let outcome = PaginatedSearch::new(self.mail.as_ref(), self.limits.page_size)
            .with_progress(&self.progress)
            .run(lanes)
            .await?;
        Ok(outcome.union_ids())
    }

    async fn modify_existing_mail(
        &self,
        ids: &[MessageId],
        mutation: &LabelMutation,
    ) -> Result<usize> {
        let total = ids.len();
        let mut modified = 0;
        for chunk in ids.chunks(self.limits.modify_chunk_size.clamp(1, 1000)) {
            self.mail.bulk_modify(chunk, mutation).await?;
            modified += chunk.len();
            self.progress
                .emit(ProgressEvent::MessagesModified { modified, total });
        }
        Ok(modified)
    }
}
