//! Removal of everything provisioning created.
//!
//! For each provisioning label the [`RemovalService`]:
//!
//! 1. deletes the filters that apply the label,
//! 2. finds every message carrying the label, in every folder,
//! 3. undoes the label's action on those messages in chunks of up to 1000,
//! 4. deletes the label; a label that is already gone counts as deleted.
//!
//! Each step can be re-run after a failure.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::batcher::RateLimitedBatcher;
use super::error::{PipelineError, Result};
use super::manage_service::ManageService;
use super::progress::{ProgressEvent, ProgressReporter, Stage};
use super::search::PaginatedSearch;
use crate::config::LimitSettings;
use crate::domain::{FilterAction, ProvisioningLabel, QueryLane, SearchQuery};
use crate::providers::mail::MailService;

/// Summary of a removal run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalReport {
    /// Labels removed, with the action each one recorded.
    pub labels: Vec<(String, FilterAction)>,
    /// Filters deleted.
    pub filters_deleted: usize,
    /// Messages whose labels were restored.
    pub messages_restored: usize,
}

/// Reverses provisioning.
pub struct RemovalService {
    mail: Arc<dyn MailService>,
    limits: LimitSettings,
    manage: ManageService,
    progress: ProgressReporter,
}

impl RemovalService {
    /// Creates a removal service.
    pub fn new(
        mail: Arc<dyn MailService>,
        limits: LimitSettings,
        label_prefix: impl Into<String>,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            manage: ManageService::new(mail.clone(), label_prefix),
            mail,
            limits,
            progress,
        }
    }

    /// Removes every provisioning label and what it anchors.
    ///
    /// Fails with [`PipelineError::NotProvisioned`] when the account has no
    /// provisioning label, and with [`PipelineError::InvalidLabel`] before
    /// changing anything when a label's action cannot be read.
    pub async fn remove(&self) -> Result<RemovalReport> {
        let labels = self.manage.find_labels().await?;
        if labels.is_empty() {
            return Err(PipelineError::NotProvisioned);
        }

        self.progress.emit(ProgressEvent::Started {
            stage: Stage::Removal,
        });

        let mut report = RemovalReport::default();
        for label in labels {
            report.filters_deleted += self.delete_filters(&label).await?;
            report.messages_restored += self.restore_messages(&label).await?;
            self.delete_label(&label).await?;
            tracing::info!(label = %label.name, "Removed provisioning label");
            report.labels.push((label.name, label.action));
        }

        self.progress.emit(ProgressEvent::Finished {
            stage: Stage::Removal,
        });
        Ok(report)
    }

    async fn delete_filters(&self, label: &ProvisioningLabel) -> Result<usize> {
        let ids: Vec<_> = self
            .mail
            .list_filters()
            .await?
            .into_iter()
            .filter(|f| f.references(&label.id))
            .map(|f| f.id)
            .collect();

        let mail = self.mail.as_ref();
        let deleted = RateLimitedBatcher::without_delay(self.limits.filter_group_size)
            .run(
                ids,
                |id| async move { mail.delete_filter(&id).await },
                |deleted, total| {
                    self.progress
                        .emit(ProgressEvent::FiltersDeleted { deleted, total })
                },
            )
            .await?;
        Ok(deleted.len())
    }

    async fn restore_messages(&self, label: &ProvisioningLabel) -> Result<usize> {
        let outcome = PaginatedSearch::new(self.mail.as_ref(), self.limits.page_size)
            .with_progress(&self.progress)
            .run(vec![QueryLane::new(
                label.name.clone(),
                SearchQuery::labelled(label.id.clone()),
            )])
            .await?;
        let ids = outcome.union_ids();

        let mutation = label.action.restore_mutation(&label.id);
        let total = ids.len();
        let mut restored = 0;
        for chunk in ids.chunks(self.limits.modify_chunk_size.clamp(1, 1000)) {
            self.mail.bulk_modify(chunk, &mutation).await?;
            restored += chunk.len();
            self.progress.emit(ProgressEvent::MessagesModified {
                modified: restored,
                total,
            });
        }
        Ok(restored)
    }

    async fn delete_label(&self, label: &ProvisioningLabel) -> Result<()> {
        match self.mail.delete_label(&label.id).await {
            Err(e) if e.is_not_found() => {
                tracing::debug!(label = %label.name, "Label already deleted");
                Ok(())
            }
            other => Ok(other?),
        }
    }
}
