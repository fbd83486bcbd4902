//! Inspection of an account's provisioning state.
//!
//! Setup refuses to run twice: the [`ManageService`] checks for an existing
//! provisioning label first, and reports what an earlier run left in place.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::{PipelineError, Result};
use crate::domain::{parse_or_group, FilterAction, MailLabel, ProvisioningLabel};
use crate::providers::mail::MailService;

/// What an earlier provisioning run left in the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningStatus {
    /// The provisioning label.
    pub label: ProvisioningLabel,
    /// Filters that apply the label.
    pub filter_count: usize,
    /// Sender addresses those filters match, in filter order.
    pub blocked_addresses: Vec<String>,
}

impl ProvisioningStatus {
    /// Action recorded in the label name.
    pub fn action(&self) -> FilterAction {
        self.label.action
    }
}

/// Reads provisioning state from the mail service.
pub struct ManageService {
    mail: Arc<dyn MailService>,
    label_prefix: String,
}

impl ManageService {
    /// Creates a manage service.
    pub fn new(mail: Arc<dyn MailService>, label_prefix: impl Into<String>) -> Self {
        Self {
            mail,
            label_prefix: label_prefix.into(),
        }
    }

    /// Labels whose names start with the provisioning prefix.
    pub async fn provisioning_labels(&self) -> Result<Vec<MailLabel>> {
        Ok(self
            .mail
            .list_labels()
            .await?
            .into_iter()
            .filter(|l| l.name.starts_with(&self.label_prefix))
            .collect())
    }

    /// Fails with [`PipelineError::AlreadyProvisioned`] if any provisioning
    /// label exists, whether or not its action is readable.
    pub async fn ensure_not_provisioned(&self) -> Result<()> {
        match self.provisioning_labels().await?.into_iter().next() {
            Some(label) => Err(PipelineError::AlreadyProvisioned(label.name)),
            None => Ok(()),
        }
    }

    /// Every provisioning label, with the action parsed from its name.
    pub async fn find_labels(&self) -> Result<Vec<ProvisioningLabel>> {
        self.provisioning_labels()
            .await?
            .iter()
            .filter_map(|l| ProvisioningLabel::from_label(l, &self.label_prefix))
            .map(|parsed| parsed.map_err(PipelineError::from))
            .collect()
    }

    /// Reports the first provisioning label and what its filters block.
    pub async fn status(&self) -> Result<Option<ProvisioningStatus>> {
        let Some(label) = self.find_labels().await?.into_iter().next() else {
            return Ok(None);
        };

        let filters: Vec<_> = self
            .mail
            .list_filters()
            .await?
            .into_iter()
            .filter(|f| f.references(&label.id))
            .collect();

        let blocked_addresses = filters
            .iter()
            .filter_map(|f| f.criteria.from.as_deref())
            .flat_map(parse_or_group)
            .collect();

        Ok(Some(ProvisioningStatus {
            label,
            filter_count: filters.len(),
            blocked_addresses,
        }))
    }
}
