//! Sessions that drive the pipeline.
//!
//! A [`SetupSession`] walks the [`SetupFlow`] from picking an action to a
//! finished provisioning run. A [`RemovalSession`] reports and undoes what an
//! earlier run left behind. Both check mail access before touching anything.

mod state;

pub use state::{FlowError, SessionGuard, SetupFlow, SetupState};

use std::sync::Arc;

use crate::config::Settings;
use crate::domain::{FilterAction, SenderGroup};
use crate::providers::directory::DirectoryApi;
use crate::providers::mail::MailService;
use crate::services::{
    classify, filter_groups, load_directory, report_unknown_domains, DiscoveryService,
    ManageService, PipelineError, ProgressReporter, ProvisioningReport, ProvisioningService,
    ProvisioningStatus, RemovalReport, RemovalService, Result, Selection, SenderSets, SetKind,
};

/// Interactive setup against one mail account.
pub struct SetupSession {
    mail: Arc<dyn MailService>,
    directory: Arc<dyn DirectoryApi>,
    settings: Settings,
    flow: SetupFlow,
    guard: SessionGuard,
    progress: ProgressReporter,
}

impl SetupSession {
    /// Creates a session in `PickingAction`.
    pub fn new(
        mail: Arc<dyn MailService>,
        directory: Arc<dyn DirectoryApi>,
        settings: Settings,
    ) -> Self {
        Self {
            mail,
            directory,
            settings,
            flow: SetupFlow::new(),
            guard: SessionGuard::new(),
            progress: ProgressReporter::new(),
        }
    }

    /// Progress reporter shared by every stage of this session.
    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// Handle that can close the session from elsewhere.
    pub fn guard(&self) -> SessionGuard {
        self.guard.clone()
    }

    /// Current flow state.
    pub fn state(&self) -> &SetupState {
        self.flow.state()
    }

    /// Checks access and refuses accounts that were already provisioned.
    pub async fn start(&self) -> Result<()> {
        self.ensure_open()?;
        self.mail.verify_access().await?;
        ManageService::new(self.mail.clone(), self.settings.label_prefix.as_str())
            .ensure_not_provisioned()
            .await
    }

    /// Picks an action, then discovers and classifies senders.
    ///
    /// On failure the flow returns to `PickingAction`.
    pub async fn choose_action(&mut self, action: FilterAction) -> Result<&SenderSets> {
        self.ensure_open()?;
        self.flow.pick_action(action)?;

        let classified = self.classify_senders().await;
        if !self.guard.is_open() {
            return Err(PipelineError::SessionClosed);
        }
        let (sets, unreported) = match classified {
            Ok(done) => done,
            Err(e) => {
                self.flow.stage_failed();
                return Err(e);
            }
        };

        if unreported > 0 {
            tracing::warn!(unreported, "Some unknown domains were not reported");
        }
        self.flow.classified(sets, unreported)?;
        self.flow.sets().ok_or(PipelineError::SessionClosed)
    }

    async fn classify_senders(&self) -> Result<(SenderSets, usize)> {
        let directory = load_directory(self.directory.as_ref()).await?;
        let discovered = DiscoveryService::new(
            self.mail.clone(),
            self.settings.limits.clone(),
            self.progress.clone(),
        )
        .discover(&directory)
        .await?;

        let classification = classify(&discovered.messages, &directory);
        let unreported =
            report_unknown_domains(self.directory.as_ref(), &classification.unknown_domains).await;
        Ok((classification.sets, unreported))
    }

    /// Moves a group or member between the blocked set and the whitelist.
    pub fn move_member(
        &mut self,
        from: SetKind,
        to: SetKind,
        key: &str,
        selection: Selection,
    ) -> Result<&SenderSets> {
        Ok(self.flow.move_member(from, to, key, selection)?)
    }

    /// Moves a whole blocked group to the whitelist by organization name.
    ///
    /// Unlike [`move_member`](Self::move_member), a name that matches no
    /// blocked group is an error.
    pub fn whitelist_group(&mut self, organization: &str) -> Result<&SenderSets> {
        if let Some(sets) = self.flow.sets() {
            if !sets.blocked.iter().any(|g| g.organization == organization) {
                return Err(PipelineError::UnknownGroup(organization.to_string()));
            }
        }
        self.move_member(
            SetKind::Blocked,
            SetKind::Whitelist,
            organization,
            Selection::Group,
        )
    }

    /// Returns to `PickingAction`, dropping the reviewed sets.
    pub fn back(&mut self) -> Result<()> {
        Ok(self.flow.back()?)
    }

    /// Groups of one set matching a search term.
    pub fn filter(&self, kind: SetKind, term: &str) -> Vec<SenderGroup> {
        self.flow
            .sets()
            .map(|sets| filter_groups(sets.get(kind), term))
            .unwrap_or_default()
    }

    /// Provisions filters for the blocked set.
    ///
    /// On failure the flow returns to `ReviewingGroups`; already created
    /// filters stay in place and show up as an existing provisioning.
    pub async fn provision(&mut self) -> Result<&ProvisioningReport> {
        self.ensure_open()?;
        let (action, addresses) = self.flow.confirm()?;

        let provisioned = ProvisioningService::new(
            self.mail.clone(),
            self.settings.limits.clone(),
            self.settings.label_prefix.as_str(),
            self.progress.clone(),
        )
        .provision(action, &addresses)
        .await;
        if !self.guard.is_open() {
            return Err(PipelineError::SessionClosed);
        }

        match provisioned {
            Ok(report) => self.flow.provisioned(report)?,
            Err(e) => {
                self.flow.stage_failed();
                return Err(e);
            }
        }
        match self.flow.state() {
            SetupState::Done { report, .. } => Ok(report),
            _ => Err(PipelineError::SessionClosed),
        }
    }

    /// Closes the session. Running stages finish but commit nothing.
    pub fn close(&self) {
        self.guard.close();
    }

    fn ensure_open(&self) -> Result<()> {
        if self.guard.is_open() {
            Ok(())
        } else {
            Err(PipelineError::SessionClosed)
        }
    }
}

/// Inspects and removes an existing provisioning.
pub struct RemovalSession {
    mail: Arc<dyn MailService>,
    settings: Settings,
    progress: ProgressReporter,
}

impl RemovalSession {
    /// Creates a removal session.
    pub fn new(mail: Arc<dyn MailService>, settings: Settings) -> Self {
        Self {
            mail,
            settings,
            progress: ProgressReporter::new(),
        }
    }

    /// Progress reporter for the removal stage.
    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// What an earlier run left in place, if anything.
    pub async fn status(&self) -> Result<Option<ProvisioningStatus>> {
        self.mail.verify_access().await?;
        ManageService::new(self.mail.clone(), self.settings.label_prefix.as_str())
            .status()
            .await
    }

    /// Removes every provisioning label, its filters and its changes.
    pub async fn remove(&self) -> Result<RemovalReport> {
        self.mail.verify_access().await?;
        RemovalService::new(
            self.mail.clone(),
            self.settings.limits.clone(),
            self.settings.label_prefix.as_str(),
            self.progress.clone(),
        )
        .remove()
        .await
    }
}
