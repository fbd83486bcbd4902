//! Setup flow state.
//!
//! Setup is an explicit state machine:
//!
//! ```text
//! PickingAction -> Classifying -> ReviewingGroups -> Provisioning -> Done
//!       ^                               |
//!       +-------------------------------+  (back)
//! ```
//!
//! Each state owns the data it needs, so a stage's results only exist once
//! the flow has reached the state that holds them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::domain::{FilterAction, SenderGroup};
use crate::services::{move_member, ProvisioningReport, Selection, SenderSets, SetKind};

/// Errors from driving the flow out of order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    /// The event is not valid in the current state.
    #[error("cannot {event} while {state}")]
    InvalidTransition {
        /// Name of the current state.
        state: &'static str,
        /// What was attempted.
        event: &'static str,
    },
}

/// A state of the setup flow.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SetupState {
    /// Waiting for the user to choose what happens to blocked mail.
    #[default]
    PickingAction,
    /// Discovery and classification are running.
    Classifying {
        /// Chosen action.
        action: FilterAction,
    },
    /// The user is moving groups between the blocked set and the whitelist.
    ReviewingGroups {
        /// Chosen action.
        action: FilterAction,
        /// Working sets.
        sets: SenderSets,
        /// Unknown domains the directory has not been told about.
        unreported_domains: usize,
    },
    /// Filters are being created.
    Provisioning {
        /// Chosen action.
        action: FilterAction,
        /// Sets as confirmed by the user.
        sets: SenderSets,
    },
    /// Provisioning finished.
    Done {
        /// Summary of the run.
        report: ProvisioningReport,
        /// Groups that were left alone.
        whitelist: Vec<SenderGroup>,
    },
}

impl SetupState {
    /// Short name of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PickingAction => "picking an action",
            Self::Classifying { .. } => "classifying",
            Self::ReviewingGroups { .. } => "reviewing groups",
            Self::Provisioning { .. } => "provisioning",
            Self::Done { .. } => "done",
        }
    }
}

/// The setup flow state machine.
#[derive(Debug, Clone, Default)]
pub struct SetupFlow {
    state: SetupState,
}

impl SetupFlow {
    /// Creates a flow waiting for an action.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> &SetupState {
        &self.state
    }

    fn invalid<T>(&self, event: &'static str) -> Result<T, FlowError> {
        Err(FlowError::InvalidTransition {
            state: self.state.name(),
            event,
        })
    }

    /// `PickingAction -> Classifying`.
    pub fn pick_action(&mut self, action: FilterAction) -> Result<(), FlowError> {
        match self.state {
            SetupState::PickingAction => {
                self.state = SetupState::Classifying { action };
                Ok(())
            }
            _ => self.invalid("pick an action"),
        }
    }

    /// `Classifying -> ReviewingGroups`, with everything blocked.
    pub fn classified(&mut self, sets: SenderSets, unreported_domains: usize) -> Result<(), FlowError> {
        match self.state {
            SetupState::Classifying { action } => {
                self.state = SetupState::ReviewingGroups {
                    action,
                    sets,
                    unreported_domains,
                };
                Ok(())
            }
            _ => self.invalid("finish classifying"),
        }
    }

    /// Moves a group or member between sets while reviewing.
    pub fn move_member(
        &mut self,
        from: SetKind,
        to: SetKind,
        key: &str,
        selection: Selection,
    ) -> Result<&SenderSets, FlowError> {
        let state = self.state.name();
        match &mut self.state {
            SetupState::ReviewingGroups { sets, .. } => {
                *sets = move_member(std::mem::take(sets), from, to, key, selection);
                Ok(sets)
            }
            _ => Err(FlowError::InvalidTransition {
                state,
                event: "move senders",
            }),
        }
    }

    /// `ReviewingGroups -> PickingAction`. The working sets are discarded.
    pub fn back(&mut self) -> Result<(), FlowError> {
        match self.state {
            SetupState::ReviewingGroups { .. } => {
                self.state = SetupState::PickingAction;
                Ok(())
            }
            _ => self.invalid("go back"),
        }
    }

    /// `ReviewingGroups -> Provisioning`. Returns the action and the blocked
    /// addresses to provision.
    pub fn confirm(&mut self) -> Result<(FilterAction, Vec<String>), FlowError> {
        match std::mem::take(&mut self.state) {
            SetupState::ReviewingGroups { action, sets, .. } => {
                let addresses = sets.blocked_addresses();
                self.state = SetupState::Provisioning { action, sets };
                Ok((action, addresses))
            }
            other => {
                self.state = other;
                self.invalid("confirm")
            }
        }
    }

    /// `Provisioning -> Done`.
    pub fn provisioned(&mut self, report: ProvisioningReport) -> Result<(), FlowError> {
        match std::mem::take(&mut self.state) {
            SetupState::Provisioning { sets, .. } => {
                self.state = SetupState::Done {
                    report,
                    whitelist: sets.whitelist,
                };
                Ok(())
            }
            other => {
                self.state = other;
                self.invalid("finish provisioning")
            }
        }
    }

    /// Returns a running stage to the state before it: classification goes
    /// back to `PickingAction`, provisioning back to `ReviewingGroups`.
    pub fn stage_failed(&mut self) {
        self.state = match std::mem::take(&mut self.state) {
            SetupState::Classifying { .. } => SetupState::PickingAction,
            SetupState::Provisioning { action, sets } => SetupState::ReviewingGroups {
                action,
                sets,
                unreported_domains: 0,
            },
            other => other,
        };
    }

    /// Working sets, while reviewing.
    pub fn sets(&self) -> Option<&SenderSets> {
        match &self.state {
            SetupState::ReviewingGroups { sets, .. } | SetupState::Provisioning { sets, .. } => {
                Some(sets)
            }
            _ => None,
        }
    }
}

/// Liveness flag shared between a session and the stages it runs.
///
/// Stages are not cancelled when a session closes; their results are simply
/// not committed.
#[derive(Debug, Clone)]
pub struct SessionGuard {
    open: Arc<AtomicBool>,
}

impl Default for SessionGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionGuard {
    /// Creates an open guard.
    pub fn new() -> Self {
        Self {
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Marks the session closed.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    /// Whether the session is still open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
