//! Integration tests for the setup and removal pipeline.
//!
//! These run whole sessions against the in-memory mailbox and a fixed
//! directory. Each service module contains its own unit tests for detailed
//! logic testing.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use spamguard::app::SetupState;
use spamguard::config::Settings;
use spamguard::domain::{
    system_labels, BlockedEmail, DirectoryEntry, FilterAction, LabelId, MessageId,
};
use spamguard::providers::directory::{DirectoryApi, DirectoryError};
use spamguard::providers::mail::{InMemoryMailbox, MailService};
use spamguard::services::{PipelineError, Selection, SetKind};
use spamguard::{RemovalSession, SetupSession};

// ============================================================================
// Fixtures
// ============================================================================

/// Directory with a fixed listing that records reported domains.
#[derive(Default)]
struct FixedDirectory {
    reported: Mutex<Vec<String>>,
    fail_reports: bool,
}

impl FixedDirectory {
    fn reported(&self) -> Vec<String> {
        self.reported.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DirectoryApi for FixedDirectory {
    async fn college_domains(&self) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        Ok(vec![
            DirectoryEntry::new("mit.edu", "MIT"),
            DirectoryEntry::new("stanford.edu", "Stanford"),
            DirectoryEntry::new("commonapp.org", "Common App"),
        ])
    }

    async fn blocked_emails(&self) -> Result<Vec<BlockedEmail>, DirectoryError> {
        Ok(vec![BlockedEmail {
            email_address: "info@collegeboard.org".to_string(),
            is_edu: false,
            school: "College Board".to_string(),
            name: "College Board".to_string(),
        }])
    }

    async fn report_unknown_domain(&self, domain: &str) -> Result<(), DirectoryError> {
        if self.fail_reports {
            return Err(DirectoryError::Decode("directory unavailable".to_string()));
        }
        if let Ok(mut reported) = self.reported.lock() {
            reported.push(domain.to_string());
        }
        Ok(())
    }
}

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.limits.metadata_group_delay_ms = 0;
    settings
}

/// A mailbox with admissions mail mixed into personal mail.
async fn seeded_mailbox() -> Arc<InMemoryMailbox> {
    let mailbox = Arc::new(InMemoryMailbox::new());
    mailbox
        .deliver("\"MIT Admissions\" <admit@mit.edu>", "Your application")
        .await;
    mailbox.deliver("admit@mit.edu", "Early action deadline").await;
    mailbox
        .deliver("\"Stanford\" <apply@admission.stanford.edu>", "Visit us")
        .await;
    mailbox
        .deliver("info@collegeboard.org", "SAT registration")
        .await;
    mailbox
        .deliver(
            "\"Greenfield\" <news@greenfield.edu>",
            "Update your email preferences",
        )
        .await;
    mailbox.deliver("mom@gmail.com", "Dinner Sunday").await;
    mailbox.deliver("boss@work.com", "Quarterly review").await;
    mailbox
}

fn inbox_ids(snapshot: &[(MessageId, BTreeSet<LabelId>)]) -> Vec<MessageId> {
    snapshot
        .iter()
        .filter(|(_, labels)| labels.contains(&system_labels::inbox()))
        .map(|(id, _)| id.clone())
        .collect()
}

// ============================================================================
// Setup
// ============================================================================

#[tokio::test]
async fn setup_groups_senders_by_institution() {
    let mailbox = seeded_mailbox().await;
    let directory = Arc::new(FixedDirectory::default());
    let mut session = SetupSession::new(mailbox, directory.clone(), settings());
    session.start().await.unwrap();

    let sets = session.choose_action(FilterAction::Archive).await.unwrap();
    let groups: Vec<(&str, usize)> = sets
        .blocked
        .iter()
        .map(|g| (g.organization.as_str(), g.message_count()))
        .collect();
    assert_eq!(
        groups,
        vec![
            ("College Board", 1),
            ("Greenfield", 1),
            ("MIT", 2),
            ("Stanford", 1)
        ]
    );
    assert!(sets.whitelist.is_empty());
    assert_eq!(directory.reported(), vec!["greenfield.edu"]);
}

#[tokio::test]
async fn trash_round_trip_restores_mailbox() {
    let mailbox = seeded_mailbox().await;
    let before = mailbox.snapshot().await;

    let mut session = SetupSession::new(
        mailbox.clone(),
        Arc::new(FixedDirectory::default()),
        settings(),
    );
    session.start().await.unwrap();
    session.choose_action(FilterAction::Trash).await.unwrap();
    let report = session.provision().await.unwrap();
    assert_eq!(report.messages_modified, 5);

    let provisioned = mailbox.snapshot().await;
    assert_eq!(inbox_ids(&provisioned).len(), 2);

    // Filters catch new mail from blocked senders.
    let late = mailbox.deliver("admit@mit.edu", "Decision released").await;
    let late_labels = mailbox.labels_of(&late).await.unwrap();
    assert!(late_labels.contains(&system_labels::trash()));

    let removal = RemovalSession::new(mailbox.clone(), settings());
    let removed = removal.remove().await.unwrap();
    assert_eq!(removed.messages_restored, 6);
    assert!(mailbox.list_filters().await.unwrap().is_empty());
    assert!(mailbox.list_labels().await.unwrap().is_empty());

    let after = mailbox.snapshot().await;
    assert_eq!(&after[..before.len()], &before[..]);
    assert!(after[before.len()].1.contains(&system_labels::inbox()));
}

#[tokio::test]
async fn round_trip_keeps_archived_and_read_mail_as_it_was() {
    for action in FilterAction::ALL {
        let mailbox = seeded_mailbox().await;
        mailbox
            .deliver_with_labels("admit@mit.edu", "Archived brochure", &[system_labels::unread()])
            .await;
        mailbox
            .deliver_with_labels("admit@mit.edu", "Read brochure", &[system_labels::inbox()])
            .await;
        let before = mailbox.snapshot().await;

        let mut session = SetupSession::new(
            mailbox.clone(),
            Arc::new(FixedDirectory::default()),
            settings(),
        );
        session.choose_action(action).await.unwrap();
        let report = session.provision().await.unwrap();
        assert_eq!(report.messages_modified, 6, "{}", action);

        RemovalSession::new(mailbox.clone(), settings())
            .remove()
            .await
            .unwrap();
        assert_eq!(mailbox.snapshot().await, before, "{}", action);
    }
}

#[tokio::test]
async fn expired_trash_is_not_restored() {
    let mailbox = seeded_mailbox().await;
    let mut session = SetupSession::new(
        mailbox.clone(),
        Arc::new(FixedDirectory::default()),
        settings(),
    );
    session.choose_action(FilterAction::Trash).await.unwrap();
    session.provision().await.unwrap();

    assert_eq!(mailbox.expire_trashed().await, 5);

    let removed = RemovalSession::new(mailbox.clone(), settings())
        .remove()
        .await
        .unwrap();
    assert_eq!(removed.messages_restored, 0);
    assert_eq!(mailbox.snapshot().await.len(), 2);
}

#[tokio::test]
async fn whitelisted_institution_is_left_alone() {
    let mailbox = seeded_mailbox().await;
    let mut session = SetupSession::new(
        mailbox.clone(),
        Arc::new(FixedDirectory::default()),
        settings(),
    );
    session.choose_action(FilterAction::Archive).await.unwrap();
    session
        .move_member(SetKind::Blocked, SetKind::Whitelist, "MIT", Selection::Group)
        .unwrap();
    let report = session.provision().await.unwrap();

    assert_eq!(report.blocked_addresses, 3);
    assert_eq!(report.messages_modified, 3);
    match session.state() {
        SetupState::Done { whitelist, .. } => {
            assert_eq!(whitelist.len(), 1);
            assert_eq!(whitelist[0].organization, "MIT");
        }
        other => panic!("unexpected state {:?}", other),
    }

    let still_in_inbox = inbox_ids(&mailbox.snapshot().await);
    assert_eq!(still_in_inbox.len(), 4);
}

#[tokio::test]
async fn second_setup_is_refused_until_removed() {
    let mailbox = seeded_mailbox().await;
    let mut first = SetupSession::new(
        mailbox.clone(),
        Arc::new(FixedDirectory::default()),
        settings(),
    );
    first.start().await.unwrap();
    first.choose_action(FilterAction::MarkRead).await.unwrap();
    first.provision().await.unwrap();

    let second = SetupSession::new(
        mailbox.clone(),
        Arc::new(FixedDirectory::default()),
        settings(),
    );
    assert!(matches!(
        second.start().await,
        Err(PipelineError::AlreadyProvisioned(ref name))
            if name == "Modified by College Spam Guard (read)"
    ));

    let removal = RemovalSession::new(mailbox.clone(), settings());
    let status = removal.status().await.unwrap().unwrap();
    assert_eq!(status.action(), FilterAction::MarkRead);
    assert_eq!(status.blocked_addresses.len(), 4);
    removal.remove().await.unwrap();

    assert!(second.start().await.is_ok());
}

#[tokio::test]
async fn directory_report_failure_does_not_stop_setup() {
    let mailbox = seeded_mailbox().await;
    let directory = Arc::new(FixedDirectory {
        fail_reports: true,
        ..FixedDirectory::default()
    });
    let mut session = SetupSession::new(mailbox, directory.clone(), settings());

    session.choose_action(FilterAction::Trash).await.unwrap();
    match session.state() {
        SetupState::ReviewingGroups {
            unreported_domains, ..
        } => assert_eq!(*unreported_domains, 1),
        other => panic!("unexpected state {:?}", other),
    }
    assert!(directory.reported().is_empty());
}

#[tokio::test]
async fn back_then_new_action_reclassifies() {
    let mailbox = seeded_mailbox().await;
    let mut session = SetupSession::new(
        mailbox.clone(),
        Arc::new(FixedDirectory::default()),
        settings(),
    );
    session.choose_action(FilterAction::Trash).await.unwrap();
    session.back().unwrap();
    assert_eq!(session.state(), &SetupState::PickingAction);

    session.choose_action(FilterAction::MarkRead).await.unwrap();
    let report = session.provision().await.unwrap();
    assert_eq!(report.label.name, "Modified by College Spam Guard (read)");

    for (_, labels) in mailbox.snapshot().await {
        assert!(labels.contains(&system_labels::inbox()));
    }
}
