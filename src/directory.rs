//! Collaborators the engine consumes but does not own: identity and policy lookup,
//! notification delivery and the coverage-conflict predicate.
use super::absence::{AbsenceKind, CalendarDate};
use super::policy::ApprovalPolicy;
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub id: String,
    pub name: String,
    pub position: Option<String>, // job role used for coverage checks
    pub coverage_threshold: Option<u32>,
}

impl Requester {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            position: None,
            coverage_threshold: None,
        }
    }
    pub fn with_position(mut self, position: &str, threshold: u32) -> Self {
        self.position = Some(position.to_string());
        self.coverage_threshold = Some(threshold);
        self
    }
}

/// Read-only identity and configuration lookups.
pub trait Directory: Send + Sync {
    fn requester(&self, id: &str) -> Option<Requester>;
    fn approval_policy(&self) -> ApprovalPolicy;
    /// Configured reason codes for `kind`. Empty means unrestricted.
    fn reason_codes(&self, kind: AbsenceKind) -> Vec<String>;
    fn is_decider(&self, actor: &str) -> bool;
    fn deciders(&self) -> Vec<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCategory {
    Submitted,
    AutoApproved,
    Decided,
    DatesAdded,
    DatesCancelled,
}

impl fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NotificationCategory::Submitted => "absence_submitted",
            NotificationCategory::AutoApproved => "absence_auto_approved",
            NotificationCategory::Decided => "absence_decided",
            NotificationCategory::DatesAdded => "absence_dates_added",
            NotificationCategory::DatesCancelled => "absence_dates_cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: String,
    pub title: String,
    pub body: String,
    pub category: NotificationCategory,
}

/// Fire-and-forget delivery. Errors are logged by the caller and never undo a command.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        tracing::info!(
            recipient = %notification.recipient,
            category = %notification.category,
            title = %notification.title,
            "notification"
        );
        Ok(())
    }
}

/// Pre-computed "too many people out" predicate for one position on one date.
pub trait CoverageCheck: Send + Sync {
    fn has_conflict(&self, date: CalendarDate, position: &str, threshold: u32) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoCoverageConflicts;

impl CoverageCheck for NoCoverageConflicts {
    fn has_conflict(&self, _: CalendarDate, _: &str, _: u32) -> bool {
        false
    }
}

/// In-memory directory, handy for embedding and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    requesters: HashMap<String, Requester>,
    deciders: HashSet<String>,
    policy: ApprovalPolicy,
    reason_codes: HashMap<AbsenceKind, Vec<String>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add_requester(mut self, requester: Requester) -> Self {
        self.requesters.insert(requester.id.clone(), requester);
        self
    }
    pub fn add_decider(mut self, actor: &str) -> Self {
        self.deciders.insert(actor.to_string());
        self
    }
    pub fn set_policy(mut self, policy: ApprovalPolicy) -> Self {
        self.policy = policy;
        self
    }
    pub fn set_reason_codes(mut self, kind: AbsenceKind, codes: &[&str]) -> Self {
        self.reason_codes
            .insert(kind, codes.iter().map(|c| c.to_string()).collect());
        self
    }
}

impl Directory for StaticDirectory {
    fn requester(&self, id: &str) -> Option<Requester> {
        self.requesters.get(id).cloned()
    }
    fn approval_policy(&self) -> ApprovalPolicy {
        self.policy.clone()
    }
    fn reason_codes(&self, kind: AbsenceKind) -> Vec<String> {
        self.reason_codes.get(&kind).cloned().unwrap_or_default()
    }
    fn is_decider(&self, actor: &str) -> bool {
        self.deciders.contains(actor)
    }
    fn deciders(&self) -> Vec<String> {
        let mut deciders: Vec<String> = self.deciders.iter().cloned().collect();
        deciders.sort();
        deciders
    }
}
