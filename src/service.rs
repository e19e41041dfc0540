//! Service layer API for absence commands.
//!
//! Every mutation runs as an optimistic read-modify-write: load the stored bytes,
//! validate and apply the command to the freshly decoded request, then
//! compare-and-swap against the bytes that were read. A lost race re-runs the whole
//! attempt from the read, up to `max_retries` times.
use super::absence::{
    AbsenceRequest, AbsenceStatus, CalendarDate, DecisionOutcome, TimeStamp,
    require_dates_and_reason,
};
use super::builder::RequestDraft;
use super::directory::{
    CoverageCheck, Directory, LogNotifier, NoCoverageConflicts, Notification,
    NotificationCategory, Notifier,
};
use super::error::{AbsenceError, ValidationError};
use super::policy::{self, PolicyInput};
use super::store::{RequestStore, SledStore, SwapOutcome};
use super::timeline::{DateTimeline, Reconciliation};
use super::utils;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Re-reads allowed after the first attempt loses a race.
    pub max_retries: u32,
    /// Hours one absent day counts for when sizing a request against policy.
    pub hours_per_day: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            hours_per_day: 8,
        }
    }
}

impl ServiceConfig {
    pub fn set_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
    pub fn set_hours_per_day(mut self, hours: u32) -> Self {
        self.hours_per_day = hours;
        self
    }
}

/// Mutations accepted by [`AbsenceService::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    AddDays {
        dates: BTreeSet<CalendarDate>,
        reason: String,
        actor: String,
    },
    CancelDays {
        dates: BTreeSet<CalendarDate>,
        reason: String,
        actor: String,
    },
    /// Cancels whatever is active when the command runs.
    CancelRemaining { reason: String, actor: String },
    Decide {
        outcome: DecisionOutcome,
        comment: String,
        actor: String,
    },
    Delete { actor: String },
}

impl Command {
    pub fn actor(&self) -> &str {
        match self {
            Command::AddDays { actor, .. }
            | Command::CancelDays { actor, .. }
            | Command::CancelRemaining { actor, .. }
            | Command::Decide { actor, .. }
            | Command::Delete { actor } => actor,
        }
    }

    /// Input checks that need no stored state.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Command::AddDays { dates, reason, .. } | Command::CancelDays { dates, reason, .. } => {
                require_dates_and_reason(dates, reason)?;
            }
            Command::CancelRemaining { reason, .. } => {
                if reason.trim().is_empty() {
                    return Err(ValidationError::MissingReason);
                }
            }
            Command::Decide {
                outcome: DecisionOutcome::Rejected,
                comment,
                ..
            } if comment.trim().is_empty() => {
                return Err(ValidationError::MissingRejectionComment);
            }
            Command::Decide { .. } | Command::Delete { .. } => {}
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        match self {
            Command::AddDays { .. } => "add_days",
            Command::CancelDays { .. } => "cancel_days",
            Command::CancelRemaining { .. } => "cancel_remaining",
            Command::Decide { .. } => "decide",
            Command::Delete { .. } => "delete",
        }
    }
}

pub struct AbsenceService {
    store: Arc<dyn RequestStore>,
    directory: Arc<dyn Directory>,
    notifier: Arc<dyn Notifier>,
    coverage: Arc<dyn CoverageCheck>,
    config: ServiceConfig,
}

impl AbsenceService {
    pub fn new(store: Arc<dyn RequestStore>, directory: Arc<dyn Directory>) -> Self {
        Self {
            store,
            directory,
            notifier: Arc::new(LogNotifier),
            coverage: Arc::new(NoCoverageConflicts),
            config: ServiceConfig::default(),
        }
    }

    /// Service over a sled database, using its `absence_*` trees.
    pub fn open(
        instance: Arc<sled::Db>,
        directory: Arc<dyn Directory>,
    ) -> Result<Self, AbsenceError> {
        let store = SledStore::open(&instance)?;
        Ok(Self::new(Arc::new(store), directory))
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
    pub fn with_coverage(mut self, coverage: Arc<dyn CoverageCheck>) -> Self {
        self.coverage = coverage;
        self
    }
    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Submit a new absence request. The approval policy may approve it on the spot.
    pub fn create_request(&self, draft: RequestDraft) -> Result<AbsenceRequest, AbsenceError> {
        let requester_id = draft.requester().unwrap_or_default().to_string();
        let allowed = draft
            .kind()
            .map(|kind| self.directory.reason_codes(kind))
            .unwrap_or_default();
        draft.validate(&allowed)?;
        if self.directory.requester(&requester_id).is_none() {
            return Err(ValidationError::UnknownRequester(requester_id).into());
        }

        let id = utils::new_absence_id().map_err(|err| AbsenceError::Identifier(err.to_string()))?;
        let now = TimeStamp::new();
        let mut request = draft.build(id, &allowed, now.clone())?;
        let auto_approved = self.apply_policy(&mut request, now)?;

        self.store.insert(&request)?;

        tracing::info!(
            request_id = %request.id,
            requester = %request.requester,
            kind = ?request.kind,
            status = ?request.status(),
            "absence request created"
        );

        if auto_approved {
            self.dispatch(
                vec![request.requester.clone()],
                "Absence approved",
                format!("Request {} was approved automatically", request.id),
                NotificationCategory::AutoApproved,
            );
        } else {
            self.dispatch(
                self.directory.deciders(),
                "Absence request awaiting review",
                format!("{} filed request {}", request.requester, request.id),
                NotificationCategory::Submitted,
            );
        }

        Ok(request)
    }

    pub fn add_days(
        &self,
        request_id: &str,
        dates: BTreeSet<CalendarDate>,
        reason: &str,
        actor: &str,
    ) -> Result<AbsenceRequest, AbsenceError> {
        self.execute(
            request_id,
            Command::AddDays {
                dates,
                reason: reason.to_string(),
                actor: actor.to_string(),
            },
        )
    }

    pub fn cancel_days(
        &self,
        request_id: &str,
        dates: BTreeSet<CalendarDate>,
        reason: &str,
        actor: &str,
    ) -> Result<AbsenceRequest, AbsenceError> {
        self.execute(
            request_id,
            Command::CancelDays {
                dates,
                reason: reason.to_string(),
                actor: actor.to_string(),
            },
        )
    }

    pub fn cancel_remaining(
        &self,
        request_id: &str,
        reason: &str,
        actor: &str,
    ) -> Result<AbsenceRequest, AbsenceError> {
        self.execute(
            request_id,
            Command::CancelRemaining {
                reason: reason.to_string(),
                actor: actor.to_string(),
            },
        )
    }

    pub fn decide(
        &self,
        request_id: &str,
        outcome: DecisionOutcome,
        comment: &str,
        actor: &str,
    ) -> Result<AbsenceRequest, AbsenceError> {
        self.execute(
            request_id,
            Command::Decide {
                outcome,
                comment: comment.to_string(),
                actor: actor.to_string(),
            },
        )
    }

    pub fn delete_request(
        &self,
        request_id: &str,
        actor: &str,
    ) -> Result<AbsenceRequest, AbsenceError> {
        self.execute(
            request_id,
            Command::Delete {
                actor: actor.to_string(),
            },
        )
    }

    /// Runs one command as an atomic read-modify-write against the stored request.
    pub fn execute(
        &self,
        request_id: &str,
        command: Command,
    ) -> Result<AbsenceRequest, AbsenceError> {
        command.validate()?;
        if let Command::Decide { actor, .. } = &command {
            if !self.directory.is_decider(actor) {
                return Err(AbsenceError::Unauthorized {
                    actor: actor.clone(),
                });
            }
        }

        let attempts = self.config.max_retries.saturating_add(1);
        for attempt in 1..=attempts {
            let current = self
                .store
                .load(request_id)?
                .ok_or_else(|| AbsenceError::NotFound(request_id.to_string()))?;

            self.authorize(&current.request, &command)?;

            let mut next = current.request.clone();
            self.apply(&mut next, &command)?;

            match self.store.swap(&current, &next)? {
                SwapOutcome::Swapped => {
                    tracing::info!(
                        request_id = %next.id,
                        command = command.name(),
                        actor = %command.actor(),
                        status = ?next.status(),
                        attempt,
                        "absence command committed"
                    );
                    self.notify_committed(&current.request, &next, &command);
                    return Ok(next);
                }
                SwapOutcome::Conflict => {
                    tracing::debug!(
                        request_id,
                        command = command.name(),
                        attempt,
                        "concurrent write detected, retrying from a fresh read"
                    );
                }
            }
        }

        tracing::warn!(
            request_id,
            command = command.name(),
            attempts,
            "giving up after repeated write conflicts"
        );
        Err(AbsenceError::ConcurrencyConflict {
            id: request_id.to_string(),
            attempts,
        })
    }

    /// Non-decision commands come from the requester or a decider.
    fn authorize(&self, request: &AbsenceRequest, command: &Command) -> Result<(), AbsenceError> {
        let actor = command.actor();
        if matches!(command, Command::Decide { .. })
            || actor == request.requester
            || self.directory.is_decider(actor)
        {
            return Ok(());
        }
        Err(AbsenceError::Unauthorized {
            actor: actor.to_string(),
        })
    }

    fn apply(&self, request: &mut AbsenceRequest, command: &Command) -> Result<(), AbsenceError> {
        let now = TimeStamp::new();
        match command {
            Command::AddDays {
                dates,
                reason,
                actor,
            } => {
                let was_pending = request.status() == AbsenceStatus::Pending;
                request.add_dates(dates.clone(), reason.clone(), actor.clone(), now.clone())?;
                if was_pending {
                    self.apply_policy(request, now)?;
                }
            }
            Command::CancelDays {
                dates,
                reason,
                actor,
            } => {
                request.cancel_dates(dates.clone(), reason.clone(), actor.clone(), now)?;
            }
            Command::CancelRemaining { reason, actor } => {
                request.ensure_open()?;
                let remaining = request.active_dates();
                request.cancel_dates(remaining, reason.clone(), actor.clone(), now)?;
            }
            Command::Decide {
                outcome,
                comment,
                actor,
            } => {
                request.decide(*outcome, comment.clone(), actor.clone(), now)?;
            }
            Command::Delete { actor } => {
                request.mark_deleted(actor.clone(), now)?;
            }
        }
        Ok(())
    }

    /// Runs the approval policy on a pending request. Returns whether it approved.
    fn apply_policy(
        &self,
        request: &mut AbsenceRequest,
        at: TimeStamp<Utc>,
    ) -> Result<bool, AbsenceError> {
        if request.status() != AbsenceStatus::Pending {
            return Ok(false);
        }

        let rules = self.directory.approval_policy();
        let has_conflict = rules.needs_coverage() && self.has_coverage_conflict(request);
        let input = PolicyInput::from_request(request, self.config.hours_per_day, has_conflict);
        let decision = policy::evaluate(&input, &rules);

        tracing::debug!(
            request_id = %request.id,
            auto_approve = decision.auto_approve,
            reason = ?decision.reason,
            "approval policy evaluated"
        );

        if !decision.auto_approve {
            return Ok(false);
        }
        request.auto_approve(decision.message.unwrap_or_default(), at)?;
        Ok(true)
    }

    fn has_coverage_conflict(&self, request: &AbsenceRequest) -> bool {
        let Some(requester) = self.directory.requester(&request.requester) else {
            return false;
        };
        let (Some(position), Some(threshold)) = (requester.position, requester.coverage_threshold)
        else {
            return false;
        };
        request
            .active_dates()
            .into_iter()
            .any(|date| self.coverage.has_conflict(date, &position, threshold))
    }

    fn notify_committed(&self, before: &AbsenceRequest, after: &AbsenceRequest, command: &Command) {
        let actor = command.actor();
        // the other party hears about edits
        let counterpart = if actor == after.requester {
            self.directory.deciders()
        } else {
            vec![after.requester.clone()]
        };

        match command {
            Command::AddDays { dates, .. } => {
                self.dispatch(
                    counterpart,
                    "Absence extended",
                    format!("{} added {} day(s) to {}", actor, dates.len(), after.id),
                    NotificationCategory::DatesAdded,
                );
                if before.status() == AbsenceStatus::Pending
                    && after.status() == AbsenceStatus::Approved
                {
                    self.dispatch(
                        vec![after.requester.clone()],
                        "Absence approved",
                        format!("Request {} was approved automatically", after.id),
                        NotificationCategory::AutoApproved,
                    );
                }
            }
            Command::CancelDays { .. } | Command::CancelRemaining { .. } => {
                let cancelled = after
                    .cancellations()
                    .last()
                    .map(|c| c.dates.len())
                    .unwrap_or_default();
                self.dispatch(
                    counterpart,
                    "Absence days cancelled",
                    format!("{} cancelled {} day(s) of {}", actor, cancelled, after.id),
                    NotificationCategory::DatesCancelled,
                );
            }
            Command::Decide { outcome, .. } => {
                self.dispatch(
                    vec![after.requester.clone()],
                    "Absence request decided",
                    format!("Request {} was {:?}", after.id, outcome),
                    NotificationCategory::Decided,
                );
            }
            Command::Delete { .. } => {}
        }
    }

    fn dispatch(
        &self,
        recipients: Vec<String>,
        title: &str,
        body: String,
        category: NotificationCategory,
    ) {
        for recipient in recipients {
            let notification = Notification {
                recipient,
                title: title.to_string(),
                body: body.clone(),
                category,
            };
            if let Err(err) = self.notifier.notify(&notification) {
                tracing::warn!(
                    recipient = %notification.recipient,
                    category = %category,
                    error = %err,
                    "notification delivery failed"
                );
            }
        }
    }

    /// Current stored request. Tombstoned requests are reported as missing.
    pub fn get_request(&self, request_id: &str) -> Result<AbsenceRequest, AbsenceError> {
        match self.store.load(request_id)? {
            Some(current) if !current.request.is_deleted() => Ok(current.request),
            _ => Err(AbsenceError::NotFound(request_id.to_string())),
        }
    }

    pub fn list_for_requester(&self, requester: &str) -> Result<Vec<AbsenceRequest>, AbsenceError> {
        let mut requests = vec![];
        for id in self.store.ids_for_requester(requester)? {
            if let Some(current) = self.store.load(&id)? {
                if !current.request.is_deleted() {
                    requests.push(current.request);
                }
            }
        }
        Ok(requests)
    }

    /// Derived per-date view of a request. `as_of` defaults to every recorded event.
    pub fn reconcile(
        &self,
        request_id: &str,
        as_of: Option<TimeStamp<Utc>>,
    ) -> Result<Reconciliation, AbsenceError> {
        let request = self.get_request(request_id)?;
        let timeline = DateTimeline::from_request(&request);
        Ok(match as_of {
            Some(as_of) => timeline.reconcile_at(&as_of),
            None => timeline.reconcile(),
        })
    }
}
