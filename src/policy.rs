//! Auto-approval policy evaluation
use super::absence::{AbsenceKind, AbsenceRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMode {
    All,
    LeavesOnly,
    PermitsOnly,
    /// Coverage-governed: approve when the requested hours fit and nobody in the
    /// same position is already out.
    WithinHours { max_hours: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalPolicy {
    pub enabled: bool,
    pub mode: PolicyMode,
    pub message: String, // stored as the decision comment on auto-approval
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: PolicyMode::All,
            message: String::new(),
        }
    }
}

impl ApprovalPolicy {
    pub fn new(mode: PolicyMode, message: &str) -> Self {
        Self {
            enabled: true,
            mode,
            message: message.to_string(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// Whether evaluation needs the coverage predicate at all.
    pub fn needs_coverage(&self) -> bool {
        self.enabled && matches!(self.mode, PolicyMode::WithinHours { .. })
    }
}

/// Everything the evaluator looks at. `has_conflict` is computed by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyInput {
    pub kind: AbsenceKind,
    pub hours: u32,
    pub has_conflict: bool,
}

impl PolicyInput {
    pub fn from_request(request: &AbsenceRequest, hours_per_day: u32, has_conflict: bool) -> Self {
        let days = request.active_dates().len() as u32;
        Self {
            kind: request.kind,
            hours: days.saturating_mul(hours_per_day),
            has_conflict,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyReason {
    Disabled,
    AllowedForAll,
    KindMatches,
    KindMismatch,
    WithinLimits,
    OverHours,
    CoverageConflict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub auto_approve: bool,
    pub reason: PolicyReason,
    pub message: Option<String>,
}

pub fn evaluate(input: &PolicyInput, policy: &ApprovalPolicy) -> PolicyDecision {
    let (auto_approve, reason) = if !policy.enabled {
        (false, PolicyReason::Disabled)
    } else {
        match policy.mode {
            PolicyMode::All => (true, PolicyReason::AllowedForAll),
            PolicyMode::LeavesOnly => kind_rule(input.kind == AbsenceKind::Leave),
            PolicyMode::PermitsOnly => kind_rule(input.kind == AbsenceKind::Permit),
            PolicyMode::WithinHours { max_hours } => {
                let fits = input.hours <= max_hours;
                let covered = !input.has_conflict;
                let reason = match (fits, covered) {
                    (true, true) => PolicyReason::WithinLimits,
                    (false, _) => PolicyReason::OverHours,
                    (true, false) => PolicyReason::CoverageConflict,
                };
                (fits && covered, reason)
            }
        }
    };

    PolicyDecision {
        auto_approve,
        reason,
        message: auto_approve.then(|| policy.message.clone()),
    }
}

fn kind_rule(matches: bool) -> (bool, PolicyReason) {
    if matches {
        (true, PolicyReason::KindMatches)
    } else {
        (false, PolicyReason::KindMismatch)
    }
}
