//! Smoke Screen Unit tests for absence ledger components
//!
//! These test are unit tests that span the codebase, testing behavior in
//! isolation from integration scenarios. These are intended as smoke-screen
//! and generally test the happy-path.
//!

use absence_ledger::{
    absence::{AbsenceKind, AbsenceStatus, CalendarDate, TimeStamp},
    builder::RequestDraft,
    directory::{Directory, NotificationCategory, Requester, StaticDirectory},
    error::{AbsenceError, TransitionError, ValidationError},
    policy::{evaluate, ApprovalPolicy, PolicyInput, PolicyMode, PolicyReason},
    timeline::{DateDisplay, DateTimeline},
    utils::{new_absence_id, new_uuid_to_bech32},
};
use chrono::{Datelike, Timelike, Utc};

fn day(d: u32) -> CalendarDate {
    CalendarDate::from_ymd(2024, 5, d).unwrap()
}

// UTILS MODULE TESTS
#[cfg(test)]
mod utils_tests {
    use super::*;

    /// Test that new_uuid_to_bech32 generates valid bech32-encoded strings
    /// with the correct human-readable prefix
    #[test]
    fn generates_valid_bech32_with_hrp() {
        let encoded = new_uuid_to_bech32("absence_").unwrap();
        assert!(encoded.starts_with("absence_1"));
        assert!(encoded.len() > 10);
    }

    /// Test that the function handles empty strings appropriately
    #[test]
    fn handles_empty_hrp() {
        assert!(new_uuid_to_bech32("").is_err());
    }

    /// Test that multiple calls generate unique identifiers
    #[test]
    fn generates_unique_ids() {
        let id1 = new_absence_id().unwrap();
        let id2 = new_absence_id().unwrap();
        let id3 = new_absence_id().unwrap();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }
}

// ABSENCE MODULE TESTS
#[cfg(test)]
mod absence_tests {
    use super::*;

    /// Test that TimeStamp::new() creates a timestamp close to current time
    #[test]
    fn timestamp_new_creates_current_time() {
        let ts = TimeStamp::new();
        let now = Utc::now();

        let diff = (now - ts.to_datetime_utc()).num_seconds().abs();
        assert!(diff < 1);
    }

    /// Test that TimeStamp can be created with specific date/time values
    #[test]
    fn timestamp_new_with_creates_specific_time() {
        let dt = TimeStamp::new_with(2024, 6, 15, 10, 30, 0)
            .unwrap()
            .to_datetime_utc();

        assert_eq!(dt.year(), 2024);
        assert_eq!(dt.month(), 6);
        assert_eq!(dt.day(), 15);
        assert_eq!(dt.hour(), 10);
        assert_eq!(dt.minute(), 30);
    }

    /// Test that impossible wall-clock values are refused instead of panicking
    #[test]
    fn timestamp_new_with_rejects_invalid_dates() {
        assert!(TimeStamp::new_with(2024, 2, 30, 0, 0, 0).is_none());
        assert!(CalendarDate::from_ymd(2023, 2, 29).is_none());
    }

    /// Calendar dates order chronologically
    #[test]
    fn calendar_dates_sort_chronologically() {
        let mut dates = vec![day(3), "2023-12-31".parse().unwrap(), day(1)];
        dates.sort();
        assert_eq!(dates[0].to_string(), "2023-12-31");
        assert_eq!(dates[2], day(3));
    }

    /// Decoding a stored request reproduces it field for field
    #[test]
    fn request_cbor_roundtrip() {
        let request = RequestDraft::new()
            .set_requester("user_ana")
            .set_kind(AbsenceKind::Leave)
            .set_reason_code("surgery")
            .add_dates([day(6), day(7)])
            .build("absence_x".into(), &[], TimeStamp::new())
            .unwrap();

        let bytes = request.encode().unwrap();
        let decoded = absence_ledger::absence::AbsenceRequest::decode(&bytes).unwrap();
        assert_eq!(request, decoded);
        assert_eq!(decoded.status(), AbsenceStatus::Pending);
        assert!(decoded.decided_at().is_none());
    }

    /// Garbage bytes surface as a decode error
    #[test]
    fn decoding_garbage_fails() {
        let res = absence_ledger::absence::AbsenceRequest::decode(&[0xff, 0x00, 0x13]);
        assert!(matches!(res, Err(AbsenceError::Decode(_))));
    }
}

// BUILDER MODULE TESTS
#[cfg(test)]
mod builder_tests {
    use super::*;

    #[test]
    fn draft_collects_unique_dates() {
        let draft = RequestDraft::new()
            .add_date(day(1))
            .add_date(day(1))
            .add_dates([day(2), day(1)]);
        assert_eq!(draft.dates().len(), 2);
    }

    #[test]
    fn blank_requester_is_rejected() {
        let draft = RequestDraft::new()
            .set_requester("   ")
            .set_kind(AbsenceKind::Permit)
            .set_reason_code("exam")
            .add_date(day(1));
        assert_eq!(draft.validate(&[]), Err(ValidationError::MissingRequester));
    }
}

// TIMELINE MODULE TESTS
#[cfg(test)]
mod timeline_tests {
    use super::*;

    #[test]
    fn cancel_then_re_add_reads_as_added() {
        let mut request = RequestDraft::new()
            .set_requester("user_ana")
            .set_kind(AbsenceKind::Permit)
            .set_reason_code("exam")
            .add_dates([day(1), day(2)])
            .build("absence_x".into(), &[], TimeStamp::new())
            .unwrap();

        request
            .cancel_dates(
                [day(2)].into(),
                "rescheduled".into(),
                "user_ana".into(),
                TimeStamp::new(),
            )
            .unwrap();
        request
            .add_dates([day(2)].into(), "back on".into(), "user_ana".into(), TimeStamp::new())
            .unwrap();

        let state = DateTimeline::from_request(&request).reconcile();
        assert_eq!(state.active_dates, vec![day(1), day(2)]);
        assert_eq!(state.display(&day(2)), Some(DateDisplay::Added));
        assert_eq!(state.display(&day(1)), Some(DateDisplay::Original));
        assert!(state.cancelled_dates.is_empty());
    }

    #[test]
    fn terminal_request_refuses_edits() {
        let mut request = RequestDraft::new()
            .set_requester("user_ana")
            .set_kind(AbsenceKind::Permit)
            .set_reason_code("exam")
            .add_date(day(1))
            .build("absence_x".into(), &[], TimeStamp::new())
            .unwrap();
        request
            .cancel_dates([day(1)].into(), "x".into(), "user_ana".into(), TimeStamp::new())
            .unwrap();

        let err = request
            .cancel_dates([day(1)].into(), "x".into(), "user_ana".into(), TimeStamp::new())
            .unwrap_err();
        assert!(matches!(
            err,
            AbsenceError::InvalidStateTransition(TransitionError::Terminal { .. })
        ));
    }
}

// POLICY AND DIRECTORY TESTS
#[cfg(test)]
mod policy_tests {
    use super::*;

    #[test]
    fn disabled_policy_never_approves() {
        let policy = ApprovalPolicy {
            enabled: false,
            mode: PolicyMode::All,
            message: "auto".into(),
        };
        let input = PolicyInput {
            kind: AbsenceKind::Permit,
            hours: 0,
            has_conflict: false,
        };
        let decision = evaluate(&input, &policy);
        assert!(!decision.auto_approve);
        assert_eq!(decision.reason, PolicyReason::Disabled);
    }

    #[test]
    fn static_directory_answers_lookups() {
        let directory = StaticDirectory::new()
            .add_requester(Requester::new("user_ana", "Ana").with_position("nurse", 2))
            .add_decider("admin_b")
            .add_decider("admin_a")
            .set_reason_codes(AbsenceKind::Permit, &["exam", "moving"])
            .set_policy(ApprovalPolicy::new(PolicyMode::PermitsOnly, "ok"));

        assert_eq!(
            directory.requester("user_ana").unwrap().position.as_deref(),
            Some("nurse")
        );
        assert!(directory.requester("ghost").is_none());
        assert_eq!(directory.deciders(), vec!["admin_a", "admin_b"]);
        assert!(directory.is_decider("admin_a"));
        assert!(!directory.is_decider("user_ana"));
        assert_eq!(directory.reason_codes(AbsenceKind::Permit).len(), 2);
        assert!(directory.reason_codes(AbsenceKind::Leave).is_empty());
        assert!(directory.approval_policy().enabled);
    }

    #[test]
    fn notification_categories_have_stable_names() {
        assert_eq!(NotificationCategory::Submitted.to_string(), "absence_submitted");
        assert_eq!(
            NotificationCategory::DatesCancelled.to_string(),
            "absence_dates_cancelled"
        );
    }
}
