//! Absence request entity, its event log and its state machine
use super::error::{AbsenceError, TransitionError, ValidationError};
use super::timeline::DateTimeline;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Actor recorded on decisions taken by the approval policy rather than a person.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbsenceKind {
    #[n(0)]
    Permit,
    #[n(1)]
    Leave,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsenceStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
    #[n(3)]
    Cancelled,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionOutcome {
    #[n(0)]
    Approved,
    #[n(1)]
    Rejected,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl<T: TimeZone + Eq> PartialOrd for TimeStamp<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: TimeZone + Eq> Ord for TimeStamp<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

/// A day on the calendar, without time or zone. Stored as days since CE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CalendarDate(NaiveDate);

impl CalendarDate {
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }
    pub fn today() -> Self {
        Self(Utc::now().date_naive())
    }
}

impl From<NaiveDate> for CalendarDate {
    fn from(value: NaiveDate) -> Self {
        Self(value)
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for CalendarDate {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map(Self)
    }
}

/// Addition event: dates appended to the request after submission.
#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct DateEdit {
    #[n(0)]
    pub applied_at: u64, // logical, shared counter with every other event of the request
    #[n(1)]
    pub recorded_at: TimeStamp<Utc>,
    #[n(2)]
    pub dates: BTreeSet<CalendarDate>,
    #[n(3)]
    pub reason: String,
    #[n(4)]
    pub actor: String,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct DateCancellation {
    #[n(0)]
    pub applied_at: u64,
    #[n(1)]
    pub recorded_at: TimeStamp<Utc>,
    #[n(2)]
    pub dates: BTreeSet<CalendarDate>,
    #[n(3)]
    pub reason: String,
    #[n(4)]
    pub actor: String,
    #[n(5)]
    pub is_full_cancellation: bool,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct Decision {
    #[n(0)]
    pub applied_at: u64,
    #[n(1)]
    pub recorded_at: TimeStamp<Utc>,
    #[n(2)]
    pub outcome: DecisionOutcome,
    #[n(3)]
    pub comment: String,
    #[n(4)]
    pub actor: String,
    #[n(5)]
    pub automatic: bool,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct Tombstone {
    #[n(0)]
    pub recorded_at: TimeStamp<Utc>,
    #[n(1)]
    pub actor: String,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct AbsenceRequest {
    #[n(0)]
    pub id: String, // bech32 encoded uuid7
    #[n(1)]
    pub requester: String,
    #[n(2)]
    pub kind: AbsenceKind,
    #[n(3)]
    pub reason_code: String,
    #[n(4)]
    original_dates: BTreeSet<CalendarDate>,
    #[n(5)]
    additions: Vec<DateEdit>,
    #[n(6)]
    cancellations: Vec<DateCancellation>,
    #[n(7)]
    status: AbsenceStatus,
    #[n(8)]
    pub submitted_at: TimeStamp<Utc>,
    #[n(9)]
    decision: Option<Decision>,
    #[n(10)]
    pub requester_comment: String,
    #[n(11)]
    last_applied: u64,
    #[n(12)]
    deleted: Option<Tombstone>,
}

/// One line of the merged audit trail returned by [`AbsenceRequest::history`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub applied_at: u64,
    pub recorded_at: TimeStamp<Utc>,
    pub actor: String,
    pub action: HistoryAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryAction {
    Submitted { dates: BTreeSet<CalendarDate> },
    Added { dates: BTreeSet<CalendarDate>, reason: String },
    Cancelled { dates: BTreeSet<CalendarDate>, reason: String, full: bool },
    Decided { outcome: DecisionOutcome, comment: String, automatic: bool },
}

impl AbsenceRequest {
    /// Creates a pending request. `original_dates` is fixed from here on.
    pub fn submit(
        id: String,
        requester: String,
        kind: AbsenceKind,
        reason_code: String,
        original_dates: BTreeSet<CalendarDate>,
        requester_comment: String,
        submitted_at: TimeStamp<Utc>,
    ) -> Result<Self, ValidationError> {
        if original_dates.is_empty() {
            return Err(ValidationError::EmptyDates);
        }
        if requester.trim().is_empty() {
            return Err(ValidationError::MissingRequester);
        }
        if reason_code.trim().is_empty() {
            return Err(ValidationError::MissingReasonCode);
        }

        Ok(Self {
            id,
            requester,
            kind,
            reason_code,
            original_dates,
            additions: vec![],
            cancellations: vec![],
            status: AbsenceStatus::Pending,
            submitted_at,
            decision: None,
            requester_comment,
            last_applied: 0,
            deleted: None,
        })
    }

    pub fn original_dates(&self) -> &BTreeSet<CalendarDate> {
        &self.original_dates
    }
    pub fn additions(&self) -> &[DateEdit] {
        &self.additions
    }
    pub fn cancellations(&self) -> &[DateCancellation] {
        &self.cancellations
    }
    pub fn status(&self) -> AbsenceStatus {
        self.status
    }
    pub fn decision(&self) -> Option<&Decision> {
        self.decision.as_ref()
    }
    pub fn decided_at(&self) -> Option<&TimeStamp<Utc>> {
        self.decision.as_ref().map(|d| &d.recorded_at)
    }
    pub fn decision_comment(&self) -> Option<&str> {
        self.decision.as_ref().map(|d| d.comment.as_str())
    }
    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }
    pub fn tombstone(&self) -> Option<&Tombstone> {
        self.deleted.as_ref()
    }

    /// Dates counted as part of the absence right now.
    pub fn active_dates(&self) -> BTreeSet<CalendarDate> {
        DateTimeline::from_request(self)
            .reconcile()
            .active_dates
            .into_iter()
            .collect()
    }

    /// Checks that additions and cancellations may still be appended.
    pub fn ensure_open(&self) -> Result<(), TransitionError> {
        if self.deleted.is_some() {
            return Err(TransitionError::Deleted);
        }
        match self.status {
            AbsenceStatus::Pending | AbsenceStatus::Approved => Ok(()),
            status => Err(TransitionError::Terminal { status }),
        }
    }

    fn ensure_pending(&self) -> Result<(), TransitionError> {
        if self.deleted.is_some() {
            return Err(TransitionError::Deleted);
        }
        if self.status != AbsenceStatus::Pending {
            return Err(TransitionError::NotPending {
                status: self.status,
            });
        }
        Ok(())
    }

    fn next_sequence(&mut self) -> u64 {
        self.last_applied += 1;
        self.last_applied
    }

    /// Appends a [`DateEdit`]. None of `dates` may be active already.
    pub fn add_dates(
        &mut self,
        dates: BTreeSet<CalendarDate>,
        reason: String,
        actor: String,
        at: TimeStamp<Utc>,
    ) -> Result<(), AbsenceError> {
        require_dates_and_reason(&dates, &reason)?;
        self.ensure_open()?;

        let active = self.active_dates();
        let overlap: Vec<CalendarDate> = dates.intersection(&active).copied().collect();
        if !overlap.is_empty() {
            return Err(TransitionError::AlreadyActive(overlap).into());
        }

        let applied_at = self.next_sequence();
        self.additions.push(DateEdit {
            applied_at,
            recorded_at: at,
            dates,
            reason,
            actor,
        });
        Ok(())
    }

    /// Appends a [`DateCancellation`]. Every date must be active. Returns true when
    /// the cancellation emptied the request, which moves it to `Cancelled`.
    pub fn cancel_dates(
        &mut self,
        dates: BTreeSet<CalendarDate>,
        reason: String,
        actor: String,
        at: TimeStamp<Utc>,
    ) -> Result<bool, AbsenceError> {
        require_dates_and_reason(&dates, &reason)?;
        self.ensure_open()?;

        let active = self.active_dates();
        let missing: Vec<CalendarDate> = dates.difference(&active).copied().collect();
        if !missing.is_empty() {
            return Err(TransitionError::NotActive(missing).into());
        }

        let is_full_cancellation = dates == active;
        let applied_at = self.next_sequence();
        self.cancellations.push(DateCancellation {
            applied_at,
            recorded_at: at,
            dates,
            reason,
            actor,
            is_full_cancellation,
        });

        if is_full_cancellation {
            self.status = AbsenceStatus::Cancelled;
        }
        Ok(is_full_cancellation)
    }

    /// Records a human decision on a pending request.
    pub fn decide(
        &mut self,
        outcome: DecisionOutcome,
        comment: String,
        actor: String,
        at: TimeStamp<Utc>,
    ) -> Result<(), AbsenceError> {
        if outcome == DecisionOutcome::Rejected && comment.trim().is_empty() {
            return Err(ValidationError::MissingRejectionComment.into());
        }
        self.ensure_pending()?;
        self.record_decision(outcome, comment, actor, at, false);
        Ok(())
    }

    /// Approval granted by policy, stored with the policy's canned message.
    pub fn auto_approve(
        &mut self,
        message: String,
        at: TimeStamp<Utc>,
    ) -> Result<(), AbsenceError> {
        self.ensure_pending()?;
        self.record_decision(
            DecisionOutcome::Approved,
            message,
            SYSTEM_ACTOR.to_string(),
            at,
            true,
        );
        Ok(())
    }

    fn record_decision(
        &mut self,
        outcome: DecisionOutcome,
        comment: String,
        actor: String,
        at: TimeStamp<Utc>,
        automatic: bool,
    ) {
        let applied_at = self.next_sequence();
        self.status = match outcome {
            DecisionOutcome::Approved => AbsenceStatus::Approved,
            DecisionOutcome::Rejected => AbsenceStatus::Rejected,
        };
        self.decision = Some(Decision {
            applied_at,
            recorded_at: at,
            outcome,
            comment,
            actor,
            automatic,
        });
    }

    /// Tombstones a pending request. The record stays so racing commands fail cleanly.
    pub fn mark_deleted(&mut self, actor: String, at: TimeStamp<Utc>) -> Result<(), AbsenceError> {
        self.ensure_pending()?;
        self.deleted = Some(Tombstone {
            recorded_at: at,
            actor,
        });
        Ok(())
    }

    /// Merged audit trail ordered by logical time.
    pub fn history(&self) -> Vec<HistoryEntry> {
        let mut entries = vec![HistoryEntry {
            applied_at: 0,
            recorded_at: self.submitted_at.clone(),
            actor: self.requester.clone(),
            action: HistoryAction::Submitted {
                dates: self.original_dates.clone(),
            },
        }];

        entries.extend(self.additions.iter().map(|edit| HistoryEntry {
            applied_at: edit.applied_at,
            recorded_at: edit.recorded_at.clone(),
            actor: edit.actor.clone(),
            action: HistoryAction::Added {
                dates: edit.dates.clone(),
                reason: edit.reason.clone(),
            },
        }));
        entries.extend(self.cancellations.iter().map(|cancel| HistoryEntry {
            applied_at: cancel.applied_at,
            recorded_at: cancel.recorded_at.clone(),
            actor: cancel.actor.clone(),
            action: HistoryAction::Cancelled {
                dates: cancel.dates.clone(),
                reason: cancel.reason.clone(),
                full: cancel.is_full_cancellation,
            },
        }));
        if let Some(decision) = &self.decision {
            entries.push(HistoryEntry {
                applied_at: decision.applied_at,
                recorded_at: decision.recorded_at.clone(),
                actor: decision.actor.clone(),
                action: HistoryAction::Decided {
                    outcome: decision.outcome,
                    comment: decision.comment.clone(),
                    automatic: decision.automatic,
                },
            });
        }

        entries.sort_by_key(|entry| entry.applied_at);
        entries
    }

    pub fn view_history(&self) {
        for entry in self.history() {
            tracing::info!(
                request_id = %self.id,
                applied_at = entry.applied_at,
                recorded_at = %entry.recorded_at.to_datetime_utc(),
                actor = %entry.actor,
                action = ?entry.action,
                "absence history"
            );
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, AbsenceError> {
        Ok(minicbor::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, AbsenceError> {
        Ok(minicbor::decode(bytes)?)
    }

    /// Content digest of the stored record. Changes on every committed command.
    pub fn revision(&self) -> Result<String, AbsenceError> {
        let bytes = self.encode()?;
        Ok(sha256::digest(&bytes))
    }
}

/// Shared input check for commands that carry dates and a reason.
pub(crate) fn require_dates_and_reason(
    dates: &BTreeSet<CalendarDate>,
    reason: &str,
) -> Result<(), ValidationError> {
    if dates.is_empty() {
        return Err(ValidationError::EmptyDates);
    }
    if reason.trim().is_empty() {
        return Err(ValidationError::MissingReason);
    }
    Ok(())
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

impl<C> minicbor::Encode<C> for CalendarDate {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.i32(self.0.num_days_from_ce())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for CalendarDate {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let days = d.i32()?;

        NaiveDate::from_num_days_from_ce_opt(days)
            .map(CalendarDate)
            .ok_or(minicbor::decode::Error::message(
                "failed to convert day count to a calendar date",
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> CalendarDate {
        CalendarDate::from_ymd(2024, 5, d).unwrap()
    }

    fn permit(days: &[u32]) -> AbsenceRequest {
        AbsenceRequest::submit(
            "absence_test".into(),
            "user_a".into(),
            AbsenceKind::Permit,
            "medical_appointment".into(),
            days.iter().map(|d| day(*d)).collect(),
            String::new(),
            TimeStamp::new(),
        )
        .unwrap()
    }

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn calendar_date_parses_iso_format() {
        let parsed: CalendarDate = "2024-05-01".parse().unwrap();
        assert_eq!(parsed, day(1));
        assert_eq!(parsed.to_string(), "2024-05-01");
        assert!("01/05/2024".parse::<CalendarDate>().is_err());
    }

    #[test]
    fn submit_requires_dates() {
        let res = AbsenceRequest::submit(
            "absence_test".into(),
            "user_a".into(),
            AbsenceKind::Leave,
            "surgery".into(),
            BTreeSet::new(),
            String::new(),
            TimeStamp::new(),
        );
        assert_eq!(res.unwrap_err(), ValidationError::EmptyDates);
    }

    #[test]
    fn sequence_numbers_increase_across_event_kinds() {
        let mut request = permit(&[1, 2]);
        request
            .add_dates([day(3)].into(), "more".into(), "user_a".into(), TimeStamp::new())
            .unwrap();
        request
            .cancel_dates([day(1)].into(), "less".into(), "user_a".into(), TimeStamp::new())
            .unwrap();
        request
            .decide(DecisionOutcome::Approved, String::new(), "boss".into(), TimeStamp::new())
            .unwrap();

        assert_eq!(request.additions()[0].applied_at, 1);
        assert_eq!(request.cancellations()[0].applied_at, 2);
        assert_eq!(request.decision().unwrap().applied_at, 3);

        let actions: Vec<u64> = request.history().iter().map(|h| h.applied_at).collect();
        assert_eq!(actions, vec![0, 1, 2, 3]);
    }

    #[test]
    fn adding_an_active_date_is_rejected() {
        let mut request = permit(&[1, 2]);
        let err = request
            .add_dates([day(2), day(3)].into(), "dup".into(), "user_a".into(), TimeStamp::new())
            .unwrap_err();

        assert!(matches!(
            err,
            AbsenceError::InvalidStateTransition(TransitionError::AlreadyActive(ref d))
                if d == &vec![day(2)]
        ));
        assert!(request.additions().is_empty());
    }

    #[test]
    fn cancelling_an_inactive_date_is_rejected() {
        let mut request = permit(&[1, 2]);
        request
            .cancel_dates([day(1)].into(), "x".into(), "user_a".into(), TimeStamp::new())
            .unwrap();
        let err = request
            .cancel_dates([day(1)].into(), "again".into(), "user_a".into(), TimeStamp::new())
            .unwrap_err();

        assert!(matches!(
            err,
            AbsenceError::InvalidStateTransition(TransitionError::NotActive(_))
        ));
        assert_eq!(request.cancellations().len(), 1);
    }

    #[test]
    fn full_cancellation_moves_to_cancelled() {
        let mut request = permit(&[1, 2]);
        let partial = request
            .cancel_dates([day(1)].into(), "x".into(), "user_a".into(), TimeStamp::new())
            .unwrap();
        assert!(!partial);
        assert_eq!(request.status(), AbsenceStatus::Pending);

        let full = request
            .cancel_dates([day(2)].into(), "y".into(), "user_a".into(), TimeStamp::new())
            .unwrap();
        assert!(full);
        assert!(request.cancellations()[1].is_full_cancellation);
        assert_eq!(request.status(), AbsenceStatus::Cancelled);

        let err = request
            .add_dates([day(9)].into(), "z".into(), "user_a".into(), TimeStamp::new())
            .unwrap_err();
        assert!(matches!(
            err,
            AbsenceError::InvalidStateTransition(TransitionError::Terminal {
                status: AbsenceStatus::Cancelled
            })
        ));
    }

    #[test]
    fn rejection_needs_comment_and_is_terminal() {
        let mut request = permit(&[1]);
        let err = request
            .decide(DecisionOutcome::Rejected, "  ".into(), "boss".into(), TimeStamp::new())
            .unwrap_err();
        assert!(matches!(
            err,
            AbsenceError::Validation(ValidationError::MissingRejectionComment)
        ));

        request
            .decide(DecisionOutcome::Rejected, "no cover".into(), "boss".into(), TimeStamp::new())
            .unwrap();
        assert_eq!(request.status(), AbsenceStatus::Rejected);
        assert_eq!(request.decision_comment(), Some("no cover"));

        let err = request
            .decide(DecisionOutcome::Approved, String::new(), "boss".into(), TimeStamp::new())
            .unwrap_err();
        assert!(matches!(
            err,
            AbsenceError::InvalidStateTransition(TransitionError::NotPending { .. })
        ));
    }

    #[test]
    fn deletion_only_while_pending() {
        let mut request = permit(&[1]);
        request.auto_approve("ok".into(), TimeStamp::new()).unwrap();
        assert!(request.decision().unwrap().automatic);
        assert!(request.mark_deleted("user_a".into(), TimeStamp::new()).is_err());

        let mut request = permit(&[1]);
        request.mark_deleted("user_a".into(), TimeStamp::new()).unwrap();
        assert!(request.is_deleted());
        assert_eq!(request.ensure_open(), Err(TransitionError::Deleted));
    }

    #[test]
    fn cbor_roundtrip_keeps_revision() {
        let mut request = permit(&[1, 2]);
        request
            .add_dates([day(5)].into(), "more".into(), "user_a".into(), TimeStamp::new())
            .unwrap();

        let bytes = request.encode().unwrap();
        let decoded = AbsenceRequest::decode(&bytes).unwrap();

        assert_eq!(request, decoded);
        assert_eq!(request.revision().unwrap(), decoded.revision().unwrap());
    }
}
