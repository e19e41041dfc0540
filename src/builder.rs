//! Draft of a new absence request, filled in step by step before submission
use super::absence::{AbsenceKind, AbsenceRequest, CalendarDate, TimeStamp};
use super::error::ValidationError;
use chrono::Utc;
use std::collections::BTreeSet;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RequestDraft {
    requester: Option<String>,
    kind: Option<AbsenceKind>,
    reason_code: Option<String>,
    dates: BTreeSet<CalendarDate>,
    comment: String,
}

impl RequestDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_requester(mut self, requester: &str) -> Self {
        self.requester = Some(requester.to_string());
        self
    }
    pub fn set_kind(mut self, kind: AbsenceKind) -> Self {
        self.kind = Some(kind);
        self
    }
    pub fn set_reason_code(mut self, code: &str) -> Self {
        self.reason_code = Some(code.to_string());
        self
    }
    pub fn add_date(mut self, date: CalendarDate) -> Self {
        self.dates.insert(date);
        self
    }
    pub fn add_dates<I: IntoIterator<Item = CalendarDate>>(mut self, dates: I) -> Self {
        self.dates.extend(dates);
        self
    }
    pub fn set_comment(mut self, comment: &str) -> Self {
        self.comment = comment.to_string();
        self
    }

    pub fn requester(&self) -> Option<&str> {
        self.requester.as_deref()
    }
    pub fn kind(&self) -> Option<AbsenceKind> {
        self.kind
    }
    pub fn dates(&self) -> &BTreeSet<CalendarDate> {
        &self.dates
    }

    /// Checks required fields. `allowed_codes` is the configured list for the
    /// draft's kind; an empty list accepts any code.
    pub fn validate(&self, allowed_codes: &[String]) -> Result<(), ValidationError> {
        let requester = self.requester.as_deref().unwrap_or_default();
        if requester.trim().is_empty() {
            return Err(ValidationError::MissingRequester);
        }
        let Some(kind) = self.kind else {
            return Err(ValidationError::MissingKind);
        };
        let code = self.reason_code.as_deref().unwrap_or_default();
        if code.trim().is_empty() {
            return Err(ValidationError::MissingReasonCode);
        }
        if !allowed_codes.is_empty() && !allowed_codes.iter().any(|c| c == code) {
            return Err(ValidationError::UnknownReasonCode {
                kind,
                code: code.to_string(),
            });
        }
        if self.dates.is_empty() {
            return Err(ValidationError::EmptyDates);
        }
        Ok(())
    }

    /// Validates and turns the draft into a pending [`AbsenceRequest`].
    pub fn build(
        self,
        id: String,
        allowed_codes: &[String],
        submitted_at: TimeStamp<Utc>,
    ) -> Result<AbsenceRequest, ValidationError> {
        self.validate(allowed_codes)?;

        let Self {
            requester,
            kind,
            reason_code,
            dates,
            comment,
        } = self;

        AbsenceRequest::submit(
            id,
            requester.unwrap_or_default(),
            kind.ok_or(ValidationError::MissingKind)?,
            reason_code.unwrap_or_default(),
            dates,
            comment,
            submitted_at,
        )
    }
}
