//! Error taxonomy for absence commands
use crate::absence::{AbsenceKind, AbsenceStatus, CalendarDate};

/// Malformed input, rejected before any store access.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Date set is empty")]
    EmptyDates,
    #[error("A reason is required")]
    MissingReason,
    #[error("Requester is not set")]
    MissingRequester,
    #[error("Absence kind is not set")]
    MissingKind,
    #[error("Reason code is not set")]
    MissingReasonCode,
    #[error("Reason code '{code}' is not configured for {kind:?}")]
    UnknownReasonCode { kind: AbsenceKind, code: String },
    #[error("Requester '{0}' is unknown")]
    UnknownRequester(String),
    #[error("Rejecting a request requires a comment")]
    MissingRejectionComment,
}

/// A command that is well formed but illegal for the current state of the request.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Request is {status:?} and no longer accepts changes")]
    Terminal { status: AbsenceStatus },
    #[error("Request has been deleted")]
    Deleted,
    #[error("Request is {status:?}, only pending requests accept this command")]
    NotPending { status: AbsenceStatus },
    #[error("Dates already active: {0:?}")]
    AlreadyActive(Vec<CalendarDate>),
    #[error("Dates not currently active: {0:?}")]
    NotActive(Vec<CalendarDate>),
}

#[derive(thiserror::Error, Debug)]
pub enum AbsenceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(#[from] TransitionError),
    #[error("Request {id} kept changing underneath us, gave up after {attempts} attempts")]
    ConcurrencyConflict { id: String, attempts: u32 },
    #[error("Absence request {0} not found")]
    NotFound(String),
    #[error("'{actor}' is not allowed to perform this command")]
    Unauthorized { actor: String },
    #[error("Failed to generate identifier: {0}")]
    Identifier(String),
    #[error("Storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("Failed to encode absence request: {0}")]
    Encode(String),
    #[error("Failed to decode absence request: {0}")]
    Decode(#[from] minicbor::decode::Error),
}

impl AbsenceError {
    /// Only lost optimistic races are worth re-issuing unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AbsenceError::ConcurrencyConflict { .. })
    }
}

impl From<minicbor::encode::Error<std::convert::Infallible>> for AbsenceError {
    fn from(value: minicbor::encode::Error<std::convert::Infallible>) -> Self {
        AbsenceError::Encode(value.to_string())
    }
}
