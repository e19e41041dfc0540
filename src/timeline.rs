//! Date-state reconciliation by replaying the addition/cancellation log.
//!
//! Every date carries a list of touches: `Origin` when it was part of the submitted
//! request, `Added` for every addition event naming it, `Cancelled` for every
//! cancellation naming it. A date is active iff its latest touch is not a
//! cancellation. Nothing derived here is ever stored.
use super::absence::{AbsenceRequest, CalendarDate, DateCancellation, DateEdit, TimeStamp};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchKind {
    Origin,
    Added,
    Cancelled,
}

/// How a consumer should label a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateDisplay {
    Original,
    Added,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateTags {
    pub is_original: bool,
    pub ever_added: bool,
    pub ever_cancelled: bool,
    pub currently_active: bool,
}

impl DateTags {
    pub fn display(&self) -> DateDisplay {
        if !self.currently_active {
            DateDisplay::Cancelled
        } else if self.ever_added {
            DateDisplay::Added
        } else {
            DateDisplay::Original
        }
    }

    fn touch(&mut self, kind: TouchKind) {
        match kind {
            TouchKind::Origin => {
                self.is_original = true;
                self.currently_active = true;
            }
            TouchKind::Added => {
                self.ever_added = true;
                self.currently_active = true;
            }
            TouchKind::Cancelled => {
                self.ever_cancelled = true;
                self.currently_active = false;
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub active_dates: Vec<CalendarDate>,
    pub cancelled_dates: Vec<CalendarDate>,
    pub added_dates: Vec<CalendarDate>,
    pub tags: BTreeMap<CalendarDate, DateTags>,
}

impl Reconciliation {
    pub fn is_active(&self, date: &CalendarDate) -> bool {
        self.tags
            .get(date)
            .is_some_and(|tags| tags.currently_active)
    }

    pub fn display(&self, date: &CalendarDate) -> Option<DateDisplay> {
        self.tags.get(date).map(DateTags::display)
    }

    /// Active dates a caller may still cancel. Past dates are only offered when
    /// `allow_past` is set (administrator override).
    pub fn days_available_to_cancel(
        &self,
        as_of: CalendarDate,
        allow_past: bool,
    ) -> Vec<CalendarDate> {
        self.active_dates
            .iter()
            .filter(|date| allow_past || **date >= as_of)
            .copied()
            .collect()
    }
}

/// Borrowed view over the three inputs of the replay.
#[derive(Debug, Clone, Copy)]
pub struct DateTimeline<'a> {
    original: &'a BTreeSet<CalendarDate>,
    additions: &'a [DateEdit],
    cancellations: &'a [DateCancellation],
}

struct Touch<'a> {
    applied_at: u64,
    rank: u8, // additions before cancellations on equal applied_at
    order: usize,
    kind: TouchKind,
    dates: &'a BTreeSet<CalendarDate>,
}

impl<'a> DateTimeline<'a> {
    pub fn new(
        original: &'a BTreeSet<CalendarDate>,
        additions: &'a [DateEdit],
        cancellations: &'a [DateCancellation],
    ) -> Self {
        Self {
            original,
            additions,
            cancellations,
        }
    }

    pub fn from_request(request: &'a AbsenceRequest) -> Self {
        Self::new(
            request.original_dates(),
            request.additions(),
            request.cancellations(),
        )
    }

    /// Current state, every stored event applied.
    pub fn reconcile(&self) -> Reconciliation {
        self.replay(|_| true)
    }

    /// State as it stood at `as_of`; events recorded later are ignored.
    pub fn reconcile_at(&self, as_of: &TimeStamp<Utc>) -> Reconciliation {
        self.replay(|recorded_at| recorded_at <= as_of)
    }

    fn replay<F>(&self, visible: F) -> Reconciliation
    where
        F: Fn(&TimeStamp<Utc>) -> bool,
    {
        let mut touches = vec![Touch {
            applied_at: 0,
            rank: 0,
            order: 0,
            kind: TouchKind::Origin,
            dates: self.original,
        }];

        touches.extend(
            self.additions
                .iter()
                .enumerate()
                .filter(|(_, edit)| visible(&edit.recorded_at))
                .map(|(order, edit)| Touch {
                    applied_at: edit.applied_at,
                    rank: 1,
                    order,
                    kind: TouchKind::Added,
                    dates: &edit.dates,
                }),
        );
        touches.extend(
            self.cancellations
                .iter()
                .enumerate()
                .filter(|(_, cancel)| visible(&cancel.recorded_at))
                .map(|(order, cancel)| Touch {
                    applied_at: cancel.applied_at,
                    rank: 2,
                    order,
                    kind: TouchKind::Cancelled,
                    dates: &cancel.dates,
                }),
        );
        touches.sort_by_key(|touch| (touch.applied_at, touch.rank, touch.order));

        let mut tags: BTreeMap<CalendarDate, DateTags> = BTreeMap::new();
        for touch in &touches {
            for date in touch.dates {
                tags.entry(*date).or_default().touch(touch.kind);
            }
        }

        let mut result = Reconciliation::default();
        for (date, tag) in &tags {
            if tag.currently_active {
                result.active_dates.push(*date);
                if tag.ever_added {
                    result.added_dates.push(*date);
                }
            } else {
                result.cancelled_dates.push(*date);
            }
        }
        result.tags = tags;
        result
    }
}
