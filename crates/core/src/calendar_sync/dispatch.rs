//! Change classification keyed by status class and id shape.
//!
//! Every (status, shape) pair maps to exactly one [`ChangeKind`]. Supporting
//! a new id format means adding a shape and its rows here; the synchronizer
//! only matches on the resulting kind.

use calsync_domain::{EventStatus, IdShape};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    Active,
    Cancelled,
}

impl From<EventStatus> for StatusClass {
    fn from(status: EventStatus) -> Self {
        if status.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Active
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeClass {
    Base,
    Occurrence,
}

impl From<&IdShape> for ShapeClass {
    fn from(shape: &IdShape) -> Self {
        match shape {
            IdShape::Base => Self::Base,
            IdShape::Occurrence { .. } => Self::Occurrence,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Remove the row and every materialized occurrence of the series.
    CancelSeries,
    /// Remove only the exact occurrence row.
    CancelOccurrence,
    /// Create or update a row keyed by its exact id.
    UpsertSingle,
    /// Create or update an occurrence row, rewriting a same-day base row in
    /// place when one exists.
    UpsertOccurrence,
}

impl ChangeKind {
    pub fn is_cancellation(self) -> bool {
        matches!(self, Self::CancelSeries | Self::CancelOccurrence)
    }
}

const DISPATCH_TABLE: [((StatusClass, ShapeClass), ChangeKind); 4] = [
    ((StatusClass::Cancelled, ShapeClass::Base), ChangeKind::CancelSeries),
    ((StatusClass::Cancelled, ShapeClass::Occurrence), ChangeKind::CancelOccurrence),
    ((StatusClass::Active, ShapeClass::Base), ChangeKind::UpsertSingle),
    ((StatusClass::Active, ShapeClass::Occurrence), ChangeKind::UpsertOccurrence),
];

/// Look up the change kind for a status and a parsed id shape.
pub fn change_kind(status: EventStatus, shape: &IdShape) -> ChangeKind {
    let key = (StatusClass::from(status), ShapeClass::from(shape));
    DISPATCH_TABLE
        .iter()
        .find_map(|(k, kind)| (*k == key).then_some(*kind))
        .unwrap_or(ChangeKind::UpsertSingle)
}
