//! Dispatch table mapping (event, selection) to a file operation.

use crate::controller::materializer::WriteReason;

/// What happened to a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
    /// Object present in a full listing
    Resume,
}

impl EventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Added => "added",
            EventKind::Modified => "modified",
            EventKind::Deleted => "deleted",
            EventKind::Resume => "resume",
        }
    }

    /// Reason recorded for a write triggered by this event
    #[must_use]
    pub fn write_reason(self) -> WriteReason {
        match self {
            EventKind::Added => WriteReason::Create,
            EventKind::Resume => WriteReason::Resume,
            EventKind::Modified | EventKind::Deleted => WriteReason::Update,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Write,
    Delete,
    Noop,
}

/// Decide the file operation for an event.
///
/// `selected` is the selection result on the object carried by the event,
/// `materialized` whether files currently exist for its identity. Leaving the
/// selection is handled exactly like a deletion.
#[must_use]
pub fn decide(event: EventKind, selected: bool, materialized: bool) -> Action {
    match (event, selected, materialized) {
        (EventKind::Added | EventKind::Modified | EventKind::Resume, true, _) => Action::Write,
        (EventKind::Added | EventKind::Modified | EventKind::Resume, false, true) => Action::Delete,
        (EventKind::Deleted, true, _) | (EventKind::Deleted, _, true) => Action::Delete,
        _ => Action::Noop,
    }
}
