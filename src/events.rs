//! Structured event log with a bounded ring buffer. The HUD renders these;
//! internal subsystems use them instead of failing outward.

use std::collections::VecDeque;

/// Classification of a logged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    WaterDrawn,
    EdgeRunoff,
    BiomeChange,
    StructureBuilt,
    StructureRemoved,
    ErosionEvent,
    WellspringDry,
    RainStarted,
    RainStopped,
    InvariantClamp,
    Generation,
}

/// One entry of the event log.
#[derive(Debug, Clone)]
pub struct Event {
    pub tick: u64,
    pub kind: EventKind,
    pub cell: Option<(u32, u32)>,
    pub amount: Option<i64>,
    pub message: String,
}

/// Bounded ring buffer of events. Oldest entries are dropped when full.
#[derive(Debug)]
pub struct EventLog {
    entries: VecDeque<Event>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, event: Event) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(event);
    }

    /// Convenience constructor for the common case.
    pub fn log(
        &mut self,
        tick: u64,
        kind: EventKind,
        cell: Option<(u32, u32)>,
        amount: Option<i64>,
        message: impl Into<String>,
    ) {
        self.push(Event {
            tick,
            kind,
            cell,
            amount,
            message: message.into(),
        });
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Event> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent event, if any.
    pub fn latest(&self) -> Option<&Event> {
        self.entries.back()
    }

    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }
}
