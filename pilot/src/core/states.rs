//! Controller states, events and the transition table.
//!
//! The table is the single source of truth for legal moves. A lookup for an
//! unlisted `(state, event)` pair is a wiring defect in the engine, so it is
//! reported as a typed [`TransitionError`] rather than folded into an event.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Idle,
    SpecCreation,
    Executing,
    Verifying,
    Blocked,
    Recovering,
    NeedsInput,
    ContextHandoff,
    Completed,
}

impl State {
    pub const ALL: [State; 9] = [
        State::Idle,
        State::SpecCreation,
        State::Executing,
        State::Verifying,
        State::Blocked,
        State::Recovering,
        State::NeedsInput,
        State::ContextHandoff,
        State::Completed,
    ];

    /// No event may leave a terminal state.
    pub fn is_terminal(self) -> bool {
        self == State::Completed
    }

    /// States where the run loop stops and hands control back to the caller.
    ///
    /// `NeedsInput` is a resting state: the run is blocked until resumed with
    /// operator guidance.
    pub fn stops_run(self) -> bool {
        matches!(self, State::Completed | State::NeedsInput)
    }

    /// Side effects of these states are not safe to replay, so a resumed run
    /// re-enters `Executing` instead.
    pub fn is_transient(self) -> bool {
        matches!(self, State::Recovering | State::ContextHandoff)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Idle => "Idle",
            State::SpecCreation => "SpecCreation",
            State::Executing => "Executing",
            State::Verifying => "Verifying",
            State::Blocked => "Blocked",
            State::Recovering => "Recovering",
            State::NeedsInput => "NeedsInput",
            State::ContextHandoff => "ContextHandoff",
            State::Completed => "Completed",
        };
        f.write_str(name)
    }
}

/// Reason for a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    SpecLoaded,
    Approved,
    StepDone,
    AllPassed,
    SomeFailed,
    Error,
    ToolFound,
    Recovered,
    MaxRetriesExceeded,
    InputReceived,
    ContextHigh,
    HandoffComplete,
}

impl Event {
    pub const ALL: [Event; 12] = [
        Event::SpecLoaded,
        Event::Approved,
        Event::StepDone,
        Event::AllPassed,
        Event::SomeFailed,
        Event::Error,
        Event::ToolFound,
        Event::Recovered,
        Event::MaxRetriesExceeded,
        Event::InputReceived,
        Event::ContextHigh,
        Event::HandoffComplete,
    ];
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Event::SpecLoaded => "SpecLoaded",
            Event::Approved => "Approved",
            Event::StepDone => "StepDone",
            Event::AllPassed => "AllPassed",
            Event::SomeFailed => "SomeFailed",
            Event::Error => "Error",
            Event::ToolFound => "ToolFound",
            Event::Recovered => "Recovered",
            Event::MaxRetriesExceeded => "MaxRetriesExceeded",
            Event::InputReceived => "InputReceived",
            Event::ContextHigh => "ContextHigh",
            Event::HandoffComplete => "HandoffComplete",
        };
        f.write_str(name)
    }
}

/// Illegal move requested by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("invalid transition: {state} + {event}")]
    Invalid { state: State, event: Event },
}

/// Every legal `(from, event) -> to` edge.
pub const TRANSITIONS: [(State, Event, State); 13] = [
    (State::Idle, Event::SpecLoaded, State::SpecCreation),
    (State::SpecCreation, Event::Approved, State::Executing),
    (State::Executing, Event::StepDone, State::Verifying),
    (State::Executing, Event::Error, State::Blocked),
    (State::Executing, Event::ContextHigh, State::ContextHandoff),
    (State::Verifying, Event::AllPassed, State::Completed),
    (State::Verifying, Event::SomeFailed, State::Blocked),
    (State::Blocked, Event::ToolFound, State::Recovering),
    (State::Blocked, Event::MaxRetriesExceeded, State::NeedsInput),
    (State::Recovering, Event::Recovered, State::Executing),
    (State::Recovering, Event::Error, State::Blocked),
    (State::NeedsInput, Event::InputReceived, State::Executing),
    (State::ContextHandoff, Event::HandoffComplete, State::Executing),
];

/// Return the next state for `(state, event)`.
pub fn transition(state: State, event: Event) -> Result<State, TransitionError> {
    TRANSITIONS
        .iter()
        .find(|(from, on, _)| *from == state && *on == event)
        .map(|(_, _, to)| *to)
        .ok_or(TransitionError::Invalid { state, event })
}

/// A transition the engine actually took.
///
/// `event` is `None` for the two operator escape hatches (plan rejected, run
/// aborted) that move straight to `Completed` without a table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: State,
    pub event: Option<Event>,
    pub to: State,
}
