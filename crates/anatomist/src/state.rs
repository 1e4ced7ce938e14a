//! Packed task state word -> lifecycle state.
//!
//! Several bits can be set at once while a task is mid-transition (a faulted
//! task may also carry the completion bit). The bits are therefore evaluated
//! as a priority-ordered list of predicates, never as independent flags:
//!
//! faulted > canceled > ran-to-completion > waiting-for-children > running
//! > waiting-to-run > waiting-for-activation > created

use bitflags::bitflags;
use serde::Serialize;
use std::fmt;

bitflags! {
    /// Raw `m_stateFlags` word of a task object.
    ///
    /// Only the named bits carry lifecycle meaning; all other bits are retained
    /// untouched so the raw value can still be reported.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StateFlags: u32 {
        const WAITING_TO_RUN = 0x0001_0000;
        const RUNNING = 0x0002_0000;
        const FAULTED = 0x0020_0000;
        const CANCELED = 0x0040_0000;
        const WAITING_FOR_CHILDREN = 0x0080_0000;
        const RAN_TO_COMPLETION = 0x0100_0000;
        const WAITING_FOR_ACTIVATION = 0x0200_0000;

        const _ = !0;
    }
}

/// Logical lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum LifecycleState {
    Created,
    WaitingForActivation,
    WaitingToRun,
    Running,
    WaitingForChildrenToComplete,
    RanToCompletion,
    Canceled,
    Faulted,
}

impl LifecycleState {
    /// All states, in declaration order.
    pub const ALL: [LifecycleState; 8] = [
        LifecycleState::Created,
        LifecycleState::WaitingForActivation,
        LifecycleState::WaitingToRun,
        LifecycleState::Running,
        LifecycleState::WaitingForChildrenToComplete,
        LifecycleState::RanToCompletion,
        LifecycleState::Canceled,
        LifecycleState::Faulted,
    ];

    /// `true` for the three terminal states.
    pub fn is_completed(self) -> bool {
        matches!(
            self,
            LifecycleState::RanToCompletion | LifecycleState::Canceled | LifecycleState::Faulted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Created => "Created",
            LifecycleState::WaitingForActivation => "WaitingForActivation",
            LifecycleState::WaitingToRun => "WaitingToRun",
            LifecycleState::Running => "Running",
            LifecycleState::WaitingForChildrenToComplete => "WaitingForChildrenToComplete",
            LifecycleState::RanToCompletion => "RanToCompletion",
            LifecycleState::Canceled => "Canceled",
            LifecycleState::Faulted => "Faulted",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluation order of the state bits. Order is load-bearing.
const PRIORITY: [(StateFlags, LifecycleState); 7] = [
    (StateFlags::FAULTED, LifecycleState::Faulted),
    (StateFlags::CANCELED, LifecycleState::Canceled),
    (StateFlags::RAN_TO_COMPLETION, LifecycleState::RanToCompletion),
    (
        StateFlags::WAITING_FOR_CHILDREN,
        LifecycleState::WaitingForChildrenToComplete,
    ),
    (StateFlags::RUNNING, LifecycleState::Running),
    (StateFlags::WAITING_TO_RUN, LifecycleState::WaitingToRun),
    (
        StateFlags::WAITING_FOR_ACTIVATION,
        LifecycleState::WaitingForActivation,
    ),
];

/// Decodes a packed state word. Total: every input maps to exactly one state.
///
/// # Examples
/// ```
/// # use anatomist::{decode, LifecycleState, StateFlags};
/// let flags = StateFlags::FAULTED | StateFlags::RAN_TO_COMPLETION;
/// assert_eq!(decode(flags), LifecycleState::Faulted);
/// assert_eq!(decode(StateFlags::empty()), LifecycleState::Created);
/// ```
pub fn decode(flags: StateFlags) -> LifecycleState {
    PRIORITY
        .iter()
        .find(|(mask, _)| flags.intersects(*mask))
        .map(|&(_, state)| state)
        .unwrap_or(LifecycleState::Created)
}

/// Decodes a raw 32-bit state word.
pub fn decode_raw(raw: u32) -> LifecycleState {
    decode(StateFlags::from_bits_retain(raw))
}
