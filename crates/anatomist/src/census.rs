//! Task census: one enumeration pass over every object in the image.
//!
//! Objects whose declared type starts with the task type prefix have their
//! packed state word decoded. Objects lacking a readable `Int32` state field
//! are skipped and counted, never fatal.

use crate::state::{decode, LifecycleState, StateFlags};
use common::{FieldValue, HeapAddress, HeapError, HeapProvider, ObjectHandle};
use serde::Serialize;
use std::collections::HashSet;

/// Default declared-type prefix of task-like objects.
pub const DEFAULT_TASK_PREFIX: &str = "System.Threading.Tasks.Task";

/// Default name of the packed state field.
pub const DEFAULT_FLAGS_FIELD: &str = "m_stateFlags";

/// Which objects count as tasks, and where their state lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CensusConfig {
    /// Plain prefix match against the declared type name, so generic
    /// instantiations (``Task`1[...]``) match as well.
    pub type_prefix: String,
    pub flags_field: String,
}

impl Default for CensusConfig {
    fn default() -> Self {
        Self {
            type_prefix: DEFAULT_TASK_PREFIX.to_string(),
            flags_field: DEFAULT_FLAGS_FIELD.to_string(),
        }
    }
}

impl CensusConfig {
    pub fn matches(&self, object: &ObjectHandle) -> bool {
        object.type_name.starts_with(&self.type_prefix)
    }
}

/// One decoded task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    pub object: ObjectHandle,
    #[serde(serialize_with = "serialize_flags")]
    pub flags: StateFlags,
    pub state: LifecycleState,
}

fn serialize_flags<S: serde::Serializer>(flags: &StateFlags, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u32(flags.bits())
}

/// Results of a full census pass.
#[derive(Debug, Default)]
pub struct CensusReport {
    /// Decoded tasks, in provider enumeration order.
    pub tasks: Vec<TaskRecord>,
    /// Task-like objects skipped because their state field was unavailable.
    pub skipped: usize,
}

impl CensusReport {
    /// Addresses of every decoded task.
    pub fn addresses(&self) -> HashSet<HeapAddress> {
        self.tasks.iter().map(|t| t.object.address).collect()
    }

    /// Task count per state, in [`LifecycleState::ALL`] order (zeros included).
    pub fn state_counts(&self) -> [(LifecycleState, usize); 8] {
        LifecycleState::ALL.map(|state| {
            let n = self.tasks.iter().filter(|t| t.state == state).count();
            (state, n)
        })
    }
}

/// Reads the packed state word of `object`.
///
/// # Errors
/// `HeapError::FieldUnavailable` if the field is missing, unreadable, or not an `Int32`.
pub fn read_state_flags<H: HeapProvider + ?Sized>(
    heap: &H,
    object: &ObjectHandle,
    field: &str,
) -> Result<StateFlags, HeapError> {
    match heap.read_field(object, field) {
        Some(FieldValue::Int32(raw)) => Ok(StateFlags::from_bits_retain(raw as u32)),
        _ => Err(HeapError::FieldUnavailable {
            object: object.address,
            field: field.to_string(),
        }),
    }
}

/// Dissects a single object. `Ok(None)` if it is not task-like.
pub fn dissect<H: HeapProvider + ?Sized>(
    heap: &H,
    object: ObjectHandle,
    config: &CensusConfig,
) -> Result<Option<TaskRecord>, HeapError> {
    if !config.matches(&object) {
        return Ok(None);
    }
    let flags = read_state_flags(heap, &object, &config.flags_field)?;
    Ok(Some(TaskRecord {
        object,
        state: decode(flags),
        flags,
    }))
}

/// Runs the census over every object the provider enumerates.
pub fn scan<H: HeapProvider + ?Sized>(heap: &H, config: &CensusConfig) -> CensusReport {
    let mut report = CensusReport::default();

    for object in heap.objects() {
        match dissect(heap, object, config) {
            Ok(Some(task)) => report.tasks.push(task),
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(error = %e, "skipping task-like object");
                report.skipped += 1;
            }
        }
    }

    tracing::info!(
        tasks = report.tasks.len(),
        skipped = report.skipped,
        prefix = %config.type_prefix,
        "task census complete"
    );
    report
}
