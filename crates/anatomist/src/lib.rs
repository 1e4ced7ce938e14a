//! # The Anatomist: Task State Dissection
//!
//! **Role**: Reads the packed state word of every task-like object in a heap
//! image and names the lifecycle state it encodes.
//!
//! **Core Types**:
//! - `StateFlags`: the raw 32-bit packed state word.
//! - `LifecycleState`: the 8 task lifecycle states.
//! - `TaskRecord` / `CensusReport`: results of one enumeration pass.
//!
//! **Design**:
//! - Decoding is a priority-ordered table walk, first match wins (see [`state`]).
//! - The census absorbs per-object anomalies; one malformed object never aborts a scan.

pub mod census;
pub mod state;

pub use census::{CensusConfig, CensusReport, TaskRecord};
pub use state::{decode, decode_raw, LifecycleState, StateFlags};
