//! Search results and their text rendering.

use common::{HeapAddress, ObjectHandle, RootKind};
use serde::Serialize;
use std::fmt;
use std::io::{self, Write};

/// One object along a reference chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathStep {
    pub address: HeapAddress,
    pub type_name: String,
}

impl From<ObjectHandle> for PathStep {
    fn from(object: ObjectHandle) -> Self {
        Self {
            address: object.address,
            type_name: object.type_name,
        }
    }
}

/// A concrete chain of custody from a GC root down to the target.
///
/// `steps` runs root-first and ends with the target. Paths produced by the
/// finder hold at least two entries; the accessors tolerate fewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchPath {
    pub root_kind: RootKind,
    pub steps: Vec<PathStep>,
}

impl SearchPath {
    pub fn root(&self) -> Option<&PathStep> {
        self.steps.first()
    }

    pub fn target(&self) -> Option<&PathStep> {
        self.steps.last()
    }

    /// Declared type names, root first, target last.
    pub fn type_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.steps.iter().map(|s| s.type_name.as_str())
    }

    /// Number of references followed from the root to the target.
    pub fn depth(&self) -> usize {
        self.steps.len().saturating_sub(1)
    }
}

/// Target type name first, then the chain from the root down to the target's
/// immediate referrer, one per line.
impl fmt::Display for SearchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some((target, chain)) = self.steps.split_last() else {
            return Ok(());
        };
        f.write_str(&target.type_name)?;
        for step in chain {
            write!(f, "\n{}", step.type_name)?;
        }
        Ok(())
    }
}

/// Writes each path followed by one blank line. Returns the number written.
pub fn render_paths<W, I>(out: &mut W, paths: I) -> io::Result<usize>
where
    W: Write,
    I: IntoIterator<Item = SearchPath>,
{
    let mut count = 0;
    for path in paths {
        writeln!(out, "{}\n", path)?;
        count += 1;
    }
    Ok(count)
}
