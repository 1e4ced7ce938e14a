//! Report printing and the interactive address loop.
//!
//! Everything writes to a caller-supplied `Write` so the command loop can be
//! driven from tests with in-memory buffers.

use anatomist::CensusReport;
use common::{HeapAddress, HeapProvider};
use oracle::{render_paths, ReferencePathFinder};
use std::io::{self, BufRead, Write};

pub const PROMPT: &str = "Enter memory address to explore GC roots or enter to end";

/// One line per task: type, decoded state, decimal address.
pub fn print_tasks<W: Write>(out: &mut W, report: &CensusReport, json: bool) -> anyhow::Result<()> {
    for task in &report.tasks {
        if json {
            writeln!(out, "{}", serde_json::to_string(task)?)?;
        } else {
            writeln!(
                out,
                "Found {}, state {}, memory address {}",
                task.object.type_name, task.state, task.object.address
            )?;
        }
    }
    Ok(())
}

pub fn print_summary<W: Write>(out: &mut W, report: &CensusReport) -> io::Result<()> {
    writeln!(out, "+------------------------------------------+")?;
    writeln!(out, "| HEAPWATCH TASKS                          |")?;
    writeln!(out, "+------------------------------------------+")?;
    writeln!(out, "| Tasks          : {:>23} |", report.tasks.len())?;
    writeln!(out, "| Skipped        : {:>23} |", report.skipped)?;
    writeln!(out, "+------------------------------------------+")?;
    for (state, count) in report.state_counts() {
        if count > 0 {
            writeln!(out, "| {:<28} : {:>9} |", state.as_str(), count)?;
        }
    }
    writeln!(out, "+------------------------------------------+")?;
    Ok(())
}

/// Prints every root path to `target`. Returns the number of paths printed.
pub fn print_roots<H, W>(out: &mut W, heap: &H, target: HeapAddress, parallel: bool) -> io::Result<usize>
where
    H: HeapProvider + Sync + ?Sized,
    W: Write,
{
    let finder = ReferencePathFinder::new(heap);
    let count = if parallel {
        render_paths(out, finder.par_find_paths(target))?
    } else {
        render_paths(out, finder.find_paths(target))?
    };
    if count == 0 {
        writeln!(out, "No root path found for {}\n", target)?;
    }
    Ok(count)
}

/// Interactive loop: each line naming a known task address prints its root
/// paths; anything else (blank line, junk, unknown address, EOF) ends the session.
///
/// Returns the number of addresses explored.
pub fn explore<H, R, W>(
    heap: &H,
    report: &CensusReport,
    input: &mut R,
    out: &mut W,
    parallel: bool,
) -> io::Result<usize>
where
    H: HeapProvider + Sync + ?Sized,
    R: BufRead,
    W: Write,
{
    let known = report.addresses();
    writeln!(out, "\n{}\n", PROMPT)?;
    out.flush()?;

    let mut explored = 0;
    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Ok(explored);
        }
        let address = match line.parse::<HeapAddress>() {
            Ok(a) if known.contains(&a) => a,
            Ok(a) => {
                tracing::debug!(address = %a, "not a known task address; ending session");
                return Ok(explored);
            }
            Err(_) => return Ok(explored),
        };

        writeln!(out)?;
        print_roots(out, heap, address, parallel)?;
        out.flush()?;
        explored += 1;
    }
}
