//! The per-worker run driver: broadcast, validate, scatter, compute, gather.
//!
//! Every rank walks the same phases. The coordinator (rank 0) additionally
//! acquires `N` and the input arrays, and is the only rank that ever holds a
//! full array or reports the result.

use crate::group::GroupChannel;
use crate::io::{write_vectors, InputScanner};
use crate::kernel::cross_chunk;
use crate::plan::PartitionPlan;
use crate::{Error, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};

/// The rank that owns the full arrays and drives input and output.
pub const COORDINATOR_RANK: usize = 0;

/// What the coordinator announces to the group before anything else happens.
///
/// An explicit `Abort` is broadcast when the coordinator cannot acquire `N`,
/// so members waiting on the broadcast are released instead of stalling
/// forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Announce {
    Run(usize),
    Abort,
}

/// How a worker's participation in one run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Coordinator only: the fully reassembled result array, in vector order.
    Gathered(Vec<f32>),
    /// A member completed its chunk and emitted it to the gather.
    Participated,
    /// The run was abandoned uniformly before any chunk was transmitted.
    Aborted,
}

/// Drives one run on this worker, dispatching on rank. Members ignore
/// `input` and `output`; only the coordinator touches them.
pub fn run<G, R, W>(group: &G, input: R, output: &mut W) -> Result<RunOutcome>
where
    G: GroupChannel,
    R: BufRead,
    W: Write,
{
    if group.rank() == COORDINATOR_RANK {
        run_coordinator(group, input, output)
    } else {
        run_member(group)
    }
}

/// The member side of a run: the five-phase state machine without input or
/// output duties.
pub fn run_member<G: GroupChannel>(group: &G) -> Result<RunOutcome> {
    let announce: Announce = group.broadcast(None, COORDINATOR_RANK)?;
    let vectors = match announce {
        Announce::Run(vectors) => vectors,
        Announce::Abort => {
            debug!("Rank {} received abort announcement", group.rank());
            return Ok(RunOutcome::Aborted);
        }
    };

    let plan = match PartitionPlan::new(vectors, group.size()) {
        Ok(plan) => plan,
        // Every rank reaches this verdict from the same broadcast value; no
        // further collective call may be attempted.
        Err(_) => return Ok(RunOutcome::Aborted),
    };

    debug!(
        "Rank {} computing {} of {} scalars",
        group.rank(),
        plan.elements_per_worker,
        plan.total_elements
    );

    let sub_c = compute_chunk(group, &plan, None, None)?;
    group.gather_chunks(&sub_c, COORDINATOR_RANK)?;

    Ok(RunOutcome::Participated)
}

/// The coordinator side of a run: acquire `N` and the arrays, run the same
/// phases as every member, then report the gathered result to the sink.
pub fn run_coordinator<G, R, W>(group: &G, input: R, output: &mut W) -> Result<RunOutcome>
where
    G: GroupChannel,
    R: BufRead,
    W: Write,
{
    let mut scanner = InputScanner::new(input);

    let vectors = match scanner.read_vector_count() {
        Ok(vectors) => vectors,
        Err(err) => {
            // Members are already blocked awaiting the broadcast; release
            // them with an explicit abort before surfacing the input error.
            group.broadcast(Some(&Announce::Abort), COORDINATOR_RANK)?;
            return Err(err);
        }
    };

    group.broadcast(Some(&Announce::Run(vectors)), COORDINATOR_RANK)?;

    let plan = match PartitionPlan::new(vectors, group.size()) {
        Ok(plan) => plan,
        Err(err) => {
            // Reported once, by the coordinator, to the output sink.
            writeln!(output, "{err}").map_err(|e| Error::Output(e.to_string()))?;
            return Ok(RunOutcome::Aborted);
        }
    };

    let a = scanner.read_scalars(plan.total_elements)?;
    let b = scanner.read_scalars(plan.total_elements)?;

    let sub_c = compute_chunk(group, &plan, Some(a), Some(b))?;
    let full = group
        .gather_chunks(&sub_c, COORDINATOR_RANK)?
        .ok_or_else(|| Error::Communication("Gather returned no array at the root".into()))?;

    write_vectors(output, &full)?;
    Ok(RunOutcome::Gathered(full))
}

/// The phases shared by every rank: receive one chunk of A and one of B from
/// the scatter, then run the kernel over them. The coordinator passes the
/// full arrays; members pass `None`.
fn compute_chunk<G: GroupChannel>(
    group: &G,
    plan: &PartitionPlan,
    a: Option<Vec<f32>>,
    b: Option<Vec<f32>>,
) -> Result<Vec<f32>> {
    let sub_a = group.scatter_chunks(a.as_deref(), plan.elements_per_worker, COORDINATOR_RANK)?;
    drop(a);
    let sub_b = group.scatter_chunks(b.as_deref(), plan.elements_per_worker, COORDINATOR_RANK)?;
    drop(b);

    let mut sub_c = vec![0.0f32; plan.elements_per_worker];
    cross_chunk(&sub_a, &sub_b, &mut sub_c);
    Ok(sub_c)
}
