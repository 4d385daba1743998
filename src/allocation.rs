//! Weighted-fair division of concurrency tokens across priority tiers.
//!
//! The allocator is a pure function from (jobs grouped by priority, token
//! budget) to a per-job token assignment. It runs once per balancer round on
//! an immutable snapshot, which keeps it unit-testable without any of the
//! scheduler's concurrency.
//!
//! Algorithm:
//! 1. Normalize the raw priorities present this round to a dense `1..=m`
//!    ranking that preserves relative order.
//! 2. Sum the weight-units demanded if every job received `rank - level`
//!    tokens. If the budget cannot cover that, exclude the lowest active
//!    rank (raise `level`) and retry: a tier that cannot be served its
//!    proportional minimum is fully starved for the round rather than given
//!    a token-starved trickle.
//! 3. Otherwise assign `(rank - level) * coefficient` to every job and
//!    recurse at the same level on the integer remainder, accumulating into
//!    the same assignment map.
//!
//! The recursion assigns the full budget whenever at least one rank is
//! present: the remainder shrinks strictly on every same-level recursion and
//! the single-rank case hands out the last few tokens one by one.

use std::collections::HashMap;

/// Re-rank the distinct priorities present in `groups` to a dense `1..=m`
/// sequence, preserving relative order (rank 1 = lowest present priority).
///
/// Dense ranks guarantee the exclusion test in [`assign_chunks`] degrades by
/// exactly one tier per recursion level regardless of how sparse the raw
/// weights are.
pub fn normalize_priorities(groups: HashMap<u32, Vec<usize>>) -> HashMap<u32, Vec<usize>> {
    let mut priorities: Vec<u32> = groups.keys().copied().collect();
    priorities.sort_unstable();

    let mut normalized = HashMap::with_capacity(groups.len());
    for (position, priority) in priorities.into_iter().enumerate() {
        let members = groups[&priority].clone();
        normalized.insert(position as u32 + 1, members);
    }
    normalized
}

/// Divide `chunks` tokens among the jobs in `groups`, keyed by normalized
/// rank.
///
/// Jobs absent from the returned map receive zero tokens. Whenever at least
/// one rank is present the assigned total equals `chunks` exactly; within a
/// round no job ever receives fewer tokens than a job of lower rank, unless
/// that lower rank was starved entirely.
pub fn assign_chunks(groups: &HashMap<u32, Vec<usize>>, chunks: usize) -> HashMap<usize, usize> {
    let mut result = HashMap::new();
    assign(groups, &mut result, chunks, 0);
    result
}

/// Recursive assignment step. `level` counts the lowest ranks excluded so
/// far; a rank participates only while `rank > level`.
fn assign(
    groups: &HashMap<u32, Vec<usize>>,
    result: &mut HashMap<usize, usize>,
    chunks: usize,
    level: u32,
) {
    let mut ranks: Vec<u32> = groups.keys().copied().filter(|rank| *rank > level).collect();
    if ranks.is_empty() {
        return;
    }
    ranks.sort_unstable();

    if ranks.len() == 1 {
        let members = &groups[&ranks[0]];
        if chunks < members.len() {
            // Even an equal split of one token per job is impossible; hand
            // the remaining tokens to the first members in listing order.
            for &job in &members[..chunks] {
                *result.entry(job).or_insert(0) += 1;
            }
            return;
        }
    }

    let sum: usize = ranks
        .iter()
        .map(|&rank| (rank - level) as usize * groups[&rank].len())
        .sum();

    if sum > chunks {
        // The lowest active rank cannot be served its proportional share;
        // starve it for this round and retry with the floor raised.
        assign(groups, result, chunks, level + 1);
        return;
    }

    let leftover = chunks % sum;
    let coefficient = (chunks - leftover) / sum;

    for &rank in &ranks {
        let share = (rank - level) as usize * coefficient;
        for &job in &groups[&rank] {
            *result.entry(job).or_insert(0) += share;
        }
    }

    if leftover != 0 {
        assign(groups, result, leftover, level);
    }
}
