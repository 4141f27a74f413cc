use serde::{Deserialize, Serialize};

use crate::candidate::Candidate;
use crate::ids::CandidateId;
use crate::job::JobParams;
use crate::usage::CostTotals;

/// All candidates produced in one iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Iteration number.
    pub iteration: u32,
    /// Candidates produced this iteration, in ordinal order.
    pub candidates: Vec<Candidate>,
}

/// Identifies the globally top-ranked candidate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FinalWinner {
    /// The winner's iteration.
    pub iteration: u32,
    /// The winner's candidate id.
    pub candidate_id: CandidateId,
}

/// The full record persisted at FINALIZE (and, truncated, on cancellation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetadata {
    /// The original user prompt.
    pub user_prompt: String,
    /// The validated job configuration.
    pub config: JobParams,
    /// Every iteration executed, in order.
    pub iterations: Vec<IterationRecord>,
    /// The globally-ranked #1 candidate, if the job reached FINALIZE.
    pub final_winner: Option<FinalWinner>,
    /// Root-to-winner parent chain, iteration 0 first.
    pub lineage: Vec<CandidateId>,
    /// Final cost totals.
    pub costs: CostTotals,
    /// Status this record was written under (`"complete"`, `"cancelled"`,
    /// or `"failed"`).
    pub status: String,
    /// Non-fatal errors accumulated along the way (e.g. VLM pair failures
    /// that triggered fallback to score mode).
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Walk parent pointers from `winner` back to its iteration-0 ancestor.
///
/// Returns the chain ordered root-first (iteration 0 .. winner's iteration),
/// matching the definition of lineage: length equals the number of
/// iterations completed, `lineage[0].iteration == 0`.
pub fn build_lineage(iterations: &[IterationRecord], winner: CandidateId) -> Vec<CandidateId> {
    let mut by_id = std::collections::HashMap::new();
    for iter in iterations {
        for c in &iter.candidates {
            by_id.insert(c.id, c);
        }
    }

    let mut chain = Vec::new();
    let mut current = Some(winner);
    while let Some(id) = current {
        chain.push(id);
        current = by_id.get(&id).and_then(|c| c.parent_id);
    }
    chain.reverse();
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(iteration: u32, ordinal: u32, parent: Option<CandidateId>) -> Candidate {
        Candidate::new(
            iteration,
            ordinal,
            parent,
            "what".into(),
            "how".into(),
            "combined".into(),
        )
    }

    #[test]
    fn lineage_walks_back_to_iteration_zero() {
        let root = candidate(0, 0, None);
        let child = candidate(1, 0, Some(root.id));
        let grandchild = candidate(2, 0, Some(child.id));

        let iterations = vec![
            IterationRecord {
                iteration: 0,
                candidates: vec![root.clone()],
            },
            IterationRecord {
                iteration: 1,
                candidates: vec![child.clone()],
            },
            IterationRecord {
                iteration: 2,
                candidates: vec![grandchild.clone()],
            },
        ];

        let lineage = build_lineage(&iterations, grandchild.id);
        assert_eq!(lineage, vec![root.id, child.id, grandchild.id]);
        assert_eq!(lineage.first().unwrap().iteration, 0);
        assert_eq!(lineage.last().unwrap(), &grandchild.id);
    }
}
