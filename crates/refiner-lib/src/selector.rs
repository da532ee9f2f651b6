//! Drain candidate selection

use crate::models::NodeRecord;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("couldn't find any node records")]
    NoCandidateFound,
    #[error("all nodes are tainted, unable to find any node to drain")]
    AllNodesTainted,
}

/// Pick the untainted, schedulable node with the lowest utilization score
///
/// Equal scores resolve to the lexicographically smallest node name, so the
/// choice does not depend on the order of `nodes`.
pub fn select_candidate(nodes: &[NodeRecord]) -> Result<&NodeRecord, SelectionError> {
    if nodes.is_empty() {
        return Err(SelectionError::NoCandidateFound);
    }

    let mut best: Option<&NodeRecord> = None;
    for node in nodes.iter().filter(|n| !n.is_tainted()) {
        best = match best {
            None => Some(node),
            Some(current) => {
                let lower = node.utilization.score < current.utilization.score;
                let tie = node.utilization.score == current.utilization.score
                    && node.name < current.name;
                if lower || tie {
                    Some(node)
                } else {
                    Some(current)
                }
            }
        };
    }

    best.ok_or(SelectionError::AllNodesTainted)
}
