//! Response Arbitration
//!
//! Picks the single response returned to the caller out of the local
//! response and every peer response.

use crate::request::OperationKind;
use crate::response::ClusterResponse;

/// Ranks substituted before comparing statuses on delete
///
/// A 404 loses against everything: a cluster that never had the resource
/// must not hide another cluster's failure.
const DELETE_REMAP: &[(u16, u16)] = &[(404, 1)];

/// How the winning response is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbitrationPolicy {
    /// Numerically highest status wins (create/update)
    HighestStatus,
    /// Highest status wins after remapping 404 to the bottom (delete)
    DeleteRemap,
}

impl ArbitrationPolicy {
    pub fn for_operation(operation: OperationKind) -> Self {
        match operation {
            OperationKind::Delete => ArbitrationPolicy::DeleteRemap,
            _ => ArbitrationPolicy::HighestStatus,
        }
    }

    fn remap(&self) -> &'static [(u16, u16)] {
        match self {
            ArbitrationPolicy::HighestStatus => &[],
            ArbitrationPolicy::DeleteRemap => DELETE_REMAP,
        }
    }

    /// Rank used for comparison
    pub fn rank(&self, status: u16) -> u16 {
        self.remap()
            .iter()
            .find(|(from, _)| *from == status)
            .map(|(_, to)| *to)
            .unwrap_or(status)
    }
}

/// Highest-ranked response; ties go to the first one seen
pub fn highest_response(
    results: &[ClusterResponse],
    policy: ArbitrationPolicy,
) -> Option<&ClusterResponse> {
    let mut highest: Option<(u16, &ClusterResponse)> = None;
    for result in results {
        let rank = policy.rank(result.status);
        match highest {
            Some((best, _)) if rank <= best => {}
            _ => highest = Some((rank, result)),
        }
    }
    highest.map(|(_, result)| result)
}

/// Every response is 2xx
pub fn all_success(results: &[ClusterResponse]) -> bool {
    results.iter().all(ClusterResponse::is_success)
}

/// Raw arbitration, service unavailable when there is nothing to pick
pub fn arbitrate(results: &[ClusterResponse], policy: ArbitrationPolicy) -> ClusterResponse {
    highest_response(results, policy)
        .cloned()
        .unwrap_or_else(ClusterResponse::service_unavailable)
}

/// Final response for an operation
///
/// Deletes report the best outcome they have. Anything else succeeds only
/// when every cluster succeeded; a partially applied create/update is
/// reported as service unavailable.
pub fn resolve(results: &[ClusterResponse], operation: OperationKind) -> ClusterResponse {
    let policy = ArbitrationPolicy::for_operation(operation);
    match policy {
        ArbitrationPolicy::DeleteRemap => arbitrate(results, policy),
        ArbitrationPolicy::HighestStatus => {
            if all_success(results) {
                arbitrate(results, policy)
            } else {
                tracing::warn!(
                    "Not every cluster succeeded ({}), reporting service unavailable",
                    statuses(results)
                );
                ClusterResponse::service_unavailable()
            }
        }
    }
}

fn statuses(results: &[ClusterResponse]) -> String {
    results
        .iter()
        .map(|r| r.status.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responses(statuses: &[u16]) -> Vec<ClusterResponse> {
        statuses
            .iter()
            .enumerate()
            .map(|(i, s)| ClusterResponse::new(*s, Vec::new(), format!("cluster-{}", i)))
            .collect()
    }

    /// All orderings of a small slice
    fn permutations(items: &[u16]) -> Vec<Vec<u16>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head);
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn test_highest_status_raw() {
        let results = responses(&[503, 201, 404]);
        assert_eq!(arbitrate(&results, ArbitrationPolicy::HighestStatus).status, 503);
    }

    #[test]
    fn test_create_all_success() {
        let results = responses(&[201, 201]);
        assert!(all_success(&results));
        assert_eq!(arbitrate(&results, ArbitrationPolicy::HighestStatus).status, 201);
        assert_eq!(resolve(&results, OperationKind::Create).status, 201);
    }

    #[test]
    fn test_create_partial_failure_is_unavailable() {
        let results = responses(&[201, 500]);
        assert!(!all_success(&results));
        assert_eq!(resolve(&results, OperationKind::Create), ClusterResponse::service_unavailable());
        assert_eq!(resolve(&results, OperationKind::Update).status, 503);
    }

    #[test]
    fn test_delete_remap_demotes_not_found() {
        let results = responses(&[404, 503]);
        assert_eq!(arbitrate(&results, ArbitrationPolicy::DeleteRemap).status, 503);
        assert_eq!(resolve(&results, OperationKind::Delete).status, 503);

        // Even a success beats "not found" on delete
        let results = responses(&[404, 204]);
        assert_eq!(resolve(&results, OperationKind::Delete).status, 204);
    }

    #[test]
    fn test_delete_not_found_everywhere() {
        let results = responses(&[404, 404]);
        let chosen = resolve(&results, OperationKind::Delete);
        assert_eq!(chosen.status, 404);
        // Ties keep the first response seen
        assert_eq!(chosen.body, bytes::Bytes::from("cluster-0"));
    }

    #[test]
    fn test_ties_keep_first_seen() {
        let results = responses(&[201, 202, 202]);
        let chosen = arbitrate(&results, ArbitrationPolicy::HighestStatus);
        assert_eq!(chosen.body, bytes::Bytes::from("cluster-1"));
    }

    #[test]
    fn test_empty_results() {
        assert_eq!(
            arbitrate(&[], ArbitrationPolicy::HighestStatus),
            ClusterResponse::service_unavailable()
        );
        assert_eq!(resolve(&[], OperationKind::Delete).status, 503);
        assert_eq!(resolve(&[], OperationKind::Create).status, 503);
    }

    #[test]
    fn test_arbitration_is_order_independent() {
        for statuses in [[404, 503, 204], [201, 202, 500], [404, 404, 204], [201, 201, 201]] {
            for policy in [ArbitrationPolicy::HighestStatus, ArbitrationPolicy::DeleteRemap] {
                let expected = arbitrate(&responses(&statuses), policy).status;
                for ordering in permutations(&statuses) {
                    assert_eq!(arbitrate(&responses(&ordering), policy).status, expected);
                }
            }
            for operation in [OperationKind::Create, OperationKind::Delete] {
                let expected = resolve(&responses(&statuses), operation).status;
                for ordering in permutations(&statuses) {
                    assert_eq!(resolve(&responses(&ordering), operation).status, expected);
                }
            }
        }
    }

    #[test]
    fn test_policy_for_operation() {
        assert_eq!(
            ArbitrationPolicy::for_operation(OperationKind::Delete),
            ArbitrationPolicy::DeleteRemap
        );
        assert_eq!(
            ArbitrationPolicy::for_operation(OperationKind::Update),
            ArbitrationPolicy::HighestStatus
        );
        assert_eq!(ArbitrationPolicy::DeleteRemap.rank(404), 1);
        assert_eq!(ArbitrationPolicy::HighestStatus.rank(404), 404);
    }
}
