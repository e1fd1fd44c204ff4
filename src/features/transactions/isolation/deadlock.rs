use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, warn};

use super::locks::TxId;

/// Deadlock resolution strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeadlockResolutionStrategy {
    /// Abort the youngest transaction (latest start time)
    #[default]
    AbortYoungest,
    /// Abort the transaction with the fewest logged operations
    AbortLeastWork,
    /// Abort the transaction holding the fewest locks
    AbortFewestLocks,
}

/// Transaction information for victim selection
#[derive(Debug, Clone)]
pub struct VictimCandidate {
    pub tx_id: TxId,
    pub start_time: Instant,
    pub locks_held: usize,
    pub work_done: usize,
}

/// One detected cycle and the transaction chosen to break it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadlockReport {
    pub cycle: Vec<TxId>,
    pub victim: TxId,
    pub reason: String,
}

/// Wait-for graph: tx_id -> set of transactions it's waiting for
#[derive(Debug, Default, Clone)]
pub struct WaitForGraph {
    edges: HashMap<TxId, HashSet<TxId>>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a wait-for edge (waiting_tx is waiting for blocking_tx)
    pub fn add_edge(&mut self, waiting_tx: TxId, blocking_tx: TxId) {
        if waiting_tx == blocking_tx {
            return;
        }
        self.edges.entry(waiting_tx).or_default().insert(blocking_tx);
    }

    /// Replace every outgoing edge of `waiting_tx` with edges to `blockers`.
    pub fn set_waits(&mut self, waiting_tx: TxId, blockers: &[TxId]) {
        let targets: HashSet<TxId> = blockers
            .iter()
            .copied()
            .filter(|&b| b != waiting_tx)
            .collect();
        if targets.is_empty() {
            self.edges.remove(&waiting_tx);
        } else if self.edges.get(&waiting_tx) != Some(&targets) {
            debug!("Wait edges: {} -> {:?}", waiting_tx, targets);
            self.edges.insert(waiting_tx, targets);
        }
    }

    /// Drop the outgoing edges of a transaction whose wait resolved.
    pub fn clear_waits(&mut self, waiting_tx: TxId) {
        self.edges.remove(&waiting_tx);
    }

    /// Remove a transaction entirely, incoming edges included.
    pub fn remove_transaction(&mut self, tx_id: TxId) {
        self.edges.remove(&tx_id);
        self.edges.retain(|_, blockers| {
            blockers.remove(&tx_id);
            !blockers.is_empty()
        });
    }

    pub fn waits_for(&self, tx_id: TxId) -> Vec<TxId> {
        let mut out: Vec<TxId> = self
            .edges
            .get(&tx_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        out.sort_unstable();
        out
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(HashSet::len).sum()
    }

    pub fn edges(&self) -> Vec<(TxId, TxId)> {
        let mut out: Vec<(TxId, TxId)> = self
            .edges
            .iter()
            .flat_map(|(&from, to)| to.iter().map(move |&t| (from, t)))
            .collect();
        out.sort_unstable();
        out
    }

    /// Find cycles with an iterative depth-first search. Any edge that reaches
    /// a node still on the DFS stack closes a cycle; each distinct member set
    /// is reported once, in wait order starting from the revisited node.
    pub fn find_cycles(&self) -> Vec<Vec<TxId>> {
        let mut visited: HashSet<TxId> = HashSet::new();
        let mut seen_cycles: HashSet<BTreeSet<TxId>> = HashSet::new();
        let mut cycles = Vec::new();

        let mut roots: Vec<TxId> = self.edges.keys().copied().collect();
        roots.sort_unstable();

        for root in roots {
            if visited.contains(&root) {
                continue;
            }

            // (node, sorted successors, next successor index)
            let mut stack: Vec<(TxId, Vec<TxId>, usize)> = vec![(root, self.waits_for(root), 0)];
            let mut on_stack: HashSet<TxId> = HashSet::from([root]);
            let mut path: Vec<TxId> = vec![root];
            visited.insert(root);

            while let Some((_, successors, next)) = stack.last_mut() {
                if *next < successors.len() {
                    let succ = successors[*next];
                    *next += 1;
                    if on_stack.contains(&succ) {
                        if let Some(pos) = path.iter().position(|&tx| tx == succ) {
                            let cycle = path[pos..].to_vec();
                            if seen_cycles.insert(cycle.iter().copied().collect()) {
                                cycles.push(cycle);
                            }
                        }
                    } else if visited.insert(succ) {
                        on_stack.insert(succ);
                        path.push(succ);
                        stack.push((succ, self.waits_for(succ), 0));
                    }
                } else if let Some((node, _, _)) = stack.pop() {
                    on_stack.remove(&node);
                    path.pop();
                }
            }
        }

        cycles
    }

    /// Whether `tx_id` currently sits on a wait-for cycle.
    pub fn is_on_cycle(&self, tx_id: TxId) -> bool {
        // Walk forward from tx_id; a cycle through it means we come back.
        let mut stack = self.waits_for(tx_id);
        let mut seen: HashSet<TxId> = HashSet::new();
        while let Some(next) = stack.pop() {
            if next == tx_id {
                return true;
            }
            if seen.insert(next) {
                stack.extend(self.waits_for(next));
            }
        }
        false
    }
}

/// Deadlock statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeadlockStats {
    pub scans: u64,
    pub deadlocks_detected: u64,
    pub victims_selected: u64,
}

/// Cycle finder plus victim selection. Aborting the victims is the caller's job.
#[derive(Debug)]
pub struct DeadlockDetector {
    strategy: DeadlockResolutionStrategy,
    stats: DeadlockStats,
}

impl DeadlockDetector {
    pub fn new(strategy: DeadlockResolutionStrategy) -> Self {
        Self {
            strategy,
            stats: DeadlockStats::default(),
        }
    }

    pub fn strategy(&self) -> DeadlockResolutionStrategy {
        self.strategy
    }

    /// Scan `graph` and pick one victim per distinct cycle. A transaction is
    /// never chosen twice; a cycle that already contains an earlier victim is
    /// considered broken.
    pub fn detect(
        &mut self,
        graph: &WaitForGraph,
        candidates: &HashMap<TxId, VictimCandidate>,
    ) -> Vec<DeadlockReport> {
        self.stats.scans += 1;
        let cycles = graph.find_cycles();
        if cycles.is_empty() {
            return Vec::new();
        }

        self.stats.deadlocks_detected += cycles.len() as u64;
        warn!("Detected {} deadlock cycle(s)", cycles.len());

        let mut victims: HashSet<TxId> = HashSet::new();
        let mut reports = Vec::new();
        for cycle in cycles {
            if cycle.iter().any(|tx| victims.contains(tx)) {
                continue;
            }
            if let Some(victim) = self.select_victim(&cycle, candidates) {
                victims.insert(victim);
                self.stats.victims_selected += 1;
                warn!("Selected victim {} for deadlock cycle: {:?}", victim, cycle);
                reports.push(DeadlockReport {
                    reason: self.victim_reason(victim, candidates),
                    cycle,
                    victim,
                });
            }
        }
        reports
    }

    pub fn stats(&self) -> DeadlockStats {
        self.stats.clone()
    }

    /// Select a victim transaction from a deadlock cycle. Ties go to the
    /// higher (later allocated) id.
    fn select_victim(
        &self,
        cycle: &[TxId],
        candidates: &HashMap<TxId, VictimCandidate>,
    ) -> Option<TxId> {
        let members = cycle.iter().filter_map(|tx| candidates.get(tx));
        let chosen = match self.strategy {
            DeadlockResolutionStrategy::AbortYoungest => {
                members.max_by_key(|c| (c.start_time, c.tx_id))
            }
            DeadlockResolutionStrategy::AbortLeastWork => members
                .min_by_key(|c| (c.work_done, std::cmp::Reverse(c.tx_id))),
            DeadlockResolutionStrategy::AbortFewestLocks => members
                .min_by_key(|c| (c.locks_held, std::cmp::Reverse(c.tx_id))),
        };
        // Members without candidate info are already finishing; fall back to
        // the highest id so the cycle still gets broken.
        chosen
            .map(|c| c.tx_id)
            .or_else(|| cycle.iter().copied().max())
    }

    fn victim_reason(&self, victim: TxId, candidates: &HashMap<TxId, VictimCandidate>) -> String {
        let info = candidates.get(&victim);
        match (self.strategy, info) {
            (DeadlockResolutionStrategy::AbortYoungest, Some(info)) => {
                format!("Youngest transaction (age {:?})", info.start_time.elapsed())
            }
            (DeadlockResolutionStrategy::AbortLeastWork, Some(info)) => {
                format!("Least work done ({} operations)", info.work_done)
            }
            (DeadlockResolutionStrategy::AbortFewestLocks, Some(info)) => {
                format!("Fewest locks held ({} locks)", info.locks_held)
            }
            (_, None) => "No candidate info available".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn candidates(entries: &[(TxId, u64, usize, usize)]) -> HashMap<TxId, VictimCandidate> {
        let base = Instant::now();
        entries
            .iter()
            .map(|&(tx_id, offset_ms, locks_held, work_done)| {
                (
                    tx_id,
                    VictimCandidate {
                        tx_id,
                        start_time: base + Duration::from_millis(offset_ms),
                        locks_held,
                        work_done,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_deadlock_detection() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 3);
        graph.add_edge(3, 1);

        let cycles = graph.find_cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 3);
        assert!(graph.is_on_cycle(2));

        let mut detector = DeadlockDetector::new(DeadlockResolutionStrategy::AbortYoungest);
        let reports = detector.detect(&graph, &candidates(&[(1, 0, 1, 1), (2, 5, 1, 1), (3, 10, 1, 1)]));
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].victim, 3);
    }

    #[test]
    fn test_victim_selection_least_work() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 1);

        let mut detector = DeadlockDetector::new(DeadlockResolutionStrategy::AbortLeastWork);
        let reports = detector.detect(&graph, &candidates(&[(1, 0, 1, 100), (2, 5, 1, 50)]));
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].victim, 2);
        assert_eq!(detector.stats().victims_selected, 1);
    }

    #[test]
    fn test_fewest_locks() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 1);

        let mut detector = DeadlockDetector::new(DeadlockResolutionStrategy::AbortFewestLocks);
        let reports = detector.detect(&graph, &candidates(&[(1, 0, 1, 0), (2, 5, 4, 0)]));
        assert_eq!(reports[0].victim, 1);
    }

    #[test]
    fn test_no_false_positives() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 3);
        graph.add_edge(1, 3);
        graph.add_edge(1, 1);

        assert!(graph.find_cycles().is_empty());
        assert!(!graph.is_on_cycle(1));
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn test_two_disjoint_cycles() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 1);
        graph.add_edge(3, 4);
        graph.add_edge(4, 3);
        graph.add_edge(5, 1);

        let mut detector = DeadlockDetector::new(DeadlockResolutionStrategy::AbortYoungest);
        let reports = detector.detect(
            &graph,
            &candidates(&[(1, 0, 1, 0), (2, 1, 1, 0), (3, 2, 1, 0), (4, 3, 1, 0), (5, 4, 0, 0)]),
        );
        let mut victims: Vec<TxId> = reports.iter().map(|r| r.victim).collect();
        victims.sort_unstable();
        assert_eq!(victims, vec![2, 4]);
        assert!(!graph.is_on_cycle(5));
    }

    #[test]
    fn test_shared_victim_breaks_overlapping_cycles() {
        // 1 <-> 2 and 2 <-> 3 share tx 2, the youngest of 1 and 2.
        let mut graph = WaitForGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 1);
        graph.add_edge(2, 3);
        graph.add_edge(3, 2);

        let mut detector = DeadlockDetector::new(DeadlockResolutionStrategy::AbortYoungest);
        let reports = detector.detect(&graph, &candidates(&[(1, 0, 1, 0), (2, 9, 1, 0), (3, 5, 1, 0)]));
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].victim, 2);
    }

    #[test]
    fn test_remove_transaction_clears_incoming_edges() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(3, 2);
        graph.add_edge(2, 4);

        graph.remove_transaction(2);
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn test_set_waits_replaces_edges() {
        let mut graph = WaitForGraph::new();
        graph.set_waits(1, &[2, 3]);
        assert_eq!(graph.waits_for(1), vec![2, 3]);
        graph.set_waits(1, &[3]);
        assert_eq!(graph.waits_for(1), vec![3]);
        graph.set_waits(1, &[]);
        assert_eq!(graph.edge_count(), 0);
    }
}
