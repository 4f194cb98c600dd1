//! Wait-for graph types sampled from `pg_locks`/`pg_stat_activity` (spec §4.9).

use std::time::Duration;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    pub backend_id: i32,
    pub relation: String,
    pub lock_type: String,
    pub mode: String,
    pub granted: bool,
    pub transaction_id: Option<i32>,
    pub query_text: Option<String>,
    pub query_started_at: Option<DateTime<Utc>>,
    pub waiting_since: Option<DateTime<Utc>>,
}

/// One edge of the waits-for graph: `waiting_pid` blocks on `blocking_pid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitEdge {
    pub waiting_pid: i32,
    pub blocking_pid: i32,
    pub lock_type: String,
    pub relation: String,
    pub wait_duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct LockSnapshot {
    pub locks: Vec<Lock>,
    pub waits: Vec<WaitEdge>,
}

impl LockSnapshot {
    /// Finds every distinct cycle in the waits-for graph (each a real
    /// deadlock Postgres has not yet resolved, or one forming at snapshot
    /// time): the strongly connected components of size >= 2, using
    /// Tarjan's algorithm. Spec §8 invariant 8 requires one entry per
    /// distinct cycle, not just the first one found.
    pub fn find_cycles(&self) -> Vec<Vec<i32>> {
        use rustc_hash::FxHashMap;

        let pids: Vec<i32> = {
            let mut set: Vec<i32> = self
                .waits
                .iter()
                .flat_map(|e| [e.waiting_pid, e.blocking_pid])
                .collect();
            set.sort_unstable();
            set.dedup();
            set
        };
        let index_of: FxHashMap<i32, usize> =
            pids.iter().enumerate().map(|(i, &p)| (p, i)).collect();
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); pids.len()];
        for edge in &self.waits {
            adj[index_of[&edge.waiting_pid]].push(index_of[&edge.blocking_pid]);
        }

        let sccs = tarjan_scc(&adj);
        let mut cycles: Vec<Vec<i32>> = sccs
            .into_iter()
            .filter(|scc| {
                scc.len() > 1
                    || (scc.len() == 1 && adj[scc[0]].contains(&scc[0]))
            })
            .map(|scc| scc.into_iter().map(|i| pids[i]).collect::<Vec<i32>>())
            .collect();
        for cycle in &mut cycles {
            cycle.sort_unstable();
        }
        cycles.sort_by_key(|c| c.first().copied().unwrap_or(0));
        cycles
    }

    /// Total wait time accumulated by the waiting edges among `participants`,
    /// used to populate `DEADLOCK_DETECTED.total_wait_ms` (spec S5).
    pub fn total_wait(&self, participants: &[i32]) -> Duration {
        let millis: u64 = self
            .waits
            .iter()
            .filter(|e| participants.contains(&e.waiting_pid) && participants.contains(&e.blocking_pid))
            .map(|e| e.wait_duration_ms)
            .sum();
        Duration::from_millis(millis)
    }
}

/// Tarjan's strongly-connected-components algorithm over an adjacency list
/// indexed `0..n`. Returns components in no particular order.
fn tarjan_scc(adj: &[Vec<usize>]) -> Vec<Vec<usize>> {
    struct State<'a> {
        adj: &'a [Vec<usize>],
        index: Vec<Option<usize>>,
        low_link: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        next_index: usize,
        out: Vec<Vec<usize>>,
    }

    fn strong_connect(v: usize, s: &mut State<'_>) {
        s.index[v] = Some(s.next_index);
        s.low_link[v] = s.next_index;
        s.next_index += 1;
        s.stack.push(v);
        s.on_stack[v] = true;

        for &w in &s.adj[v] {
            if s.index[w].is_none() {
                strong_connect(w, s);
                s.low_link[v] = s.low_link[v].min(s.low_link[w]);
            } else if s.on_stack[w] {
                s.low_link[v] = s.low_link[v].min(s.index[w].unwrap());
            }
        }

        if s.low_link[v] == s.index[v].unwrap() {
            let mut component = Vec::new();
            loop {
                let w = s.stack.pop().unwrap();
                s.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            s.out.push(component);
        }
    }

    let n = adj.len();
    let mut state = State {
        adj,
        index: vec![None; n],
        low_link: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        next_index: 0,
        out: Vec::new(),
    };
    for v in 0..n {
        if state.index[v].is_none() {
            strong_connect(v, &mut state);
        }
    }
    state.out
}

#[derive(Debug, Clone)]
pub struct ContentionStat {
    pub relation: String,
    pub waiting_count: usize,
    pub total_wait: Duration,
    pub max_wait: Duration,
}

impl ContentionStat {
    pub fn avg_wait(&self) -> Duration {
        if self.waiting_count == 0 {
            Duration::ZERO
        } else {
            self.total_wait / self.waiting_count as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(waiting: i32, blocking: i32) -> WaitEdge {
        WaitEdge {
            waiting_pid: waiting,
            blocking_pid: blocking,
            lock_type: "relation".into(),
            relation: "orders".into(),
            wait_duration_ms: 100,
        }
    }

    #[test]
    fn detects_two_cycle() {
        let snapshot = LockSnapshot {
            locks: vec![],
            waits: vec![edge(1, 2), edge(2, 1)],
        };
        let cycles = snapshot.find_cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0], vec![1, 2]);
    }

    #[test]
    fn no_cycle_in_chain() {
        let snapshot = LockSnapshot {
            locks: vec![],
            waits: vec![edge(1, 2), edge(2, 3)],
        };
        assert!(snapshot.find_cycles().is_empty());
    }

    #[test]
    fn detects_multiple_distinct_cycles() {
        // Two independent cycles: {1,2} and {3,4,5}.
        let snapshot = LockSnapshot {
            locks: vec![],
            waits: vec![
                edge(1, 2),
                edge(2, 1),
                edge(3, 4),
                edge(4, 5),
                edge(5, 3),
            ],
        };
        let mut cycles = snapshot.find_cycles();
        cycles.sort();
        assert_eq!(cycles, vec![vec![1, 2], vec![3, 4, 5]]);
    }

    #[test]
    fn total_wait_sums_only_participant_edges() {
        let snapshot = LockSnapshot {
            locks: vec![],
            waits: vec![edge(1, 2), edge(2, 3), edge(3, 1)],
        };
        let total = snapshot.total_wait(&[1, 2, 3]);
        assert_eq!(total, Duration::from_millis(300));
    }
}
