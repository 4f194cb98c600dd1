//! SafetyAnalyzer / ConcurrentSafetyAnalyzer (spec §4.4): risk scoring,
//! race-condition detection, deadlock-cluster prediction, and parallelism
//! planning.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::locks::classifier::LockClassifier;
use crate::operation::{Operation, OperationId, OperationKind};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskScore(pub f64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceCondition {
    pub a: OperationId,
    pub b: OperationId,
    pub resource: String,
    pub mitigation: Mitigation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mitigation {
    SerializeWithinWave,
    InsertExplicitOrdering,
    PromoteIsolationLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlockCluster {
    pub members: Vec<OperationId>,
    pub hint: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelismPlan {
    pub groups: Vec<Vec<OperationId>>,
    pub recommended_parallelism: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyReport {
    pub risk: FxHashMap<OperationId, RiskScore>,
    pub race_conditions: Vec<RaceCondition>,
    pub lock_escalation_risks: Vec<OperationId>,
    pub parallelism_plan: ParallelismPlan,
    pub recommendations: Vec<String>,
}

pub struct SafetyAnalyzer {
    classifier: LockClassifier,
    max_parallelism: usize,
}

impl Default for SafetyAnalyzer {
    fn default() -> Self {
        Self::new(8)
    }
}

impl SafetyAnalyzer {
    pub fn new(max_parallelism: usize) -> Self {
        Self {
            classifier: LockClassifier::new(),
            max_parallelism,
        }
    }

    /// `analyze(operations) -> SafetyReport`. Operates over the set of
    /// operations that may execute concurrently (same wave candidates); the
    /// planner calls this per-wave-candidate-set during phase assignment.
    pub fn analyze(&self, ops: &[Operation]) -> SafetyReport {
        let risk = self.score_risk(ops);
        let race_conditions = self.detect_races(ops);
        let lock_escalation_risks = ops
            .iter()
            .filter(|o| self.classifier.classify(o).as_str() == "ACCESS EXCLUSIVE")
            .map(|o| o.id)
            .collect();
        let clusters = self.predict_deadlocks(ops, &race_conditions);
        let parallelism_plan = self.plan_parallelism(ops, &race_conditions);

        let mut recommendations: Vec<String> = clusters
            .iter()
            .map(|c| format!("{}: {}", format_members(&c.members), c.hint))
            .collect();
        for race in &race_conditions {
            recommendations.push(format!(
                "{} vs {} on {}: {:?}",
                race.a, race.b, race.resource, race.mitigation
            ));
        }

        SafetyReport {
            risk,
            race_conditions,
            lock_escalation_risks,
            parallelism_plan,
            recommendations,
        }
    }

    fn score_risk(&self, ops: &[Operation]) -> FxHashMap<OperationId, RiskScore> {
        ops.iter()
            .map(|op| {
                let lock_level = self.classifier.classify(op);
                let lock_component = (lock_level as u32 + 1) as f64 / 8.0;
                let size_component = op
                    .estimated_row_count
                    .map(|n| ((n.max(1) as f64).ln() / 20.0).min(1.0))
                    .unwrap_or(0.1);
                let kind_multiplier = match op.kind {
                    OperationKind::AlterColumnType | OperationKind::DropTable => 1.5,
                    OperationKind::DropColumn | OperationKind::DropConstraint => 1.2,
                    _ => 1.0,
                };
                let rewrite_discount = if op.attributes.concurrently == Some(true)
                    || op.attributes.not_valid == Some(true)
                {
                    0.6
                } else {
                    1.0
                };
                let score =
                    (lock_component * 0.5 + size_component * 0.5) * kind_multiplier * rewrite_discount;
                (op.id, RiskScore(score))
            })
            .collect()
    }

    /// Two operations race if they share a resource, at least one writes,
    /// their lock levels conflict, and they are not explicitly ordered
    /// (callers pass only operations with no dependency edge between them).
    fn detect_races(&self, ops: &[Operation]) -> Vec<RaceCondition> {
        let mut races = Vec::new();
        for i in 0..ops.len() {
            for j in (i + 1)..ops.len() {
                let a = &ops[i];
                let b = &ops[j];
                if a.target != b.target {
                    continue;
                }
                if !self.classifier.conflicts(a, b) {
                    continue;
                }
                let mitigation = if a.is_concurrent_index() || b.is_concurrent_index() {
                    Mitigation::SerializeWithinWave
                } else if self.classifier.classify(a).as_str() == "ACCESS EXCLUSIVE"
                    && self.classifier.classify(b).as_str() == "ACCESS EXCLUSIVE"
                {
                    Mitigation::PromoteIsolationLevel
                } else {
                    Mitigation::InsertExplicitOrdering
                };
                races.push(RaceCondition {
                    a: a.id,
                    b: b.id,
                    resource: a.target.clone(),
                    mitigation,
                });
            }
        }
        races
    }

    /// Tarjan's SCC over the conflict graph induced by `race_conditions`;
    /// every SCC of size >= 2 is a potential deadlock cluster.
    fn predict_deadlocks(&self, ops: &[Operation], races: &[RaceCondition]) -> Vec<DeadlockCluster> {
        let index_of: FxHashMap<OperationId, usize> =
            ops.iter().enumerate().map(|(i, o)| (o.id, i)).collect();
        let n = ops.len();
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];
        for race in races {
            if let (Some(&a), Some(&b)) = (index_of.get(&race.a), index_of.get(&race.b)) {
                adj[a].push(b);
                adj[b].push(a);
            }
        }

        let sccs = all_sccs(&adj);
        sccs.into_iter()
            .filter(|c| c.len() >= 2)
            .map(|members| DeadlockCluster {
                members: members.into_iter().map(|i| ops[i].id).collect(),
                hint: "impose consistent ordering or hoist to a sequential wave",
            })
            .collect()
    }

    fn plan_parallelism(&self, ops: &[Operation], races: &[RaceCondition]) -> ParallelismPlan {
        let index_of: FxHashMap<OperationId, usize> =
            ops.iter().enumerate().map(|(i, o)| (o.id, i)).collect();
        let n = ops.len();
        let mut conflicts: Vec<Vec<usize>> = vec![Vec::new(); n];
        for race in races {
            if let (Some(&a), Some(&b)) = (index_of.get(&race.a), index_of.get(&race.b)) {
                conflicts[a].push(b);
                conflicts[b].push(a);
            }
        }

        // Greedy graph coloring groups conflict-free operations together;
        // each color is an independent set safe to run concurrently.
        let mut color_of: Vec<Option<usize>> = vec![None; n];
        let mut groups: Vec<Vec<OperationId>> = Vec::new();
        for i in 0..n {
            let used: Vec<usize> = conflicts[i]
                .iter()
                .filter_map(|&j| color_of[j])
                .collect();
            let color = (0..).find(|c| !used.contains(c)).unwrap();
            color_of[i] = Some(color);
            if groups.len() <= color {
                groups.resize_with(color + 1, Vec::new);
            }
            groups[color].push(ops[i].id);
        }

        let largest_independent_set = groups.iter().map(|g| g.len()).max().unwrap_or(0);
        let total_risk_scale_down = if n > 0 && races.len() * 2 > n { 2 } else { 1 };
        let recommended_parallelism = self
            .max_parallelism
            .min(largest_independent_set.max(1))
            .max(1)
            / total_risk_scale_down.max(1);

        ParallelismPlan {
            groups,
            recommended_parallelism: recommended_parallelism.max(1),
        }
    }
}

fn format_members(members: &[OperationId]) -> String {
    members
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// All strongly-connected components of an undirected conflict graph given
/// as an adjacency list (edges appear symmetrically).
fn all_sccs(adj: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = adj.len();
    let mut visited = vec![false; n];
    let mut components = Vec::new();
    for start in 0..n {
        if visited[start] {
            continue;
        }
        let mut stack = vec![start];
        let mut component = Vec::new();
        visited[start] = true;
        while let Some(v) = stack.pop() {
            component.push(v);
            for &w in &adj[v] {
                if !visited[w] {
                    visited[w] = true;
                    stack.push(w);
                }
            }
        }
        components.push(component);
    }
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{Attributes, OperationId};

    fn mk(id: u32, kind: OperationKind, target: &str) -> Operation {
        Operation::new(OperationId(id), kind, target).with_attributes(Attributes::default())
    }

    #[test]
    fn same_table_conflicting_ops_race() {
        let ops = vec![
            mk(0, OperationKind::DropTable, "orders"),
            mk(1, OperationKind::AddColumn, "orders"),
        ];
        let analyzer = SafetyAnalyzer::default();
        let report = analyzer.analyze(&ops);
        assert_eq!(report.race_conditions.len(), 1);
    }

    #[test]
    fn different_tables_never_race() {
        let ops = vec![
            mk(0, OperationKind::DropTable, "orders"),
            mk(1, OperationKind::AddColumn, "users"),
        ];
        let analyzer = SafetyAnalyzer::default();
        let report = analyzer.analyze(&ops);
        assert!(report.race_conditions.is_empty());
    }

    #[test]
    fn three_way_conflict_cluster_detected() {
        let ops = vec![
            mk(0, OperationKind::DropTable, "orders"),
            mk(1, OperationKind::AddColumn, "orders"),
            mk(2, OperationKind::DropColumn, "orders"),
        ];
        let analyzer = SafetyAnalyzer::default();
        let report = analyzer.analyze(&ops);
        assert!(!report.recommendations.is_empty());
    }

    #[test]
    fn risk_score_is_higher_for_access_exclusive_than_concurrent_index() {
        let mut concurrent = mk(0, OperationKind::AddIndex, "orders");
        concurrent.attributes.concurrently = Some(true);
        let exclusive = mk(1, OperationKind::DropTable, "orders");
        let analyzer = SafetyAnalyzer::default();
        let report = analyzer.analyze(&[concurrent.clone(), exclusive.clone()]);
        assert!(report.risk[&exclusive.id].0 > report.risk[&concurrent.id].0);
    }

    #[test]
    fn parallelism_plan_never_exceeds_max() {
        let ops: Vec<Operation> = (0..20)
            .map(|i| mk(i, OperationKind::AddColumn, &format!("t{i}")))
            .collect();
        let analyzer = SafetyAnalyzer::new(4);
        let report = analyzer.analyze(&ops);
        assert!(report.parallelism_plan.recommended_parallelism <= 4);
    }
}
