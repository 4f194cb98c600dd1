//! DependencyResolver: builds a dependency DAG over operations, detects
//! cycles, and produces a deterministic topological order (spec §4.3).

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::operation::{Operation, OperationId, OperationKind};

/// Arena-style DAG: integer node ids (indices into `operations`) plus
/// separate forward and reverse edge lists, as specified in spec §4.3.
#[derive(Debug, Clone)]
pub struct Dag {
    pub operations: Vec<Operation>,
    /// `forward[i]` lists the indices of operations that depend on `i`.
    pub forward: Vec<Vec<usize>>,
    /// `reverse[i]` lists the indices `i` depends on.
    pub reverse: Vec<Vec<usize>>,
}

#[derive(Debug, Error, miette::Diagnostic)]
pub enum DependencyError {
    #[error("circular dependency among operations: {0:?}")]
    #[diagnostic(
        code(wesley::dependency::circular),
        help("break the cycle by reordering or splitting one of the listed operations")
    )]
    CircularDependency(Vec<OperationId>),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// `build(ops) -> DAG`.
    ///
    /// Dependency rules (spec §4.3):
    /// - any op referencing table T depends on T's `create_table` in the same plan,
    /// - `add_foreign_key` depends on the referenced table's creation,
    /// - `validate_constraint` depends on the constraint's creation,
    /// - `add_index` depends on all referenced columns' creations,
    /// - post-shadow swap steps depend on the preceding backfill.
    pub fn build(&self, ops: Vec<Operation>) -> Dag {
        let n = ops.len();
        let index_by_id: FxHashMap<OperationId, usize> =
            ops.iter().enumerate().map(|(i, o)| (o.id, i)).collect();

        // Index create_table ops by table name, and index synthesized markers
        // (column:/constraint:/backfill:/op:) produced by the rewriter, so
        // references can resolve either to a table name or to a marker.
        let table_creators: FxHashMap<&str, usize> = ops
            .iter()
            .enumerate()
            .filter(|(_, o)| o.kind == OperationKind::CreateTable)
            .map(|(i, o)| (o.target.as_str(), i))
            .collect();

        let marker_producers: FxHashMap<String, usize> = ops
            .iter()
            .enumerate()
            .flat_map(|(i, o)| {
                let mut markers = vec![format!("op:{}", o.id.0)];
                if o.kind == OperationKind::Backfill {
                    markers.push(format!("backfill:{}", o.id.0));
                }
                if let Some(name) = &o.index_or_constraint_name {
                    markers.push(format!("constraint:{name}"));
                }
                if let Some(col) = &o.attributes.column_name {
                    markers.push(format!("column:{col}"));
                }
                markers.into_iter().map(move |m| (m, i))
            })
            .collect();

        let mut forward: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut reverse: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (i, op) in ops.iter().enumerate() {
            let mut deps: Vec<usize> = Vec::new();

            if op.kind != OperationKind::CreateTable {
                if let Some(&creator) = table_creators.get(op.target.as_str()) {
                    if creator != i {
                        deps.push(creator);
                    }
                }
            }

            for reference in &op.references {
                if let Some(&dep_idx) = marker_producers.get(reference) {
                    if dep_idx != i {
                        deps.push(dep_idx);
                    }
                } else if let Some(&dep_idx) = table_creators.get(reference.as_str()) {
                    if dep_idx != i {
                        deps.push(dep_idx);
                    }
                } else if let Some(&dep_idx) = index_by_id.get(&parse_op_ref(reference).unwrap_or(op.id))
                {
                    if dep_idx != i {
                        deps.push(dep_idx);
                    }
                }
            }

            deps.sort_unstable();
            deps.dedup();
            for dep in deps {
                reverse[i].push(dep);
                forward[dep].push(i);
            }
        }

        Dag {
            operations: ops,
            forward,
            reverse,
        }
    }

    /// `topologicalOrder(dag) -> [Operation]` via Kahn's algorithm; ties
    /// broken by insertion order for determinism.
    pub fn topological_order(&self, dag: &Dag) -> Result<Vec<Operation>, DependencyError> {
        let n = dag.operations.len();
        let mut in_degree: Vec<usize> = dag.reverse.iter().map(|d| d.len()).collect();
        // Insertion order (0..n scan) gives deterministic tie-breaking.
        let mut queue: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        let mut cursor = 0;

        while cursor < queue.len() {
            let i = queue[cursor];
            cursor += 1;
            order.push(i);
            for &dependent in &dag.forward[i] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push(dependent);
                }
            }
        }

        if order.len() != n {
            let remaining: Vec<usize> = (0..n).filter(|i| !order.contains(i)).collect();
            let cycle = tarjan_scc(dag, &remaining);
            return Err(DependencyError::CircularDependency(
                cycle.into_iter().map(|i| dag.operations[i].id).collect(),
            ));
        }

        Ok(order.into_iter().map(|i| dag.operations[i].clone()).collect())
    }
}

fn parse_op_ref(reference: &str) -> Option<OperationId> {
    reference.strip_prefix("op:").and_then(|s| s.parse().ok()).map(OperationId)
}

/// Tarjan's strongly-connected-components algorithm restricted to the given
/// node subset, returning the first SCC of size >= 2 (the reported cycle).
fn tarjan_scc(dag: &Dag, subset: &[usize]) -> Vec<usize> {
    struct State<'a> {
        dag: &'a Dag,
        index_counter: usize,
        stack: Vec<usize>,
        on_stack: Vec<bool>,
        indices: Vec<Option<usize>>,
        lowlink: Vec<usize>,
        result: Option<Vec<usize>>,
    }

    fn strongconnect(v: usize, st: &mut State) {
        if st.result.is_some() {
            return;
        }
        st.indices[v] = Some(st.index_counter);
        st.lowlink[v] = st.index_counter;
        st.index_counter += 1;
        st.stack.push(v);
        st.on_stack[v] = true;

        for &w in &st.dag.forward[v] {
            if st.result.is_some() {
                return;
            }
            if st.indices[w].is_none() {
                strongconnect(w, st);
                st.lowlink[v] = st.lowlink[v].min(st.lowlink[w]);
            } else if st.on_stack[w] {
                st.lowlink[v] = st.lowlink[v].min(st.indices[w].unwrap());
            }
        }

        if st.lowlink[v] == st.indices[v].unwrap() {
            let mut component = Vec::new();
            loop {
                let w = st.stack.pop().unwrap();
                st.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            if component.len() >= 2 {
                st.result = Some(component);
            }
        }
    }

    let n = dag.operations.len();
    let mut state = State {
        dag,
        index_counter: 0,
        stack: Vec::new(),
        on_stack: vec![false; n],
        indices: vec![None; n],
        lowlink: vec![0; n],
        result: None,
    };

    for &v in subset {
        if state.result.is_some() {
            break;
        }
        if state.indices[v].is_none() {
            strongconnect(v, &mut state);
        }
    }

    state.result.unwrap_or_else(|| subset.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{Attributes, OperationId};

    fn mk(id: u32, kind: OperationKind, target: &str, references: Vec<&str>) -> Operation {
        Operation::new(OperationId(id), kind, target)
            .with_references(references.into_iter().map(String::from).collect())
            .with_attributes(Attributes::default())
    }

    #[test]
    fn foreign_key_depends_on_referenced_table_creation() {
        let ops = vec![
            mk(0, OperationKind::CreateTable, "users", vec![]),
            mk(1, OperationKind::CreateTable, "orders", vec![]),
            mk(2, OperationKind::AddForeignKey, "orders", vec!["users"]),
        ];
        let resolver = DependencyResolver::new();
        let dag = resolver.build(ops);
        let order = resolver.topological_order(&dag).unwrap();
        let pos = |id: u32| order.iter().position(|o| o.id == OperationId(id)).unwrap();
        assert!(pos(0) < pos(2));
        assert!(pos(1) < pos(2));
    }

    #[test]
    fn cycle_is_detected_and_reported() {
        let ops = vec![
            mk(0, OperationKind::AddForeignKey, "a", vec!["op:1"]),
            mk(1, OperationKind::AddForeignKey, "b", vec!["op:0"]),
        ];
        let resolver = DependencyResolver::new();
        let dag = resolver.build(ops);
        let err = resolver.topological_order(&dag).unwrap_err();
        match err {
            DependencyError::CircularDependency(mut ids) => {
                ids.sort();
                assert_eq!(ids, vec![OperationId(0), OperationId(1)]);
            }
        }
    }

    #[test]
    fn ties_broken_by_insertion_order() {
        let ops = vec![
            mk(5, OperationKind::CreateTable, "a", vec![]),
            mk(2, OperationKind::CreateTable, "b", vec![]),
            mk(9, OperationKind::CreateTable, "c", vec![]),
        ];
        let resolver = DependencyResolver::new();
        let dag = resolver.build(ops);
        let order = resolver.topological_order(&dag).unwrap();
        assert_eq!(
            order.iter().map(|o| o.id).collect::<Vec<_>>(),
            vec![OperationId(5), OperationId(2), OperationId(9)]
        );
    }

    #[test]
    fn backfill_swap_depends_on_backfill_marker() {
        let ops = vec![
            mk(0, OperationKind::Backfill, "orders", vec![]),
            mk(1, OperationKind::AlterColumnType, "orders", vec!["backfill:0"]),
        ];
        let resolver = DependencyResolver::new();
        let dag = resolver.build(ops);
        let order = resolver.topological_order(&dag).unwrap();
        assert_eq!(order[0].id, OperationId(0));
        assert_eq!(order[1].id, OperationId(1));
    }
}
