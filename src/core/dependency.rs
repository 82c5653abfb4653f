//! Dependency-graph validation for cross-task contracts.
//!
//! The manager holds one loaded contract set at a time. `load_contracts`
//! replaces it wholesale; there is no incremental update. Cycle search is an
//! explicit-stack depth-first walk, so graph depth never grows the call stack.

use crate::core::model::{DependencyContract, RelationshipKind, Task};
use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

/// `to` is scheduled before the `from` it waits on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChronologicalViolation {
    pub dependent: String,
    pub dependency: String,
    pub kind: RelationshipKind,
    pub dependent_date: DateTime<Utc>,
    pub dependency_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DependencyReport {
    pub cycles: Vec<Vec<String>>,
    pub violations: Vec<ChronologicalViolation>,
}

impl DependencyReport {
    pub fn is_acyclic(&self) -> bool {
        self.cycles.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.cycles.is_empty() && self.violations.is_empty()
    }
}

#[derive(Debug, Default, Clone)]
pub struct DependencyManager {
    /// Load order, used for deterministic traversal.
    contracts: Vec<DependencyContract>,
    /// (from, to) -> indices into `contracts`.
    by_pair: FxHashMap<(String, String), Vec<usize>>,
}

struct Frame {
    node: String,
    cursor: usize,
}

impl DependencyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the loaded set. Contracts sharing a pair are all kept.
    pub fn load_contracts(&mut self, contracts: Vec<DependencyContract>) {
        self.by_pair.clear();
        for (idx, contract) in contracts.iter().enumerate() {
            self.by_pair.entry(contract.key()).or_default().push(idx);
        }
        self.contracts = contracts;
    }

    pub fn contracts(&self) -> &[DependencyContract] {
        &self.contracts
    }

    pub fn contracts_between(&self, from: &str, to: &str) -> Vec<&DependencyContract> {
        self.by_pair
            .get(&(from.to_string(), to.to_string()))
            .map(|idxs| idxs.iter().map(|&i| &self.contracts[i]).collect())
            .unwrap_or_default()
    }

    /// `from -> [to, ...]`, targets in first-seen contract order, deduplicated.
    fn adjacency(&self) -> FxHashMap<&str, Vec<&str>> {
        let mut adjacency: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
        for contract in &self.contracts {
            let targets = adjacency.entry(contract.from.as_str()).or_default();
            if !targets.contains(&contract.to.as_str()) {
                targets.push(contract.to.as_str());
            }
        }
        adjacency
    }

    /// Each cycle is the active path from the revisited node's first
    /// occurrence to the point where the back edge was found. Roots are tried
    /// in `task_ids` order, edges in contract order.
    pub fn detect_cycles(&self, task_ids: &[String]) -> Vec<Vec<String>> {
        let adjacency = self.adjacency();
        let mut visited: FxHashSet<String> = FxHashSet::default();
        let mut cycles = Vec::new();

        for root in task_ids {
            if visited.contains(root) {
                continue;
            }
            visited.insert(root.clone());

            let mut path: Vec<String> = vec![root.clone()];
            let mut on_path: FxHashMap<String, usize> = FxHashMap::default();
            on_path.insert(root.clone(), 0);
            let mut stack = vec![Frame {
                node: root.clone(),
                cursor: 0,
            }];

            while let Some(frame) = stack.last_mut() {
                let next = adjacency
                    .get(frame.node.as_str())
                    .and_then(|targets| targets.get(frame.cursor))
                    .map(|t| t.to_string());
                frame.cursor += 1;

                match next {
                    Some(next) => {
                        if let Some(&start) = on_path.get(&next) {
                            cycles.push(path[start..].to_vec());
                        } else if visited.insert(next.clone()) {
                            on_path.insert(next.clone(), path.len());
                            path.push(next.clone());
                            stack.push(Frame {
                                node: next,
                                cursor: 0,
                            });
                        }
                    }
                    None => {
                        if let Some(done) = stack.pop() {
                            on_path.remove(&done.node);
                            path.pop();
                        }
                    }
                }
            }
        }
        cycles
    }

    /// Flags every contract whose `to` task is due before its `from` task.
    /// Contracts naming tasks absent from `tasks` are skipped.
    pub fn validate_chronological_order(&self, tasks: &[Task]) -> Vec<ChronologicalViolation> {
        let by_id: FxHashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let mut violations = Vec::new();
        for contract in &self.contracts {
            let (Some(from), Some(to)) = (
                by_id.get(contract.from.as_str()),
                by_id.get(contract.to.as_str()),
            ) else {
                continue;
            };
            let dependency_date = from.effective_date();
            let dependent_date = to.effective_date();
            if dependent_date < dependency_date {
                violations.push(ChronologicalViolation {
                    dependent: to.id.clone(),
                    dependency: from.id.clone(),
                    kind: contract.kind,
                    dependent_date,
                    dependency_date,
                });
            }
        }
        violations
    }

    /// Tasks that `task_id` blocks (`to` where `from == task_id`).
    pub fn get_blocked_tasks(&self, task_id: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for c in self.contracts.iter().filter(|c| c.from == task_id) {
            if !out.contains(&c.to) {
                out.push(c.to.clone());
            }
        }
        out
    }

    /// Tasks that `task_id` waits on (`from` where `to == task_id`).
    pub fn get_dependencies(&self, task_id: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for c in self.contracts.iter().filter(|c| c.to == task_id) {
            if !out.contains(&c.from) {
                out.push(c.from.clone());
            }
        }
        out
    }

    /// Cycles over every known id (tasks first, then contract endpoints)
    /// plus chronological violations.
    pub fn validate(&self, tasks: &[Task]) -> DependencyReport {
        let mut ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
        let mut seen: FxHashSet<String> = ids.iter().cloned().collect();
        for c in &self.contracts {
            for id in [&c.from, &c.to] {
                if seen.insert(id.clone()) {
                    ids.push(id.clone());
                }
            }
        }
        DependencyReport {
            cycles: self.detect_cycles(&ids),
            violations: self.validate_chronological_order(tasks),
        }
    }
}
