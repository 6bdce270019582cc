//! Modifier requires-closure: which modifiers must be active to satisfy a
//! user selection, and which become droppable when one is deselected.

use dson_asset_core::{resolve, AssetGraph, ResolutionContext};
use dson_api_core::{AssetId, DsonError, Issue, IssueList};
use log::warn;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// The requires edges between modifiers, keyed by modifier name. Directed:
/// an edge A -> B means A requires B.
#[derive(Debug, Clone, Default)]
pub struct RequiresGraph {
    requires: BTreeMap<String, BTreeSet<String>>,
}

/// Closure of a selection under requires edges.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClosureResult {
    /// User-selected modifiers.
    pub explicit: BTreeSet<String>,
    /// Pulled in only to satisfy a requirement.
    pub implied: BTreeSet<String>,
    /// How many active modifiers require each member of the closure.
    pub refcounts: BTreeMap<String, usize>,
    /// Cycles encountered while walking, as recoverable issues; the cycle
    /// members are excluded from the closure.
    pub issues: IssueList,
}

impl ClosureResult {
    pub fn active(&self) -> BTreeSet<String> {
        self.explicit.union(&self.implied).cloned().collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.explicit.contains(id) || self.implied.contains(id)
    }
}

impl RequiresGraph {
    pub fn new() -> RequiresGraph {
        RequiresGraph::default()
    }

    /// Register a modifier and the modifiers it requires.
    pub fn add(&mut self, id: impl Into<String>, requires: impl IntoIterator<Item = String>) {
        self.requires
            .entry(id.into())
            .or_default()
            .extend(requires);
    }

    pub fn requires_of(&self, id: &str) -> impl Iterator<Item = &str> {
        self.requires.get(id).into_iter().flatten().map(|s| s.as_str())
    }

    /// Build the graph from the modifiers of loaded assets. Requirement
    /// references are resolved against each modifier's owning asset; one
    /// that fails to resolve is skipped with a warning.
    pub fn from_assets(
        graph: &mut AssetGraph,
        ids: &[AssetId],
    ) -> Result<(RequiresGraph, IssueList), DsonError> {
        let mut result = RequiresGraph::new();
        let mut issues = IssueList::new();
        for id in ids {
            let asset = graph.load(id)?;
            let ctx = ResolutionContext::new(id.clone());
            let modifiers: Vec<(String, Vec<dson_api_core::Reference>)> = asset
                .modifiers
                .values()
                .map(|m| (m.id.clone(), m.requires.clone()))
                .collect();
            drop(asset);

            for (modifier_id, requires) in modifiers {
                let mut required = Vec::new();
                for reference in &requires {
                    match resolve(graph, reference, &ctx) {
                        Ok(target) => {
                            let name = match target {
                                dson_asset_core::Target::Node { node, .. } => node,
                                dson_asset_core::Target::Channel(key) => key.node,
                            };
                            required.push(name);
                        }
                        Err(e) => {
                            warn!("skipping requirement {reference} of {modifier_id}: {e}");
                            issues.push(Issue::from_error(&e, format!("{id}#{modifier_id}")));
                        }
                    }
                }
                result.add(modifier_id, required);
            }
        }
        Ok((result, issues))
    }

    /// Compute the closure of `selected` under requires edges. Each member
    /// is classified explicit or implied; a requires cycle is reported as a
    /// `CyclicDependency` issue naming the full cycle, and its members are
    /// dropped without affecting modifiers outside the cycle.
    pub fn resolve_closure(&self, selected: &BTreeSet<String>) -> ClosureResult {
        let mut issues = IssueList::new();
        let cyclic = self.cycle_members(selected, &mut issues);

        // A selected modifier that is also required elsewhere stays
        // explicit; the walk below never demotes it to implied.
        let explicit: BTreeSet<String> = selected
            .iter()
            .filter(|id| !cyclic.contains(*id))
            .cloned()
            .collect();
        let mut implied: BTreeSet<String> = BTreeSet::new();

        let mut queue: VecDeque<String> = explicit.iter().cloned().collect();
        let mut visited: BTreeSet<String> = explicit.clone();
        while let Some(id) = queue.pop_front() {
            for req in self.requires_of(&id) {
                if cyclic.contains(req) {
                    continue;
                }
                if visited.insert(req.to_string()) {
                    implied.insert(req.to_string());
                    queue.push_back(req.to_string());
                }
            }
        }

        let mut refcounts: BTreeMap<String, usize> = visited.iter().map(|id| (id.clone(), 0)).collect();
        for id in &visited {
            for req in self.requires_of(id) {
                if let Some(count) = refcounts.get_mut(req) {
                    *count += 1;
                }
            }
        }

        ClosureResult {
            explicit,
            implied,
            refcounts,
            issues,
        }
    }

    /// Which active modifiers become unneeded if `id` is deselected: the
    /// members of the current closure that the reduced selection no longer
    /// reaches.
    pub fn droppable_if_deselected(
        &self,
        current: &ClosureResult,
        id: &str,
    ) -> BTreeSet<String> {
        if !current.explicit.contains(id) {
            return BTreeSet::new();
        }
        let mut reduced = current.explicit.clone();
        reduced.remove(id);
        let after = self.resolve_closure(&reduced);
        current
            .active()
            .difference(&after.active())
            .cloned()
            .collect()
    }

    /// Modifiers reachable from `selected` that sit on a requires cycle.
    /// Pushes one `CyclicDependency` issue per cycle found.
    fn cycle_members(&self, selected: &BTreeSet<String>, issues: &mut IssueList) -> BTreeSet<String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: BTreeMap<String, Mark> = BTreeMap::new();
        let mut cyclic: BTreeSet<String> = BTreeSet::new();

        fn visit(
            graph: &RequiresGraph,
            id: &str,
            marks: &mut BTreeMap<String, Mark>,
            path: &mut Vec<String>,
            cyclic: &mut BTreeSet<String>,
            issues: &mut IssueList,
        ) {
            match marks.get(id) {
                Some(Mark::Done) => return,
                Some(Mark::Visiting) => {
                    // Back edge: everything from the first occurrence of
                    // `id` on the path forms the cycle.
                    let start = path.iter().position(|p| p == id).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].to_vec();
                    cycle.push(id.to_string());
                    for member in &cycle {
                        cyclic.insert(member.clone());
                    }
                    issues.push(Issue::from_error(
                        &DsonError::CyclicDependency { cycle },
                        "requires",
                    ));
                    return;
                }
                None => {}
            }
            marks.insert(id.to_string(), Mark::Visiting);
            path.push(id.to_string());
            for req in graph.requires_of(id) {
                visit(graph, req, marks, path, cyclic, issues);
            }
            path.pop();
            marks.insert(id.to_string(), Mark::Done);
        }

        for id in selected {
            let mut path = Vec::new();
            visit(self, id, &mut marks, &mut path, &mut cyclic, issues);
        }
        cyclic
    }
}
