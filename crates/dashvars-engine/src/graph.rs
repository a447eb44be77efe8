//! Dependency graph over variable names.
//!
//! An edge `A -> B` means A's definition references B. Nodes are created for
//! every variable before any edge is added, so edge construction never has to
//! deal with unknown names; references to undeclared variables are dropped.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::scheduler::{Schedule, Scheduler};
use crate::variable::Variable;

/// Engine-internal node identity (index into the node arena, declaration
/// order).
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    pub(crate) fn as_index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    /// Nodes this one references.
    pub dependencies: SmallVec<[NodeId; 4]>,
    /// Nodes referencing this one.
    pub dependents: SmallVec<[NodeId; 4]>,
}

#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    index: FxHashMap<String, NodeId>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph for `variables`: nodes first, then one edge per
    /// ordered pair `(a, b)` with `a.depends_on(b)`.
    pub fn from_variables(variables: &[Variable]) -> Self {
        let mut graph = Self::new();
        for variable in variables {
            graph.create_node(variable.name());
        }
        for variable in variables {
            let Some(from) = graph.node_id(variable.name()) else {
                continue;
            };
            for name in variable.referenced_names() {
                if name == variable.name() {
                    continue;
                }
                if let Some(to) = graph.node_id(&name) {
                    graph.link(from, to);
                }
            }
        }
        graph
    }

    /// Get or create the node for `name`.
    pub fn create_node(&mut self, name: &str) -> NodeId {
        if let Some(&id) = self.index.get(name) {
            return id;
        }
        let id = NodeId::new(self.nodes.len() as u32);
        self.nodes.push(Node {
            name: name.to_string(),
            dependencies: SmallVec::new(),
            dependents: SmallVec::new(),
        });
        self.index.insert(name.to_string(), id);
        id
    }

    /// Record that `dependent` references `dependency`.
    pub fn link(&mut self, dependent: NodeId, dependency: NodeId) {
        let deps = &mut self.nodes[dependent.as_index()].dependencies;
        if deps.contains(&dependency) {
            return;
        }
        deps.push(dependency);
        self.nodes[dependency.as_index()].dependents.push(dependent);
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.as_index())
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        (0..self.nodes.len() as u32).map(NodeId::new).collect()
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.nodes[id.as_index()].name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn names(&self, ids: &[NodeId]) -> Vec<&str> {
        ids.iter().map(|&id| self.name(id)).collect()
    }

    /// Variables `name` references (what it waits on during init).
    pub fn neighbors(&self, name: &str) -> Vec<&str> {
        self.node_id(name)
            .map(|id| self.names(&self.nodes[id.as_index()].dependencies))
            .unwrap_or_default()
    }

    /// Variables referencing `name` directly.
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.node_id(name)
            .map(|id| self.names(&self.nodes[id.as_index()].dependents))
            .unwrap_or_default()
    }

    /// Every node reachable from `start` through dependents, excluding
    /// `start`. Each node appears once; cycles are walked safely.
    pub fn transitive_dependents(&self, start: NodeId) -> Vec<NodeId> {
        let mut visited = FxHashSet::default();
        let mut stack = vec![start];
        let mut out = Vec::new();
        visited.insert(start);
        while let Some(id) = stack.pop() {
            for &dependent in &self.nodes[id.as_index()].dependents {
                if visited.insert(dependent) {
                    out.push(dependent);
                    stack.push(dependent);
                }
            }
        }
        out.sort();
        out
    }

    /// Direct dependents of `name` that are not also reachable through
    /// another dependent. These are the variables that must be refreshed
    /// first after `name` changes; everything else follows from them.
    pub fn optimized_input_edges(&self, name: &str) -> Vec<&str> {
        let Some(id) = self.node_id(name) else {
            return Vec::new();
        };
        let direct = &self.nodes[id.as_index()].dependents;
        let mut reachable_via_other = FxHashSet::default();
        for &dependent in direct {
            for indirect in self.transitive_dependents(dependent) {
                if indirect != dependent {
                    reachable_via_other.insert(indirect);
                }
            }
        }
        let mut kept: Vec<NodeId> = direct
            .iter()
            .copied()
            .filter(|d| *d != id && !reachable_via_other.contains(d))
            .collect();
        kept.sort();
        self.names(&kept)
    }

    /// Layered plan for refreshing everything downstream of `names`; the
    /// named variables themselves are left out.
    pub fn cascade_schedule<'n, I>(&self, names: I) -> Schedule
    where
        I: IntoIterator<Item = &'n str>,
    {
        let seeds: FxHashSet<NodeId> = names.into_iter().filter_map(|n| self.node_id(n)).collect();
        let mut closure = FxHashSet::default();
        for &seed in &seeds {
            closure.extend(self.transitive_dependents(seed));
        }
        let mut ids: Vec<NodeId> = closure.into_iter().filter(|n| !seeds.contains(n)).collect();
        ids.sort();
        Scheduler::new(self).create_schedule(&ids)
    }

    /// Layered plan for `names` plus everything downstream of them.
    pub fn refresh_schedule<'n, I>(&self, names: I) -> Schedule
    where
        I: IntoIterator<Item = &'n str>,
    {
        let mut set = FxHashSet::default();
        for name in names {
            if let Some(id) = self.node_id(name) {
                set.insert(id);
                set.extend(self.transitive_dependents(id));
            }
        }
        let mut ids: Vec<NodeId> = set.into_iter().collect();
        ids.sort();
        Scheduler::new(self).create_schedule(&ids)
    }

    /// Plan for initializing every variable.
    pub fn init_schedule(&self) -> Schedule {
        Scheduler::new(self).create_schedule(&self.node_ids())
    }
}
