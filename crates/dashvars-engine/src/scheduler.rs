use super::graph::{DependencyGraph, NodeId};
use rustc_hash::{FxHashMap, FxHashSet};

pub struct Scheduler<'a> {
    graph: &'a DependencyGraph,
}

/// Nodes that can be resolved concurrently: every dependency they have
/// inside the scheduled set sits in an earlier layer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Layer {
    pub nodes: Vec<NodeId>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub layers: Vec<Layer>,
    pub cycles: Vec<Vec<NodeId>>,
}

impl Schedule {
    /// All scheduled (acyclic) nodes, layer by layer.
    pub fn ordered(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.layers.iter().flat_map(|l| l.nodes.iter().copied())
    }

    pub fn cyclic_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.cycles.iter().flatten().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty() && self.cycles.is_empty()
    }
}

impl<'a> Scheduler<'a> {
    pub fn new(graph: &'a DependencyGraph) -> Self {
        Self { graph }
    }

    /// Plan `nodes`, considering only edges between members of `nodes`.
    pub fn create_schedule(&self, nodes: &[NodeId]) -> Schedule {
        let members: FxHashSet<NodeId> = nodes.iter().copied().collect();

        // 1. Find strongly connected components using Tarjan's algorithm
        let sccs = self.tarjan_scc(nodes, &members);

        // 2. Separate cyclic from acyclic components
        let (cycles, acyclic_sccs) = self.separate_cycles(sccs);

        // 3. Topologically sort acyclic components into layers
        let layers = self.build_layers(acyclic_sccs, &members);

        Schedule { layers, cycles }
    }

    fn in_scope<'m>(
        &'m self,
        node: NodeId,
        members: &'m FxHashSet<NodeId>,
    ) -> impl Iterator<Item = NodeId> + 'm {
        self.graph
            .node(node)
            .into_iter()
            .flat_map(|n| n.dependencies.iter().copied())
            .filter(move |d| members.contains(d))
    }

    /// Tarjan's strongly connected components algorithm
    pub fn tarjan_scc(&self, nodes: &[NodeId], members: &FxHashSet<NodeId>) -> Vec<Vec<NodeId>> {
        let mut index_counter = 0;
        let mut stack = Vec::new();
        let mut indices = FxHashMap::default();
        let mut lowlinks = FxHashMap::default();
        let mut on_stack = FxHashSet::default();
        let mut sccs = Vec::new();

        for &node in nodes {
            if !indices.contains_key(&node) {
                self.tarjan_visit(
                    node,
                    members,
                    &mut index_counter,
                    &mut stack,
                    &mut indices,
                    &mut lowlinks,
                    &mut on_stack,
                    &mut sccs,
                );
            }
        }

        sccs
    }

    fn tarjan_visit(
        &self,
        node: NodeId,
        members: &FxHashSet<NodeId>,
        index_counter: &mut usize,
        stack: &mut Vec<NodeId>,
        indices: &mut FxHashMap<NodeId, usize>,
        lowlinks: &mut FxHashMap<NodeId, usize>,
        on_stack: &mut FxHashSet<NodeId>,
        sccs: &mut Vec<Vec<NodeId>>,
    ) {
        indices.insert(node, *index_counter);
        lowlinks.insert(node, *index_counter);
        *index_counter += 1;
        stack.push(node);
        on_stack.insert(node);

        let dependencies: Vec<NodeId> = self.in_scope(node, members).collect();
        for dependency in dependencies {
            if !indices.contains_key(&dependency) {
                self.tarjan_visit(
                    dependency,
                    members,
                    index_counter,
                    stack,
                    indices,
                    lowlinks,
                    on_stack,
                    sccs,
                );
                let dep_lowlink = lowlinks[&dependency];
                lowlinks.insert(node, lowlinks[&node].min(dep_lowlink));
            } else if on_stack.contains(&dependency) {
                let dep_index = indices[&dependency];
                lowlinks.insert(node, lowlinks[&node].min(dep_index));
            }
            // not on the stack: a cross edge into a finished component
        }

        if lowlinks[&node] == indices[&node] {
            let mut scc = Vec::new();
            while let Some(w) = stack.pop() {
                on_stack.remove(&w);
                scc.push(w);
                if w == node {
                    break;
                }
            }
            scc.sort();
            sccs.push(scc);
        }
    }

    fn separate_cycles(&self, sccs: Vec<Vec<NodeId>>) -> (Vec<Vec<NodeId>>, Vec<Vec<NodeId>>) {
        let mut cycles = Vec::new();
        let mut acyclic = Vec::new();

        for scc in sccs {
            if scc.len() > 1 || (scc.len() == 1 && self.has_self_loop(scc[0])) {
                cycles.push(scc);
            } else {
                acyclic.push(scc);
            }
        }

        (cycles, acyclic)
    }

    fn has_self_loop(&self, node: NodeId) -> bool {
        self.graph
            .node(node)
            .is_some_and(|n| n.dependencies.contains(&node))
    }

    /// Kahn's algorithm over the acyclic nodes. Edges into cyclic nodes are
    /// ignored, so dependents of a cycle still get scheduled.
    fn build_layers(&self, acyclic_sccs: Vec<Vec<NodeId>>, members: &FxHashSet<NodeId>) -> Vec<Layer> {
        let acyclic: FxHashSet<NodeId> = acyclic_sccs.into_iter().flatten().collect();
        if acyclic.is_empty() {
            return Vec::new();
        }

        let mut in_degree: FxHashMap<NodeId, usize> = FxHashMap::default();
        let mut dependents: FxHashMap<NodeId, Vec<NodeId>> = FxHashMap::default();
        for &node in &acyclic {
            let deps: Vec<NodeId> = self
                .in_scope(node, members)
                .filter(|d| acyclic.contains(d))
                .collect();
            in_degree.insert(node, deps.len());
            for dep in deps {
                dependents.entry(dep).or_default().push(node);
            }
        }

        let mut current: Vec<NodeId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(&node, _)| node)
            .collect();
        current.sort();

        let mut layers = Vec::new();
        while !current.is_empty() {
            let mut next = Vec::new();
            for node in &current {
                for &dependent in dependents.get(node).map(Vec::as_slice).unwrap_or_default() {
                    if let Some(degree) = in_degree.get_mut(&dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(dependent);
                        }
                    }
                }
            }
            next.sort();
            layers.push(Layer { nodes: current });
            current = next;
        }

        layers
    }
}
