//! The module dependency graph.
//!
//! Built once per run from the resolved project and passed by reference to
//! the orchestrator; nothing about it is global.

use std::collections::{BTreeSet, HashMap};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use weft_config::{ConfigError, ResolvedModule, ResolvedProject};

/// Modules as nodes, `dependency -> dependent` as edges.
#[derive(Debug)]
pub struct ModuleGraph<'a> {
    graph: DiGraph<&'a ResolvedModule, ()>,
    index: HashMap<&'a str, NodeIndex>,
    order: Vec<NodeIndex>,
}

impl<'a> ModuleGraph<'a> {
    /// Builds the graph for every module of `project`.
    pub fn from_project(project: &'a ResolvedProject) -> Result<Self, ConfigError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for module in &project.modules {
            index.insert(module.name.as_str(), graph.add_node(module));
        }
        for module in &project.modules {
            let to = index[module.name.as_str()];
            for dep in &module.depends_on {
                let from = *index
                    .get(dep.as_str())
                    .ok_or_else(|| ConfigError::UnknownModule(dep.clone()))?;
                graph.add_edge(from, to, ());
            }
        }
        let mut order = toposort(&graph, None).map_err(|cycle| {
            ConfigError::DependencyCycle(graph[cycle.node_id()].name.clone())
        })?;
        // Ties are broken by module name so runs are reproducible.
        order = stable_order(&graph, order);
        Ok(Self {
            graph,
            index,
            order,
        })
    }

    /// Number of modules.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns `true` if the project has no modules.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Looks up a module by name.
    pub fn module(&self, name: &str) -> Option<&'a ResolvedModule> {
        self.index.get(name).map(|&i| self.graph[i])
    }

    /// Every module, dependencies before dependents.
    pub fn topological(&self) -> Vec<&'a ResolvedModule> {
        self.order.iter().map(|&i| self.graph[i]).collect()
    }

    /// Direct dependencies of `name`.
    pub fn dependencies(&self, name: &str) -> Vec<&'a ResolvedModule> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Modules that directly depend on `name`.
    pub fn dependents(&self, name: &str) -> Vec<&'a ResolvedModule> {
        self.neighbors(name, Direction::Outgoing)
    }

    fn neighbors(&self, name: &str, dir: Direction) -> Vec<&'a ResolvedModule> {
        let Some(&i) = self.index.get(name) else {
            return Vec::new();
        };
        let mut out: Vec<&'a ResolvedModule> =
            self.graph.neighbors_directed(i, dir).map(|n| self.graph[n]).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// `names` plus everything they transitively depend on, in topological
    /// order. An empty selection means every module.
    pub fn closure(&self, names: &[String]) -> Result<Vec<&'a ResolvedModule>, ConfigError> {
        if names.is_empty() {
            return Ok(self.topological());
        }
        let mut selected = BTreeSet::new();
        let mut stack = Vec::new();
        for name in names {
            let i = *self
                .index
                .get(name.as_str())
                .ok_or_else(|| ConfigError::UnknownModule(name.clone()))?;
            stack.push(i);
        }
        while let Some(i) = stack.pop() {
            if selected.insert(i) {
                stack.extend(self.graph.neighbors_directed(i, Direction::Incoming));
            }
        }
        Ok(self
            .order
            .iter()
            .filter(|i| selected.contains(i))
            .map(|&i| self.graph[i])
            .collect())
    }
}

/// Kahn's algorithm taking the lowest ready node index first. Modules are
/// added in name order, so ties resolve alphabetically.
fn stable_order(graph: &DiGraph<&ResolvedModule, ()>, fallback: Vec<NodeIndex>) -> Vec<NodeIndex> {
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();
    let mut ready: BTreeSet<NodeIndex> = graph
        .node_indices()
        .filter(|n| in_degree[n.index()] == 0)
        .collect();
    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(n) = ready.pop_first() {
        order.push(n);
        for next in graph.neighbors_directed(n, Direction::Outgoing) {
            in_degree[next.index()] -= 1;
            if in_degree[next.index()] == 0 {
                ready.insert(next);
            }
        }
    }
    if order.len() == graph.node_count() {
        order
    } else {
        fallback
    }
}
