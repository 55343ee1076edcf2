//! Types for the graph engine.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::analysis;
use crate::error::{Error, Result};

/// Position of a unit in the graph, in the order units were added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct UnitIndex(pub(crate) usize);

impl UnitIndex {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for UnitIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unit_{}", self.0)
    }
}

/// What the graph needs to know about a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitInfo {
    /// Display name (for a notebook cell, its label or position).
    pub name: String,
    /// Names the unit binds at module scope.
    pub definitions: Vec<String>,
    /// Names the unit reads from the shared namespace.
    pub references: Vec<String>,
}

impl UnitInfo {
    pub fn new(name: impl Into<String>, definitions: Vec<String>, references: Vec<String>) -> Self {
        Self {
            name: name.into(),
            definitions,
            references,
        }
    }

    /// Describe a unit by analyzing its source.
    pub fn from_source(name: impl Into<String>, source: &str) -> Self {
        let info = analysis::analyze(source);
        Self::new(name, info.definitions, info.references)
    }
}

/// The reactive dependency graph engine.
pub struct GraphEngine {
    /// The directed graph: edges go from definer to reader
    graph: DiGraph<UnitIndex, ()>,
    /// Units in insertion order; `UnitIndex` indexes this.
    units: Vec<UnitInfo>,
    node_indices: Vec<NodeIndex>,
    /// Name to defining units, in insertion order
    definers: FxHashMap<String, Vec<UnitIndex>>,
    /// References no unit defines, per unit
    unresolved: FxHashMap<UnitIndex, Vec<String>>,
}

impl GraphEngine {
    /// Create a new empty graph engine.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            units: Vec::new(),
            node_indices: Vec::new(),
            definers: FxHashMap::default(),
            unresolved: FxHashMap::default(),
        }
    }

    /// Add a unit to the graph (first pass: collect units).
    pub fn add_unit(&mut self, unit: UnitInfo) -> UnitIndex {
        let id = UnitIndex::new(self.units.len());
        self.node_indices.push(self.graph.add_node(id));
        for name in &unit.definitions {
            self.definers.entry(name.clone()).or_default().push(id);
        }
        self.units.push(unit);
        id
    }

    /// Build edges (second pass) and check for cycles.
    ///
    /// A reference is wired to the latest unit before the reader that
    /// defines the name. With no earlier definer, the first later one is
    /// used, which is how a read-before-define shows up as a cycle.
    /// References nobody defines are recorded, not rejected: they may be
    /// bound by earlier sessions or come from built-in modules.
    pub fn resolve_dependencies(&mut self) -> Result<()> {
        self.graph.clear_edges();

        let mut edges_to_add = Vec::new();
        let mut unresolved: FxHashMap<UnitIndex, Vec<String>> = FxHashMap::default();
        for (index, unit) in self.units.iter().enumerate() {
            let reader = UnitIndex::new(index);
            for name in &unit.references {
                match self.definer_for(name, reader) {
                    Some(definer) => edges_to_add.push((definer, reader)),
                    None => unresolved.entry(reader).or_default().push(name.clone()),
                }
            }
        }
        self.unresolved = unresolved;

        for (definer, reader) in edges_to_add {
            self.graph
                .update_edge(self.node_indices[definer.0], self.node_indices[reader.0], ());
        }

        self.detect_cycles()
    }

    fn definer_for(&self, name: &str, reader: UnitIndex) -> Option<UnitIndex> {
        let definers = self.definers.get(name)?;
        definers
            .iter()
            .rev()
            .find(|&&definer| definer < reader)
            .or_else(|| definers.iter().find(|&&definer| definer > reader))
            .copied()
    }

    /// Detect cycles in the graph and return a helpful error message.
    fn detect_cycles(&self) -> Result<()> {
        use petgraph::algo::kosaraju_scc;

        for mut scc in kosaraju_scc(&self.graph) {
            if scc.len() > 1 {
                scc.sort();
                let cycle_names: Vec<&str> = scc
                    .iter()
                    .map(|&idx| self.units[self.graph[idx].0].name.as_str())
                    .collect();

                return Err(Error::CyclicDependency(format!(
                    "{} → {}",
                    cycle_names.join(" → "),
                    cycle_names[0]
                )));
            }
        }

        Ok(())
    }

    /// Units in dependency order; ties keep insertion order.
    pub fn topological_order(&self) -> Result<Vec<UnitIndex>> {
        let mut in_degree: Vec<usize> = self
            .node_indices
            .iter()
            .map(|&idx| self.graph.neighbors_directed(idx, Direction::Incoming).count())
            .collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(index, _)| Reverse(index))
            .collect();

        let mut order = Vec::with_capacity(self.units.len());
        while let Some(Reverse(index)) = ready.pop() {
            order.push(UnitIndex::new(index));
            for next in self.graph.neighbors(self.node_indices[index]) {
                let next = self.graph[next].0;
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() < self.units.len() {
            let stuck = in_degree
                .iter()
                .position(|&degree| degree > 0)
                .map_or("?", |index| self.units[index].name.as_str());
            return Err(Error::CyclicDependency(format!("cycle detected at unit '{stuck}'")));
        }
        Ok(order)
    }

    /// Units that need re-execution when `changed` is modified.
    ///
    /// Returns the changed unit plus all its transitive dependents,
    /// in topological order.
    pub fn invalidated_units(&self, changed: UnitIndex) -> Vec<UnitIndex> {
        let Some(&start) = self.node_indices.get(changed.0) else {
            return Vec::new();
        };
        let mut invalidated = FxHashSet::from_iter([changed]);
        let mut queue = VecDeque::from([start]);

        while let Some(node_idx) = queue.pop_front() {
            for neighbor_idx in self.graph.neighbors(node_idx) {
                if invalidated.insert(self.graph[neighbor_idx]) {
                    queue.push_back(neighbor_idx);
                }
            }
        }

        self.topological_order()
            .unwrap_or_default()
            .into_iter()
            .filter(|unit| invalidated.contains(unit))
            .collect()
    }

    /// Group units by dependency level.
    ///
    /// Units in the same level do not read each other's names.
    pub fn topological_levels(&self) -> Vec<Vec<UnitIndex>> {
        let mut level_of: Vec<Option<usize>> = vec![None; self.units.len()];
        let mut levels: Vec<Vec<UnitIndex>> = Vec::new();
        for unit in self.topological_order().unwrap_or_default() {
            let level = self
                .dependencies(unit)
                .iter()
                .filter_map(|dep| level_of[dep.0])
                .map(|level| level + 1)
                .max()
                .unwrap_or(0);
            level_of[unit.0] = Some(level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(unit);
        }
        levels
    }

    /// Get a unit by index.
    pub fn get_unit(&self, id: UnitIndex) -> Option<&UnitInfo> {
        self.units.get(id.0)
    }

    /// Find a unit by display name.
    pub fn find(&self, name: &str) -> Result<UnitIndex> {
        self.units
            .iter()
            .position(|unit| unit.name == name)
            .map(UnitIndex::new)
            .ok_or_else(|| Error::UnitNotFound(name.to_string()))
    }

    /// Get all units in insertion order.
    pub fn units(&self) -> impl Iterator<Item = (UnitIndex, &UnitInfo)> {
        self.units
            .iter()
            .enumerate()
            .map(|(index, unit)| (UnitIndex::new(index), unit))
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// References of `id` that no unit defines.
    pub fn unresolved(&self, id: UnitIndex) -> &[String] {
        self.unresolved.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Direct dependencies of a unit, in insertion order.
    pub fn dependencies(&self, id: UnitIndex) -> Vec<UnitIndex> {
        self.adjacent(id, Direction::Incoming)
    }

    /// Direct dependents of a unit (units that read its names).
    pub fn dependents(&self, id: UnitIndex) -> Vec<UnitIndex> {
        self.adjacent(id, Direction::Outgoing)
    }

    fn adjacent(&self, id: UnitIndex, direction: Direction) -> Vec<UnitIndex> {
        let Some(&idx) = self.node_indices.get(id.0) else {
            return Vec::new();
        };
        let mut units: Vec<UnitIndex> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|neighbor_idx| self.graph[neighbor_idx])
            .collect();
        units.sort();
        units
    }
}

impl Default for GraphEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_unit(name: &str, defs: &[&str], refs: &[&str]) -> UnitInfo {
        let owned = |names: &[&str]| names.iter().map(|n| n.to_string()).collect();
        UnitInfo::new(name, owned(defs), owned(refs))
    }

    fn names(graph: &GraphEngine, units: &[UnitIndex]) -> Vec<String> {
        units
            .iter()
            .map(|id| graph.get_unit(*id).unwrap().name.clone())
            .collect()
    }

    #[test]
    fn test_empty_graph() {
        let graph = GraphEngine::new();
        assert!(graph.is_empty());
        assert_eq!(graph.len(), 0);
        assert!(graph.topological_order().unwrap().is_empty());
    }

    #[test]
    fn test_add_unit() {
        let mut graph = GraphEngine::new();
        let id = graph.add_unit(make_unit("foo", &["x"], &[]));
        assert_eq!(graph.len(), 1);
        assert!(graph.get_unit(id).is_some());
        assert_eq!(graph.find("foo").unwrap(), id);
        assert!(matches!(graph.find("bar"), Err(Error::UnitNotFound(_))));
    }

    #[test]
    fn test_linear_dependencies() {
        let mut graph = GraphEngine::new();
        graph.add_unit(make_unit("c", &["z"], &["y"]));
        graph.add_unit(make_unit("a", &["x"], &[]));
        graph.add_unit(make_unit("b", &["y"], &["x"]));
        graph.resolve_dependencies().unwrap();

        let order = graph.topological_order().unwrap();
        assert_eq!(names(&graph, &order), ["a", "b", "c"]);
    }

    #[test]
    fn test_diamond_dependencies() {
        let mut graph = GraphEngine::new();
        let a = graph.add_unit(make_unit("a", &["x"], &[]));
        let b = graph.add_unit(make_unit("b", &["y"], &["x"]));
        let c = graph.add_unit(make_unit("c", &["z"], &["x"]));
        let d = graph.add_unit(make_unit("d", &[], &["y", "z"]));
        graph.resolve_dependencies().unwrap();

        assert_eq!(graph.topological_order().unwrap(), [a, b, c, d]);
        assert_eq!(graph.dependencies(d), [b, c]);
        assert_eq!(graph.dependents(a), [b, c]);
        assert_eq!(graph.topological_levels(), [vec![a], vec![b, c], vec![d]]);
    }

    #[test]
    fn test_latest_earlier_definer_wins() {
        let mut graph = GraphEngine::new();
        graph.add_unit(make_unit("first", &["x"], &[]));
        let second = graph.add_unit(make_unit("second", &["x"], &[]));
        let reader = graph.add_unit(make_unit("reader", &[], &["x"]));
        graph.add_unit(make_unit("later", &["x"], &[]));
        graph.resolve_dependencies().unwrap();

        assert_eq!(graph.dependencies(reader), [second]);
    }

    #[test]
    fn test_cycle_detection() {
        let mut graph = GraphEngine::new();
        graph.add_unit(make_unit("a", &["x"], &["y"]));
        graph.add_unit(make_unit("b", &["y"], &["x"]));

        let err = graph.resolve_dependencies().unwrap_err();
        assert!(matches!(err, Error::CyclicDependency(ref m) if m == "a → b → a"));
        assert!(graph.topological_order().is_err());
    }

    #[test]
    fn test_invalidated_units() {
        let mut graph = GraphEngine::new();
        let a = graph.add_unit(make_unit("a", &["x"], &[]));
        let b = graph.add_unit(make_unit("b", &["y"], &["x"]));
        let c = graph.add_unit(make_unit("c", &["z"], &["y"]));
        let d = graph.add_unit(make_unit("d", &["w"], &[]));
        graph.resolve_dependencies().unwrap();

        assert_eq!(graph.invalidated_units(a), [a, b, c]);
        assert_eq!(graph.invalidated_units(d), [d]);
        assert!(graph.invalidated_units(UnitIndex::new(9)).is_empty());
    }

    #[test]
    fn test_unresolved_references_are_recorded() {
        let mut graph = GraphEngine::new();
        let a = graph.add_unit(make_unit("a", &["x"], &["math_helper"]));
        graph.resolve_dependencies().unwrap();
        assert_eq!(graph.unresolved(a), ["math_helper"]);
    }

    #[test]
    fn test_units_from_source() {
        let mut graph = GraphEngine::new();
        let a = graph.add_unit(UnitInfo::from_source("a", "x = 1"));
        let b = graph.add_unit(UnitInfo::from_source("b", "y = x * 2"));
        graph.resolve_dependencies().unwrap();
        assert_eq!(graph.dependents(a), [b]);
    }
}
