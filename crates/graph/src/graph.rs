//! Build graph construction and queries using petgraph.
//!
//! Packages are collected by a [`GraphBuilder`]; [`GraphBuilder::build`]
//! links dependency edges and rejects cycles once, producing an immutable
//! [`BuildGraph`]. Edges point from a dependency to its dependent.

use crate::cycle::find_cycle;
use crate::{Error, Label, Package, Result, Target};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Collects packages before the graph is linked.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    packages: BTreeSet<String>,
    targets: Vec<Target>,
    labels: HashSet<Label>,
}

impl GraphBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a package's targets.
    ///
    /// The package is rejected as a whole if any of its labels collide, so a
    /// failed call leaves the builder unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicatePackage`] if the package path was already
    /// added and [`Error::DuplicateLabel`] if a label collides.
    pub fn add_package(&mut self, package: Package) -> Result<()> {
        if self.packages.contains(package.path()) {
            return Err(Error::DuplicatePackage {
                path: package.path().to_string(),
            });
        }

        let mut seen = HashSet::new();
        for target in package.targets() {
            if self.labels.contains(&target.label) || !seen.insert(&target.label) {
                return Err(Error::DuplicateLabel {
                    label: target.label.clone(),
                });
            }
        }

        debug!(
            package = %package.path(),
            targets = package.targets().len(),
            "Added package"
        );
        self.packages.insert(package.path().to_string());
        for target in package.into_targets() {
            self.labels.insert(target.label.clone());
            self.targets.push(target);
        }
        Ok(())
    }

    /// Link dependency edges and check the graph for cycles.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedDependency`] if any dependency label is not
    /// in the graph and [`Error::CycleDetected`] if the dependencies form a
    /// cycle.
    pub fn build(self) -> Result<BuildGraph> {
        let mut graph = DiGraph::with_capacity(self.targets.len(), self.targets.len());
        let mut index = HashMap::with_capacity(self.targets.len());
        for target in self.targets {
            let label = target.label.clone();
            let node = graph.add_node(target);
            index.insert(label, node);
        }

        let mut deps: Vec<Vec<usize>> = Vec::with_capacity(graph.node_count());
        let mut missing: Vec<(Label, Label)> = Vec::new();
        for node in graph.node_indices() {
            let target = &graph[node];
            let mut resolved = Vec::with_capacity(target.deps.len());
            for dep in &target.deps {
                match index.get(dep) {
                    Some(dep_node) if !resolved.contains(&dep_node.index()) => {
                        resolved.push(dep_node.index());
                    }
                    Some(_) => {}
                    None => missing.push((target.label.clone(), dep.clone())),
                }
            }
            deps.push(resolved);
        }

        if let Some((target, dependency)) = missing.first().cloned() {
            for (target, dependency) in &missing {
                debug!(label = %target, dependency = %dependency, "Unresolved dependency");
            }
            return Err(Error::UnresolvedDependency {
                target,
                dependency,
                additional: missing.len() - 1,
            });
        }

        let mut roots: Vec<usize> = (0..graph.node_count()).collect();
        roots.sort_by(|a, b| graph[NodeIndex::new(*a)].label.cmp(&graph[NodeIndex::new(*b)].label));
        if let Some(cycle) = find_cycle(&deps, &roots) {
            return Err(Error::CycleDetected {
                path: cycle
                    .into_iter()
                    .map(|i| graph[NodeIndex::new(i)].label.clone())
                    .collect(),
            });
        }

        for (dependent, dependencies) in deps.iter().enumerate() {
            for &dependency in dependencies {
                graph.add_edge(NodeIndex::new(dependency), NodeIndex::new(dependent), ());
            }
        }

        debug!(
            packages = self.packages.len(),
            targets = graph.node_count(),
            edges = graph.edge_count(),
            "Build graph linked"
        );

        Ok(BuildGraph {
            graph,
            index,
            deps,
            packages: self.packages,
        })
    }
}

/// Immutable, acyclic graph of build targets keyed by label.
#[derive(Debug)]
pub struct BuildGraph {
    graph: DiGraph<Target, ()>,
    index: HashMap<Label, NodeIndex>,
    /// Per-node dependency indices in declared order, duplicates removed.
    deps: Vec<Vec<usize>>,
    packages: BTreeSet<String>,
}

impl BuildGraph {
    /// Start building a graph.
    #[must_use]
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    /// Build a graph from packages in one step.
    ///
    /// # Errors
    ///
    /// Any error from [`GraphBuilder::add_package`] or [`GraphBuilder::build`].
    pub fn from_packages(packages: impl IntoIterator<Item = Package>) -> Result<Self> {
        let mut builder = GraphBuilder::new();
        for package in packages {
            builder.add_package(package)?;
        }
        builder.build()
    }

    /// Resolve the requested targets and their transitive dependencies.
    ///
    /// The result is ordered so that every target appears after all of its
    /// dependencies. Requested labels are visited in the given order and
    /// dependencies in declared order, so the result is deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTarget`] if a requested label is not in the graph.
    pub fn resolve(&self, labels: &[Label]) -> Result<Vec<&Target>> {
        let mut roots = Vec::with_capacity(labels.len());
        for label in labels {
            let node = self.index.get(label).ok_or_else(|| Error::UnknownTarget {
                label: label.clone(),
            })?;
            roots.push(node.index());
        }

        let mut visited = vec![false; self.graph.node_count()];
        let mut order = Vec::new();
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for root in roots {
            if visited[root] {
                continue;
            }
            visited[root] = true;
            stack.push((root, 0));

            while let Some(&(node, cursor)) = stack.last() {
                if let Some(&dep) = self.deps[node].get(cursor) {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    if !visited[dep] {
                        visited[dep] = true;
                        stack.push((dep, 0));
                    }
                } else {
                    order.push(&self.graph[NodeIndex::new(node)]);
                    stack.pop();
                }
            }
        }

        debug!(
            requested = labels.len(),
            resolved = order.len(),
            "Resolved build closure"
        );
        Ok(order)
    }

    /// Look up a target by label.
    #[must_use]
    pub fn get(&self, label: &Label) -> Option<&Target> {
        self.index.get(label).map(|&node| &self.graph[node])
    }

    /// Whether a target with this label exists.
    #[must_use]
    pub fn contains(&self, label: &Label) -> bool {
        self.index.contains_key(label)
    }

    /// Direct dependencies of a target, in declared order.
    #[must_use]
    pub fn dependencies(&self, label: &Label) -> Vec<&Label> {
        self.index
            .get(label)
            .map(|node| {
                self.deps[node.index()]
                    .iter()
                    .map(|&dep| &self.graph[NodeIndex::new(dep)].label)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Targets that depend directly on this one, sorted by label.
    #[must_use]
    pub fn dependents(&self, label: &Label) -> Vec<&Label> {
        let Some(&node) = self.index.get(label) else {
            return Vec::new();
        };
        let mut dependents: Vec<&Label> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .map(|n| &self.graph[n].label)
            .collect();
        dependents.sort();
        dependents
    }

    /// Number of targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the graph has no targets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// All labels, sorted.
    #[must_use]
    pub fn labels(&self) -> Vec<&Label> {
        let mut labels: Vec<&Label> = self.index.keys().collect();
        labels.sort();
        labels
    }

    /// Loaded package paths, sorted.
    pub fn packages(&self) -> impl Iterator<Item = &str> {
        self.packages.iter().map(String::as_str)
    }

    /// Iterate over all targets in insertion order.
    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.graph.node_weights()
    }
}
