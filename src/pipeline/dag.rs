// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! DAG (Directed Acyclic Graph) builder for dataset dependencies
//!
//! Builds and validates the dependency graph of a registry, detecting
//! unresolved references and cycles, and computes a deterministic execution
//! order. Edges point from an upstream to the dataset that reads it.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::errors::LiveflowError;
use crate::pipeline::{DatasetKind, DatasetRegistry, Node};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Builder for dataset dependency DAGs
pub struct DagBuilder {
    graph: DiGraph<String, ()>,
    name_to_index: HashMap<String, NodeIndex>,
    order: Vec<NodeIndex>,
}

impl DagBuilder {
    /// Build a DAG from a registry
    ///
    /// Node indices follow registration order, which is what breaks ties
    /// between independent datasets in the execution order.
    pub fn build(registry: &DatasetRegistry) -> Result<Self, LiveflowError> {
        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();

        for node in registry.nodes() {
            let idx = graph.add_node(node.name().to_string());
            name_to_index.insert(node.name().to_string(), idx);
        }

        for node in registry.nodes() {
            let target = name_to_index[node.name()];

            for upstream in node.upstreams() {
                let source = name_to_index.get(upstream).ok_or_else(|| {
                    LiveflowError::UnresolvedReference {
                        dataset: node.name().to_string(),
                        reference: upstream.clone(),
                    }
                })?;

                if !graph.contains_edge(*source, target) {
                    graph.add_edge(*source, target, ());
                }
            }
        }

        let mut builder = Self {
            graph,
            name_to_index,
            order: Vec::new(),
        };

        builder.validate_acyclic()?;
        builder.order = builder.stable_toposort();

        Ok(builder)
    }

    /// Upstreams of a node, in registration order
    fn upstream_nodes(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut nodes: Vec<_> = self
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .collect();
        nodes.sort();
        nodes
    }

    /// Depth-first search with recursion-stack marking
    fn validate_acyclic(&self) -> Result<(), LiveflowError> {
        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];
        let mut stack = Vec::new();

        for start in self.graph.node_indices() {
            if marks[start.index()] == Mark::Unvisited {
                if let Err(cycle) = self.visit(start, &mut marks, &mut stack) {
                    let members = cycle.into_iter().map(|n| self.graph[n].clone()).collect();
                    return Err(LiveflowError::CyclicDependency { members });
                }
            }
        }

        Ok(())
    }

    fn visit(
        &self,
        node: NodeIndex,
        marks: &mut [Mark],
        stack: &mut Vec<NodeIndex>,
    ) -> Result<(), Vec<NodeIndex>> {
        marks[node.index()] = Mark::OnStack;
        stack.push(node);

        for next in self.upstream_nodes(node) {
            match marks[next.index()] {
                Mark::OnStack => {
                    // back-edge: the cycle is the stack suffix starting at `next`
                    let start = stack.iter().position(|n| *n == next).unwrap_or(0);
                    return Err(stack[start..].to_vec());
                }
                Mark::Unvisited => self.visit(next, marks, stack)?,
                Mark::Done => {}
            }
        }

        stack.pop();
        marks[node.index()] = Mark::Done;
        Ok(())
    }

    /// Kahn's algorithm, always releasing the earliest-registered ready node
    fn stable_toposort(&self) -> Vec<NodeIndex> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();

        let mut ready: BinaryHeap<Reverse<NodeIndex>> = self
            .graph
            .node_indices()
            .filter(|n| in_degree[n.index()] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        order
    }

    /// Node names in execution order
    pub fn topological_order(&self) -> impl Iterator<Item = &str> + '_ {
        self.order.iter().map(|n| self.graph[*n].as_str())
    }

    /// Node names in execution order, owned
    pub fn topological_order_names(&self) -> Vec<String> {
        self.topological_order().map(String::from).collect()
    }

    /// Direct upstreams of a node (what must run before it)
    pub fn dependencies(&self, name: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(name)?;
        Some(
            self.upstream_nodes(*node)
                .into_iter()
                .map(|n| self.graph[n].clone())
                .collect(),
        )
    }

    /// Direct dependents of a node (what reads it)
    pub fn dependents(&self, name: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(name)?;
        let mut nodes: Vec<_> = self
            .graph
            .neighbors_directed(*node, Direction::Outgoing)
            .collect();
        nodes.sort();
        Some(nodes.into_iter().map(|n| self.graph[n].clone()).collect())
    }

    /// Check if `a` depends (directly or transitively) on `b`
    pub fn depends_on(&self, a: &str, b: &str) -> bool {
        let Some(node_a) = self.name_to_index.get(a) else {
            return false;
        };
        let Some(node_b) = self.name_to_index.get(b) else {
            return false;
        };

        a != b && petgraph::algo::has_path_connecting(&self.graph, *node_b, *node_a, None)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Generate Mermaid diagram of the DAG
    pub fn to_mermaid(&self, registry: &DatasetRegistry) -> String {
        let mut out = String::from("graph TD\n");

        for node in registry.nodes() {
            let name = node.name();
            let shape = match node {
                Node::External(_) => format!("[({})]", name),
                Node::Dataset(ds) => {
                    let label = match ds.tier {
                        Some(tier) => format!("{} · {}", name, tier),
                        None => name.to_string(),
                    };
                    match ds.kind {
                        DatasetKind::View => format!("([{}])", label),
                        DatasetKind::Table => format!("[{}]", label),
                        DatasetKind::StreamingTable => format!("[[{}]]", label),
                    }
                }
            };
            out.push_str(&format!("    {}{}\n", name, shape));
        }

        for edge in self.graph.raw_edges() {
            let from = &self.graph[edge.source()];
            let to = &self.graph[edge.target()];
            out.push_str(&format!("    {} --> {}\n", from, to));
        }

        out
    }

    /// Generate DOT diagram of the DAG
    pub fn to_dot(&self, registry: &DatasetRegistry) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=LR;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for node in registry.nodes() {
            let attrs = match node {
                Node::External(_) => "shape=cylinder".to_string(),
                Node::Dataset(ds) => match ds.kind {
                    DatasetKind::View => "style=\"rounded,dashed\"".to_string(),
                    DatasetKind::Table => "style=rounded".to_string(),
                    DatasetKind::StreamingTable => "style=\"rounded,bold\"".to_string(),
                },
            };
            out.push_str(&format!("    \"{}\" [{}];\n", node.name(), attrs));
        }
        out.push('\n');

        for edge in self.graph.raw_edges() {
            let from = &self.graph[edge.source()];
            let to = &self.graph[edge.target()];
            out.push_str(&format!("    \"{}\" -> \"{}\";\n", from, to));
        }

        out.push_str("}\n");
        out
    }

    /// Generate text representation of execution order
    pub fn to_text(&self, registry: &DatasetRegistry) -> String {
        let mut out = String::new();

        for (i, name) in self.topological_order().enumerate() {
            let kind = match registry.get(name) {
                Ok(ds) => match ds.tier {
                    Some(tier) => format!("{}, {}", ds.kind, tier),
                    None => ds.kind.to_string(),
                },
                Err(_) => "external".to_string(),
            };

            out.push_str(&format!("{}. {} ({})", i + 1, name, kind));

            let deps = self.dependencies(name).unwrap_or_default();
            if !deps.is_empty() {
                out.push_str(&format!(" [reads: {}]", deps.join(", ")));
            }

            out.push('\n');
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Dataset, Transform};

    fn make_registry(datasets: Vec<(&str, Vec<&str>)>) -> DatasetRegistry {
        let mut registry = DatasetRegistry::new();
        for (name, deps) in datasets {
            let mut ds = Dataset::table(name, Transform::passthrough("unused"));
            for dep in deps {
                ds = ds.reads(dep);
            }
            registry.register(ds).unwrap();
        }
        registry
    }

    #[test]
    fn test_linear_dag() {
        let registry = make_registry(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec!["b"])]);

        let dag = DagBuilder::build(&registry).unwrap();
        assert_eq!(dag.topological_order_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_order_respects_edges_declared_backwards() {
        let registry = make_registry(vec![("c", vec!["b"]), ("b", vec!["a"]), ("a", vec![])]);

        let dag = DagBuilder::build(&registry).unwrap();
        assert_eq!(dag.topological_order_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ties_broken_by_registration_order() {
        let registry = make_registry(vec![
            ("root", vec![]),
            ("z", vec!["root"]),
            ("m", vec!["root"]),
            ("a", vec!["root"]),
            ("sink", vec!["a", "z", "m"]),
        ]);

        let dag = DagBuilder::build(&registry).unwrap();
        assert_eq!(
            dag.topological_order_names(),
            vec!["root", "z", "m", "a", "sink"]
        );
    }

    #[test]
    fn test_every_edge_respected() {
        let registry = make_registry(vec![
            ("e", vec!["d", "b"]),
            ("a", vec![]),
            ("d", vec!["c"]),
            ("b", vec!["a"]),
            ("c", vec!["a", "b"]),
        ]);

        let dag = DagBuilder::build(&registry).unwrap();
        let order = dag.topological_order_names();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();

        for ds in registry.list_all() {
            for up in &ds.upstreams {
                assert!(pos(up) < pos(&ds.name), "{} before {}", up, ds.name);
            }
        }
    }

    #[test]
    fn test_cycle_lists_exactly_members() {
        let registry = make_registry(vec![
            ("src", vec![]),
            ("a", vec!["src", "c"]),
            ("b", vec!["a"]),
            ("c", vec!["b"]),
            ("other", vec!["src"]),
        ]);

        match DagBuilder::build(&registry) {
            Err(LiveflowError::CyclicDependency { members }) => {
                let mut sorted = members.clone();
                sorted.sort();
                assert_eq!(sorted, vec!["a", "b", "c"]);
                assert_eq!(members[0], "a");
            }
            other => panic!("expected cycle, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let registry = make_registry(vec![("a", vec!["a"])]);
        match DagBuilder::build(&registry) {
            Err(LiveflowError::CyclicDependency { members }) => assert_eq!(members, vec!["a"]),
            other => panic!("expected cycle, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_unresolved_reference() {
        let registry = make_registry(vec![("a", vec!["nonexistent"])]);

        match DagBuilder::build(&registry) {
            Err(LiveflowError::UnresolvedReference { dataset, reference }) => {
                assert_eq!(dataset, "a");
                assert_eq!(reference, "nonexistent");
            }
            other => panic!("expected unresolved reference, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_external_sources_resolve() {
        let mut registry = DatasetRegistry::new();
        registry
            .register(Dataset::streaming_table("bronze", Transform::passthrough("raw")).reads("raw"))
            .unwrap();
        registry.register_external("raw").unwrap();

        let dag = DagBuilder::build(&registry).unwrap();
        assert_eq!(dag.topological_order_names(), vec!["raw", "bronze"]);
        assert_eq!(dag.dependencies("bronze").unwrap(), vec!["raw"]);
    }

    #[test]
    fn test_depends_on_check() {
        let registry = make_registry(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec!["b"])]);

        let dag = DagBuilder::build(&registry).unwrap();

        assert!(dag.depends_on("c", "a")); // transitive
        assert!(dag.depends_on("c", "b")); // direct
        assert!(!dag.depends_on("a", "c"));
        assert!(!dag.depends_on("a", "a"));
        assert_eq!(dag.dependents("a").unwrap(), vec!["b"]);
    }

    #[test]
    fn test_mermaid_output() {
        let registry = make_registry(vec![("a", vec![]), ("b", vec!["a"])]);

        let dag = DagBuilder::build(&registry).unwrap();
        let mermaid = dag.to_mermaid(&registry);

        assert!(mermaid.contains("graph TD"));
        assert!(mermaid.contains("a --> b"));
    }

    #[test]
    fn test_text_output() {
        let mut registry = make_registry(vec![("b", vec!["raw"])]);
        registry.register_external("raw").unwrap();

        let dag = DagBuilder::build(&registry).unwrap();
        let text = dag.to_text(&registry);

        assert!(text.contains("1. raw (external)"));
        assert!(text.contains("2. b (table) [reads: raw]"));
    }
}
