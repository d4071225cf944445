// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Stage scheduling for step and service dependencies
//!
//! Converts `depends_on`/`needs` declarations, or legacy `group` membership
//! when no dependencies are declared at all, into a sequence of stages. Steps
//! and services live in separate namespaces: `depends_on` on a step names
//! other steps, `needs` names services, and both keys on a service name
//! services.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::errors::{StagecraftError, StagecraftResult};
use crate::pipeline::{Container, Workflow};

/// A schedulable item with its dependency declarations
#[derive(Debug, Clone)]
pub struct DagNode<T> {
    pub name: String,
    pub position: usize,
    pub group: String,
    pub depends_on: Option<Vec<String>>,
    pub needs: Option<Vec<String>>,
    pub payload: T,
}

impl<T> DagNode<T> {
    /// Build a node from a declaration, carrying `payload` through scheduling
    pub fn from_container(container: &Container, payload: T) -> Self {
        Self {
            name: container.name.clone(),
            position: container.position,
            group: container.group.clone(),
            depends_on: container.depends_on.clone(),
            needs: container.needs.clone(),
            payload,
        }
    }

    fn declares_dependencies(&self) -> bool {
        self.depends_on.is_some() || self.needs.is_some()
    }

    fn step_deps(&self) -> &[String] {
        self.depends_on.as_deref().unwrap_or(&[])
    }

    fn service_deps(&self) -> &[String] {
        self.needs.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Namespace {
    Service,
    Step,
}

/// Stage scheduler
pub struct StageScheduler;

impl StageScheduler {
    /// Schedule steps and services into ordered stages
    pub fn schedule<T>(
        steps: Vec<DagNode<T>>,
        services: Vec<DagNode<T>>,
    ) -> StagecraftResult<Vec<Vec<T>>> {
        let dependency_mode = steps
            .iter()
            .chain(services.iter())
            .any(DagNode::declares_dependencies);

        if dependency_mode {
            Self::schedule_dependencies(steps, services)
        } else {
            Ok(Self::schedule_groups(steps, services))
        }
    }

    /// Legacy mode: services first, then contiguous runs of equal groups
    fn schedule_groups<T>(mut steps: Vec<DagNode<T>>, mut services: Vec<DagNode<T>>) -> Vec<Vec<T>> {
        steps.sort_by_key(|n| n.position);
        services.sort_by_key(|n| n.position);

        let mut stages: Vec<Vec<T>> = Vec::new();
        if !services.is_empty() {
            stages.push(services.into_iter().map(|n| n.payload).collect());
        }

        let mut previous_group: Option<String> = None;
        for step in steps {
            let joins_previous = !step.group.is_empty()
                && previous_group.as_deref() == Some(step.group.as_str());
            previous_group = Some(step.group.clone());

            match stages.last_mut() {
                Some(stage) if joins_previous => stage.push(step.payload),
                _ => stages.push(vec![step.payload]),
            }
        }

        stages
    }

    fn schedule_dependencies<T>(
        steps: Vec<DagNode<T>>,
        services: Vec<DagNode<T>>,
    ) -> StagecraftResult<Vec<Vec<T>>> {
        let graph = Graph::new(&steps, &services);
        graph.validate()?;
        graph.check_cycles()?;

        let any_needs = steps
            .iter()
            .chain(services.iter())
            .any(|n| n.needs.is_some());

        let mut stages: Vec<Vec<T>> = Vec::new();
        let mut placed: HashSet<(Namespace, String)> = HashSet::new();
        let mut pending: Vec<(Namespace, DagNode<T>)> = Vec::new();

        let services = services.into_iter().map(|n| (Namespace::Service, n));
        if any_needs {
            pending.extend(services);
        } else {
            // Without `needs`, every service stage runs ahead of the steps
            Self::level(services.collect(), &mut placed, &mut stages)?;
        }
        pending.extend(steps.into_iter().map(|n| (Namespace::Step, n)));
        Self::level(pending, &mut placed, &mut stages)?;

        Ok(stages)
    }

    /// Append level-ordered stages for `pending`, given the nodes already placed
    fn level<T>(
        mut pending: Vec<(Namespace, DagNode<T>)>,
        placed: &mut HashSet<(Namespace, String)>,
        stages: &mut Vec<Vec<T>>,
    ) -> StagecraftResult<()> {
        while !pending.is_empty() {
            let (mut level, rest): (Vec<_>, Vec<_>) = pending.into_iter().partition(|(ns, node)| {
                Graph::edges(*ns, node)
                    .all(|(dep_ns, dep)| placed.contains(&(dep_ns, dep.to_string())))
            });
            pending = rest;

            if level.is_empty() {
                let path = pending.iter().map(|(_, n)| n.name.clone()).collect();
                return Err(StagecraftError::CircularDependency { path });
            }

            level.sort_by_key(|(ns, node)| (*ns, node.position));
            for (ns, node) in &level {
                placed.insert((*ns, node.name.clone()));
            }
            stages.push(level.into_iter().map(|(_, n)| n.payload).collect());
        }
        Ok(())
    }
}

/// Name-level view of the dependency declarations
struct Graph {
    steps: HashMap<String, (Vec<String>, Vec<String>)>,
    services: HashMap<String, (Vec<String>, Vec<String>)>,
    step_order: Vec<String>,
    service_order: Vec<String>,
}

impl Graph {
    fn new<T>(steps: &[DagNode<T>], services: &[DagNode<T>]) -> Self {
        let index = |nodes: &[DagNode<T>]| -> HashMap<String, (Vec<String>, Vec<String>)> {
            nodes
                .iter()
                .map(|n| (n.name.clone(), (n.step_deps().to_vec(), n.service_deps().to_vec())))
                .collect()
        };
        let order = |nodes: &[DagNode<T>]| -> Vec<String> {
            let mut sorted: Vec<&DagNode<T>> = nodes.iter().collect();
            sorted.sort_by_key(|n| n.position);
            sorted.into_iter().map(|n| n.name.clone()).collect()
        };
        Self {
            steps: index(steps),
            services: index(services),
            step_order: order(steps),
            service_order: order(services),
        }
    }

    fn namespace(&self, ns: Namespace) -> &HashMap<String, (Vec<String>, Vec<String>)> {
        match ns {
            Namespace::Step => &self.steps,
            Namespace::Service => &self.services,
        }
    }

    /// Outgoing edges of a node as `(namespace, name)` pairs
    ///
    /// `depends_on` stays in the node's own namespace.
    fn edges<'a, T>(ns: Namespace, node: &'a DagNode<T>) -> impl Iterator<Item = (Namespace, &'a str)> {
        node.step_deps()
            .iter()
            .map(move |d| (ns, d.as_str()))
            .chain(node.service_deps().iter().map(|d| (Namespace::Service, d.as_str())))
    }

    fn edges_by_name(&self, ns: Namespace, name: &str) -> Vec<(Namespace, String)> {
        let Some((depends_on, needs)) = self.namespace(ns).get(name) else {
            return Vec::new();
        };
        depends_on
            .iter()
            .map(|d| (ns, d.clone()))
            .chain(needs.iter().map(|d| (Namespace::Service, d.clone())))
            .collect()
    }

    /// Every dependency names an existing node in the right namespace
    fn validate(&self) -> StagecraftResult<()> {
        for (ns, order) in [
            (Namespace::Service, &self.service_order),
            (Namespace::Step, &self.step_order),
        ] {
            for name in order {
                for (dep_ns, dep) in self.edges_by_name(ns, name) {
                    if self.namespace(dep_ns).contains_key(&dep) {
                        continue;
                    }
                    return Err(match (ns, dep_ns) {
                        (Namespace::Step, Namespace::Service) => StagecraftError::UnknownService {
                            step: name.clone(),
                            service: dep,
                        },
                        _ => StagecraftError::UnknownDependency {
                            step: name.clone(),
                            dependency: dep,
                        },
                    });
                }
            }
        }
        Ok(())
    }

    /// Depth-first search from every node with per-namespace recursion stacks
    fn check_cycles(&self) -> StagecraftResult<()> {
        for (ns, order) in [
            (Namespace::Service, &self.service_order),
            (Namespace::Step, &self.step_order),
        ] {
            for name in order {
                let mut on_path: HashMap<Namespace, HashSet<String>> = HashMap::new();
                let mut path = Vec::new();
                self.visit(ns, name, &mut on_path, &mut path)?;
            }
        }
        Ok(())
    }

    fn visit(
        &self,
        ns: Namespace,
        name: &str,
        on_path: &mut HashMap<Namespace, HashSet<String>>,
        path: &mut Vec<(Namespace, String)>,
    ) -> StagecraftResult<()> {
        if on_path.get(&ns).is_some_and(|set| set.contains(name)) {
            let start = path
                .iter()
                .position(|(n, p)| *n == ns && p == name)
                .unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|(_, p)| p.clone()).collect();
            cycle.push(name.to_string());
            return Err(StagecraftError::CircularDependency { path: cycle });
        }

        on_path.entry(ns).or_default().insert(name.to_string());
        path.push((ns, name.to_string()));

        for (dep_ns, dep) in self.edges_by_name(ns, name) {
            self.visit(dep_ns, &dep, on_path, path)?;
        }

        path.pop();
        if let Some(set) = on_path.get_mut(&ns) {
            set.remove(name);
        }
        Ok(())
    }
}

/// Find a cycle among named items with `depends_on` edges
///
/// Returns the cycle as a path that starts and ends with the same name.
pub fn find_cycle<'a>(nodes: impl IntoIterator<Item = (&'a str, &'a [String])>) -> Option<Vec<String>> {
    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut index: HashMap<String, NodeIndex> = HashMap::new();
    let mut edges = Vec::new();

    for (name, deps) in nodes {
        let node = *index
            .entry(name.to_string())
            .or_insert_with(|| graph.add_node(name.to_string()));
        for dep in deps {
            edges.push((node, dep.clone()));
        }
    }
    for (node, dep) in edges {
        if let Some(&dep_node) = index.get(&dep) {
            graph.update_edge(node, dep_node, ());
        }
    }

    let cycle = toposort(&graph, None).err()?;
    Some(cycle_path(&graph, cycle.node_id()))
}

fn cycle_path(graph: &DiGraph<String, ()>, start: NodeIndex) -> Vec<String> {
    fn walk(
        graph: &DiGraph<String, ()>,
        node: NodeIndex,
        start: NodeIndex,
        path: &mut Vec<NodeIndex>,
        seen: &mut HashSet<NodeIndex>,
    ) -> bool {
        path.push(node);
        let mut next: Vec<NodeIndex> = graph.neighbors(node).collect();
        next.sort_by(|a, b| graph[*a].cmp(&graph[*b]));
        for n in next {
            if n == start {
                return true;
            }
            if seen.insert(n) && walk(graph, n, start, path, seen) {
                return true;
            }
        }
        path.pop();
        false
    }

    let mut path = Vec::new();
    let mut seen = HashSet::from([start]);
    walk(graph, start, start, &mut path, &mut seen);

    let mut names: Vec<String> = path.iter().map(|n| graph[*n].clone()).collect();
    names.push(graph[start].clone());
    names
}

/// Renderable dependency graph of one workflow
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    stages: Vec<Vec<String>>,
}

impl DependencyGraph {
    /// Build the graph and schedule the workflow's steps and services
    pub fn build(workflow: &Workflow) -> StagecraftResult<Self> {
        let node = |c: &Container, ns: &str| DagNode::from_container(c, format!("{}{}", ns, c.name));
        let steps: Vec<_> = workflow.steps.iter().map(|c| node(c, "")).collect();
        let services: Vec<_> = workflow.services.iter().map(|c| node(c, "service:")).collect();

        let stages = StageScheduler::schedule(steps, services)?;

        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut index: HashMap<String, NodeIndex> = HashMap::new();
        for stage in &stages {
            for name in stage {
                index.insert(name.clone(), graph.add_node(name.clone()));
            }
        }

        let mut edge_set = BTreeSet::new();
        for (prefix, list) in [("", &workflow.steps), ("service:", &workflow.services)] {
            for c in list.iter() {
                let to = format!("{}{}", prefix, c.name);
                for dep in c.depends_on.iter().flatten() {
                    edge_set.insert((format!("{}{}", prefix, dep), to.clone()));
                }
                for dep in c.needs.iter().flatten() {
                    edge_set.insert((format!("service:{}", dep), to.clone()));
                }
            }
        }
        for (from, to) in edge_set {
            if let (Some(&a), Some(&b)) = (index.get(&from), index.get(&to)) {
                graph.add_edge(a, b, ());
            }
        }

        Ok(Self { graph, stages })
    }

    /// Scheduled stages, by node name (services prefixed with `service:`)
    pub fn stages(&self) -> &[Vec<String>] {
        &self.stages
    }

    /// Generate Mermaid diagram
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");
        let id = |name: &str| name.replace([':', '-', '.', ' '], "_");

        for node in self.graph.node_indices() {
            let name = &self.graph[node];
            out.push_str(&format!("    {}[{}]\n", id(name), name));
        }
        for edge in self.graph.edge_indices() {
            if let Some((from, to)) = self.graph.edge_endpoints(edge) {
                out.push_str(&format!(
                    "    {} --> {}\n",
                    id(&self.graph[from]),
                    id(&self.graph[to])
                ));
            }
        }
        out
    }

    /// Generate DOT diagram
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph workflow {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for edge in self.graph.edge_indices() {
            if let Some((from, to)) = self.graph.edge_endpoints(edge) {
                out.push_str(&format!(
                    "    \"{}\" -> \"{}\";\n",
                    self.graph[from], self.graph[to]
                ));
            }
        }
        for node in self.graph.node_indices() {
            if self.graph.neighbors_undirected(node).count() == 0 {
                out.push_str(&format!("    \"{}\";\n", self.graph[node]));
            }
        }

        out.push_str("}\n");
        out
    }

    /// Generate text representation of the stages
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (i, stage) in self.stages.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, stage.join(", ")));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, position: usize) -> DagNode<String> {
        DagNode {
            name: name.into(),
            position,
            group: String::new(),
            depends_on: None,
            needs: None,
            payload: name.into(),
        }
    }

    fn with_deps(mut n: DagNode<String>, deps: &[&str]) -> DagNode<String> {
        n.depends_on = Some(deps.iter().map(|s| s.to_string()).collect());
        n
    }

    fn with_needs(mut n: DagNode<String>, needs: &[&str]) -> DagNode<String> {
        n.needs = Some(needs.iter().map(|s| s.to_string()).collect());
        n
    }

    fn with_group(mut n: DagNode<String>, group: &str) -> DagNode<String> {
        n.group = group.into();
        n
    }

    #[test]
    fn test_empty_input() {
        let stages = StageScheduler::schedule::<String>(vec![], vec![]).unwrap();
        assert!(stages.is_empty());
    }

    #[test]
    fn test_group_mode() {
        let steps = vec![
            node("step1", 0),
            with_group(node("step2", 1), "build"),
            with_group(node("step3", 2), "build"),
        ];
        let stages = StageScheduler::schedule(steps, vec![]).unwrap();
        assert_eq!(stages, vec![vec!["step1"], vec!["step2", "step3"]]);
    }

    #[test]
    fn test_group_mode_services_first() {
        let steps = vec![node("a", 0), node("b", 1)];
        let services = vec![node("db", 0), node("cache", 1)];
        let stages = StageScheduler::schedule(steps, services).unwrap();
        assert_eq!(stages, vec![vec!["db", "cache"], vec!["a"], vec!["b"]]);
    }

    #[test]
    fn test_noncontiguous_groups_split() {
        let steps = vec![
            with_group(node("a", 0), "x"),
            with_group(node("b", 1), "y"),
            with_group(node("c", 2), "x"),
        ];
        let stages = StageScheduler::schedule(steps, vec![]).unwrap();
        assert_eq!(stages.len(), 3);
    }

    #[test]
    fn test_dependency_levels_by_position() {
        let steps = vec![
            node("echo-env", 0),
            node("echo-2", 1),
            with_deps(node("echo-1", 2), &["echo-env", "echo-2"]),
        ];
        let stages = StageScheduler::schedule(steps, vec![]).unwrap();
        assert_eq!(stages, vec![vec!["echo-env", "echo-2"], vec!["echo-1"]]);
    }

    #[test]
    fn test_needs_places_service_first() {
        let stages =
            StageScheduler::schedule(vec![with_needs(node("s1", 0), &["svc"])], vec![node("svc", 0)])
                .unwrap();
        assert_eq!(stages, vec![vec!["svc"], vec!["s1"]]);
    }

    #[test]
    fn test_services_sort_before_steps_in_level() {
        let steps = vec![with_deps(node("lint", 0), &[]), with_needs(node("test", 1), &["db"])];
        let services = vec![node("db", 5)];
        let stages = StageScheduler::schedule(steps, services).unwrap();
        assert_eq!(stages, vec![vec!["db", "lint"], vec!["test"]]);
    }

    #[test]
    fn test_services_prepended_without_needs() {
        let steps = vec![node("a", 0), with_deps(node("b", 1), &["a"])];
        let services = vec![node("db", 0)];
        let stages = StageScheduler::schedule(steps, services).unwrap();
        assert_eq!(stages, vec![vec!["db"], vec!["a"], vec!["b"]]);
    }

    #[test]
    fn test_dependent_services_still_precede_steps() {
        let steps = vec![node("s1", 0)];
        let services = vec![node("db", 0), with_deps(node("app", 1), &["db"])];
        let stages = StageScheduler::schedule(steps, services).unwrap();
        assert_eq!(stages, vec![vec!["db"], vec!["app"], vec!["s1"]]);
    }

    #[test]
    fn test_service_needs_cycle() {
        let services = vec![with_needs(node("a", 0), &["b"]), with_needs(node("b", 1), &["a"])];
        let err = StageScheduler::schedule(vec![node("s1", 0)], services).unwrap_err();
        match err {
            StagecraftError::CircularDependency { path } => {
                assert_eq!(path, vec!["a", "b", "a"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_but_present_dependencies_select_dependency_mode() {
        let steps = vec![
            with_group(with_deps(node("a", 0), &[]), "g"),
            with_group(node("b", 1), "g"),
        ];
        let stages = StageScheduler::schedule(steps, vec![]).unwrap();
        assert_eq!(stages, vec![vec!["a", "b"]]);
    }

    #[test]
    fn test_missing_dependency() {
        let err = StageScheduler::schedule(vec![with_deps(node("a", 0), &["ghost"])], vec![]).unwrap_err();
        match err {
            StagecraftError::UnknownDependency { step, dependency } => {
                assert_eq!(step, "a");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_service() {
        let err = StageScheduler::schedule(vec![with_needs(node("a", 0), &["db"])], vec![]).unwrap_err();
        assert!(matches!(err, StagecraftError::UnknownService { ref service, .. } if service == "db"));
    }

    #[test]
    fn test_depends_on_does_not_cross_namespaces() {
        let err = StageScheduler::schedule(vec![with_deps(node("a", 0), &["db"])], vec![node("db", 0)])
            .unwrap_err();
        assert!(matches!(err, StagecraftError::UnknownDependency { .. }));
    }

    #[test]
    fn test_cycle_detection() {
        let steps = vec![with_deps(node("A", 0), &["B"]), with_deps(node("B", 1), &["A"])];
        let err = StageScheduler::schedule(steps, vec![]).unwrap_err();
        match err {
            StagecraftError::CircularDependency { path } => {
                assert_eq!(path, vec!["A", "B", "A"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_same_name_in_both_namespaces_is_not_a_cycle() {
        let steps = vec![with_needs(node("db", 0), &["db"])];
        let services = vec![node("db", 0)];
        let stages = StageScheduler::schedule(steps, services).unwrap();
        assert_eq!(stages.len(), 2);
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let steps = vec![
            node("a", 0),
            with_deps(node("b", 1), &["a"]),
            with_deps(node("c", 2), &["a"]),
            with_deps(node("d", 3), &["b", "c"]),
        ];
        let stages = StageScheduler::schedule(steps, vec![]).unwrap();
        assert_eq!(stages, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[test]
    fn test_topological_validity() {
        let steps = vec![
            with_deps(node("deploy", 0), &["test", "build"]),
            with_deps(node("test", 1), &["build"]),
            node("build", 2),
            with_deps(node("notify", 3), &["deploy"]),
        ];
        let deps: Vec<(String, Vec<String>)> = steps
            .iter()
            .map(|n| (n.name.clone(), n.step_deps().to_vec()))
            .collect();
        let stages = StageScheduler::schedule(steps, vec![]).unwrap();

        let stage_of = |name: &str| stages.iter().position(|s| s.iter().any(|n| n == name)).unwrap();
        for (name, ds) in deps {
            for d in ds {
                assert!(stage_of(&d) < stage_of(&name));
            }
        }
    }

    #[test]
    fn test_deterministic_output() {
        let build = || {
            vec![
                node("z", 0),
                node("y", 1),
                with_deps(node("x", 2), &["z"]),
                with_deps(node("w", 3), &["y", "x"]),
            ]
        };
        let first = StageScheduler::schedule(build(), vec![]).unwrap();
        for _ in 0..10 {
            assert_eq!(StageScheduler::schedule(build(), vec![]).unwrap(), first);
        }
    }

    #[test]
    fn test_find_cycle() {
        let a = vec!["b".to_string()];
        let b = vec!["a".to_string()];
        let c = vec!["missing".to_string()];
        let cycle = find_cycle([("a", a.as_slice()), ("b", b.as_slice()), ("c", c.as_slice())]).unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 3);

        let empty: Vec<String> = Vec::new();
        let none = find_cycle([("a", empty.as_slice()), ("b", b.as_slice())]);
        assert!(none.is_none());
    }

    #[test]
    fn test_dependency_graph_render() {
        let wf = Workflow::from_yaml(
            "services:\n  db:\n    image: postgres\nsteps:\n  build:\n    image: rust\n    commands: make\n  test:\n    image: rust\n    commands: make test\n    depends_on: [build]\n    needs: [db]\n",
        )
        .unwrap();
        let graph = DependencyGraph::build(&wf).unwrap();

        assert_eq!(graph.stages().len(), 2);
        assert!(graph.to_mermaid().contains("build --> test"));
        assert!(graph.to_mermaid().contains("service_db --> test"));
        assert!(graph.to_dot().contains("\"build\" -> \"test\""));
        assert_eq!(graph.to_text(), "1. service:db, build\n2. test\n");
    }
}
