//! Resolved dependency tree as an arena of nodes.
//!
//! Nodes are addressed by [`NodeId`]. Each node keeps its declared
//! dependency maps and one outgoing [`Edge`] per declared name; targets
//! record the reverse link in their incoming set. `children` is the
//! `node_modules` view: which node a name resolves to when looked up from
//! inside a given node.

use crate::error::TreeError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Upper bound on steps for any single walk.
pub const TRAVERSAL_BUDGET: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Prod,
    Dev,
    Optional,
    Peer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub name: String,
    pub spec: String,
    pub kind: EdgeKind,
    pub to: Option<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Workspace,
    Package,
}

/// Declared dependency maps, name to range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyMaps {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub optional_dependencies: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub peer_dependencies: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dev_dependencies: BTreeMap<String, String>,
}

impl DependencyMaps {
    /// Every declared name with the spec and kind its edge should carry.
    /// A name listed in several maps takes the first of
    /// dependencies, optional, dev, peer.
    pub fn edges(&self) -> BTreeMap<&str, (&str, EdgeKind)> {
        let mut out = BTreeMap::new();
        let maps = [
            (&self.peer_dependencies, EdgeKind::Peer),
            (&self.dev_dependencies, EdgeKind::Dev),
            (&self.optional_dependencies, EdgeKind::Optional),
            (&self.dependencies, EdgeKind::Prod),
        ];
        for (map, kind) in maps {
            for (name, spec) in map {
                out.insert(name.as_str(), (spec.as_str(), kind));
            }
        }
        out
    }

    pub fn names(&self) -> BTreeSet<&str> {
        self.edges().into_keys().collect()
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    /// Lockfile key: "" for the root, "node_modules/a/node_modules/b", "packages/web".
    pub location: String,
    pub kind: NodeKind,
    loaded_version: String,
    version_override: Option<String>,
    pub resolved: Option<String>,
    pub integrity: Option<String>,
    pub deprecated: Option<String>,
    pub dev: bool,
    pub optional: bool,
    pub declared: DependencyMaps,
    edges_out: BTreeMap<String, Edge>,
    edges_in: BTreeSet<(NodeId, String)>,
}

impl Node {
    fn new(name: &str, location: &str, version: &str, kind: NodeKind) -> Self {
        Self {
            name: name.to_string(),
            location: location.to_string(),
            kind,
            loaded_version: version.to_string(),
            version_override: None,
            resolved: None,
            integrity: None,
            deprecated: None,
            dev: false,
            optional: false,
            declared: DependencyMaps::default(),
            edges_out: BTreeMap::new(),
            edges_in: BTreeSet::new(),
        }
    }

    /// Effective version: the override when one was applied, else the loaded one.
    pub fn version(&self) -> &str {
        self.version_override
            .as_deref()
            .unwrap_or(&self.loaded_version)
    }

    pub fn loaded_version(&self) -> &str {
        &self.loaded_version
    }

    pub(crate) fn override_version(&mut self, version: &str) {
        if version == self.loaded_version {
            self.version_override = None;
        } else {
            self.version_override = Some(version.to_string());
        }
    }

    pub fn edges_out(&self) -> &BTreeMap<String, Edge> {
        &self.edges_out
    }

    /// (source node, dependency name) pairs pointing at this node.
    pub fn edges_in(&self) -> &BTreeSet<(NodeId, String)> {
        &self.edges_in
    }

    pub fn is_project(&self) -> bool {
        matches!(self.kind, NodeKind::Root | NodeKind::Workspace)
    }

    pub fn spec_key(&self) -> String {
        format!("{}@{}", self.name, self.version())
    }
}

#[derive(Debug, Clone)]
pub struct DependencyTree {
    nodes: Vec<Node>,
    parents: Vec<Option<NodeId>>,
    children: BTreeMap<NodeId, BTreeMap<String, NodeId>>,
    by_location: BTreeMap<String, NodeId>,
    workspaces: Vec<NodeId>,
    dirty: BTreeSet<NodeId>,
}

impl DependencyTree {
    pub fn new(root_name: &str, root_version: &str) -> Self {
        let root = Node::new(root_name, "", root_version, NodeKind::Root);
        Self {
            nodes: vec![root],
            parents: vec![None],
            children: BTreeMap::new(),
            by_location: BTreeMap::from([(String::new(), NodeId(0))]),
            workspaces: vec![],
            dirty: BTreeSet::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn get(&self, id: NodeId) -> Result<&Node, TreeError> {
        self.nodes.get(id.0).ok_or(TreeError::UnknownNode(id.0))
    }

    /// Ids are only minted by this tree, so indexing is in bounds.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, TreeError> {
        self.nodes.get_mut(id.0).ok_or(TreeError::UnknownNode(id.0))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.parents.get(id.0).copied().flatten()
    }

    fn push(&mut self, node: Node, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.by_location.insert(node.location.clone(), id);
        self.nodes.push(node);
        self.parents.push(parent);
        id
    }

    /// Adds an installed package and makes it visible under `parent`.
    pub fn add_package(&mut self, parent: NodeId, location: &str, name: &str, version: &str) -> NodeId {
        let id = self.push(Node::new(name, location, version, NodeKind::Package), Some(parent));
        self.link_child(parent, name, id);
        id
    }

    /// Adds a package stored outside any `node_modules` lookup path
    /// (pnpm's virtual store). Visibility comes from explicit
    /// [`link_child`](Self::link_child) calls.
    pub fn add_unlinked(&mut self, location: &str, name: &str, version: &str) -> NodeId {
        let root = self.root();
        self.push(Node::new(name, location, version, NodeKind::Package), Some(root))
    }

    /// Adds a workspace project. Workspaces hang off the root.
    pub fn add_workspace(&mut self, location: &str, name: &str, version: &str) -> NodeId {
        let root = self.root();
        let id = self.push(Node::new(name, location, version, NodeKind::Workspace), Some(root));
        self.workspaces.push(id);
        id
    }

    /// Makes `target` resolvable as `name` from inside `parent`.
    pub fn link_child(&mut self, parent: NodeId, name: &str, target: NodeId) {
        self.children
            .entry(parent)
            .or_default()
            .insert(name.to_string(), target);
    }

    pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.children.get(&parent)?.get(name).copied()
    }

    pub fn children(&self, parent: NodeId) -> impl Iterator<Item = (&str, NodeId)> + '_ {
        self.children
            .get(&parent)
            .into_iter()
            .flat_map(|m| m.iter().map(|(k, v)| (k.as_str(), *v)))
    }

    /// Whether `id` is what `workspace` itself gets for the name: the entry
    /// in its own child map, or the node its declared edge resolves to.
    /// npm hoists a workspace's direct dependencies into the root
    /// `node_modules`, so the second case is the usual one for workspaces.
    pub fn is_top_level(&self, workspace: NodeId, id: NodeId) -> bool {
        let name = &self.node(id).name;
        self.child(workspace, name) == Some(id)
            || self
                .node(workspace)
                .edges_out
                .get(name)
                .is_some_and(|edge| edge.to == Some(id))
    }

    pub fn workspaces(&self) -> &[NodeId] {
        &self.workspaces
    }

    pub fn by_location(&self, location: &str) -> Option<NodeId> {
        self.by_location.get(location).copied()
    }

    pub fn nodes_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = NodeId> + 'a {
        self.ids().filter(move |id| self.node(*id).name == name)
    }

    /// npm lookup: `from`'s own children first, then each ancestor's.
    pub fn resolve(&self, from: NodeId, name: &str) -> Option<NodeId> {
        let mut current = Some(from);
        let mut steps = 0usize;
        while let Some(id) = current {
            if let Some(found) = self.child(id, name) {
                return Some(found);
            }
            steps += 1;
            if steps > self.nodes.len() {
                return None;
            }
            current = self.parent(id);
        }
        None
    }

    pub(crate) fn connect(&mut self, from: NodeId, name: &str, spec: &str, kind: EdgeKind) -> Result<(), TreeError> {
        let to = self.resolve(from, name).filter(|to| *to != from);
        self.get(from)?;
        if let Some(previous) = self.nodes[from.0].edges_out.get(name).and_then(|e| e.to)
            && Some(previous) != to
        {
            self.nodes[previous.0].edges_in.remove(&(from, name.to_string()));
        }
        self.nodes[from.0].edges_out.insert(
            name.to_string(),
            Edge {
                name: name.to_string(),
                spec: spec.to_string(),
                kind,
                to,
            },
        );
        if let Some(to) = to {
            self.nodes[to.0].edges_in.insert((from, name.to_string()));
        }
        Ok(())
    }

    pub(crate) fn detach(&mut self, from: NodeId, name: &str) -> Result<(), TreeError> {
        let edge = self.node_mut(from)?.edges_out.remove(name);
        if let Some(to) = edge.and_then(|e| e.to) {
            self.node_mut(to)?.edges_in.remove(&(from, name.to_string()));
        }
        Ok(())
    }

    /// Builds every node's edges from its declared maps.
    pub fn connect_all(&mut self) -> Result<(), TreeError> {
        for id in self.ids().collect::<Vec<_>>() {
            let wanted: Vec<(String, String, EdgeKind)> = self
                .node(id)
                .declared
                .edges()
                .into_iter()
                .map(|(name, (spec, kind))| (name.to_string(), spec.to_string(), kind))
                .collect();
            for (name, spec, kind) in wanted {
                self.connect(id, &name, &spec, kind)?;
            }
        }
        Ok(())
    }

    /// Every node reachable over outgoing edges from `start`, `start` included.
    pub fn reachable_from(&self, start: NodeId) -> Result<Vec<NodeId>, TreeError> {
        self.get(start)?;
        let mut visited = BTreeSet::from([start]);
        let mut stack = vec![start];
        let mut out = Vec::new();
        let mut steps = 0usize;

        while let Some(id) = stack.pop() {
            steps += 1;
            if steps > TRAVERSAL_BUDGET {
                return Err(TreeError::TraversalBudget {
                    budget: TRAVERSAL_BUDGET,
                });
            }
            out.push(id);
            for edge in self.node(id).edges_out.values() {
                if let Some(to) = edge.to
                    && visited.insert(to)
                {
                    stack.push(to);
                }
            }
        }
        out.sort();
        Ok(out)
    }

    /// Installed instances of `name` that `workspace` depends on, directly or not.
    pub fn workspace_nodes_named(&self, workspace: NodeId, name: &str) -> Result<Vec<NodeId>, TreeError> {
        Ok(self
            .reachable_from(workspace)?
            .into_iter()
            .filter(|id| !self.node(*id).is_project() && self.node(*id).name == name)
            .collect())
    }

    pub(crate) fn mark_dirty(&mut self, id: NodeId) {
        self.dirty.insert(id);
    }

    /// Nodes changed since load.
    pub fn dirty(&self) -> &BTreeSet<NodeId> {
        &self.dirty
    }

    /// Checks edge bookkeeping; returns a description of the first breach.
    pub fn check_consistency(&self) -> Result<(), String> {
        for id in self.ids() {
            let node = self.node(id);
            let declared = node.declared.names();
            let wired: BTreeSet<&str> = node.edges_out.keys().map(String::as_str).collect();
            if declared != wired {
                return Err(format!(
                    "{} declares {:?} but has edges {:?}",
                    node.spec_key(),
                    declared,
                    wired
                ));
            }
            for edge in node.edges_out.values() {
                if let Some(to) = edge.to
                    && !self.node(to).edges_in.contains(&(id, edge.name.clone()))
                {
                    return Err(format!(
                        "edge {} -> {} missing from target's incoming set",
                        node.spec_key(),
                        edge.name
                    ));
                }
            }
            for (from, name) in &node.edges_in {
                let back = self.node(*from).edges_out.get(name).and_then(|e| e.to);
                if back != Some(id) {
                    return Err(format!(
                        "{} lists a dangling incoming edge from {} ({name})",
                        node.spec_key(),
                        self.node(*from).spec_key()
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (DependencyTree, NodeId, NodeId, NodeId) {
        let mut tree = DependencyTree::new("app", "1.0.0");
        let root = tree.root();
        let a = tree.add_package(root, "node_modules/a", "a", "1.0.0");
        let b = tree.add_package(root, "node_modules/b", "b", "2.0.0");
        let nested_b = tree.add_package(a, "node_modules/a/node_modules/b", "b", "1.0.0");
        tree.nodes[root.0].declared.dependencies.insert("a".into(), "^1.0.0".into());
        tree.nodes[root.0].declared.dependencies.insert("b".into(), "^2.0.0".into());
        tree.nodes[a.0].declared.dependencies.insert("b".into(), "^1.0.0".into());
        tree.connect_all().unwrap();
        (tree, a, b, nested_b)
    }

    #[test]
    fn resolution_prefers_nearest_node_modules() {
        let (tree, a, b, nested_b) = sample();
        assert_eq!(tree.resolve(a, "b"), Some(nested_b));
        assert_eq!(tree.resolve(tree.root(), "b"), Some(b));
        assert_eq!(tree.node(a).edges_out()["b"].to, Some(nested_b));
        tree.check_consistency().unwrap();
    }

    #[test]
    fn top_level_is_an_id_check_not_a_name_check() {
        let (tree, _a, b, nested_b) = sample();
        assert!(tree.is_top_level(tree.root(), b));
        assert!(!tree.is_top_level(tree.root(), nested_b));
    }

    #[test]
    fn hoisted_workspace_dependency_is_top_level_for_the_workspace() {
        let (mut tree, _a, b, nested_b) = sample();
        let web = tree.add_workspace("packages/web", "web", "0.1.0");
        tree.nodes[web.0].declared.dependencies.insert("b".into(), "^2.0.0".into());
        tree.connect_all().unwrap();

        assert_eq!(tree.child(web, "b"), None);
        assert!(tree.is_top_level(web, b));
        assert!(!tree.is_top_level(web, nested_b));
    }

    #[test]
    fn detach_removes_both_sides() {
        let (mut tree, a, _b, nested_b) = sample();
        tree.detach(a, "b").unwrap();
        assert!(tree.node(nested_b).edges_in().is_empty());
        assert!(!tree.node(a).edges_out().contains_key("b"));
    }

    #[test]
    fn version_override_is_derived() {
        let (mut tree, a, _, _) = sample();
        tree.node_mut(a).unwrap().override_version("1.1.0");
        assert_eq!(tree.node(a).version(), "1.1.0");
        assert_eq!(tree.node(a).loaded_version(), "1.0.0");
        tree.node_mut(a).unwrap().override_version("1.0.0");
        assert_eq!(tree.node(a).version(), "1.0.0");
    }

    #[test]
    fn reachability_survives_cycles() {
        let (mut tree, a, b, _) = sample();
        tree.nodes[b.0].declared.dependencies.insert("a".into(), "^1.0.0".into());
        tree.connect(b, "a", "^1.0.0", EdgeKind::Prod).unwrap();
        let reach = tree.reachable_from(tree.root()).unwrap();
        assert_eq!(reach.len(), 4);
        assert!(reach.contains(&a));
    }

    #[test]
    fn workspace_lookup_filters_by_name() {
        let (tree, _a, b, nested_b) = sample();
        let found = tree.workspace_nodes_named(tree.root(), "b").unwrap();
        assert_eq!(found, vec![b, nested_b]);
    }
}
