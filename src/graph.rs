//! The dependency graph: which targets exist between the goal and the
//! leaves, which of them are ready to run, and which are already current.

use crate::densemap::{declare_id, DenseMap};
use crate::fs::{FileCache, MTime};
use crate::makefile::{Makefile, TargetId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Write;
use std::time::SystemTime;

declare_id!(NodeId);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unknown,
    Executing,
    UpToDate,
    /// A transitive dependent failed; only meaningful in keep-going mode.
    Unbuildable,
}

struct Node {
    target: TargetId,
    children: Vec<NodeId>,
    parents: Vec<NodeId>,
    state: NodeState,
}

/// The DAG for one goal target.  Node slots live in an arena and edges are
/// index lists, so the parent/child back-references cannot form ownership
/// cycles; removal detaches a node's edges and drops its name mapping,
/// clear() empties the arena between goals.
#[derive(Default)]
pub struct DependencyGraph {
    nodes: DenseMap<NodeId, Node>,
    node_for_target: HashMap<TargetId, NodeId>,
    root: Option<NodeId>,
    /// Up-to-date leaves found during a DFS pass; the graph must not
    /// mutate mid-traversal, so they are removed when the pass ends.
    nodes_to_remove: Vec<NodeId>,
    /// The batch of executable leaves collected by the last full search,
    /// handed out one call at a time.
    leaves: VecDeque<TargetId>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn is_empty(&self) -> bool {
        self.node_for_target.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.node_for_target.clear();
        self.root = None;
        self.nodes_to_remove.clear();
        self.leaves.clear();
    }

    /// Build the graph rooted at the given goal.  Dependent names with no
    /// target in the makefile are plain files: they get no node and are
    /// consulted only by the up-to-date check.  A dependent that already
    /// has a node (diamonds, cycles) gets an edge but is not descended
    /// into again.
    pub fn build(&mut self, makefile: &Makefile, goal: TargetId) {
        let root = self.create_node(goal, None);
        self.root = Some(root);
        self.build_subtree(makefile, root);
    }

    fn build_subtree(&mut self, makefile: &Makefile, node: NodeId) {
        let target = self.nodes.get(node).target;
        for dependent in &makefile.target(target).dependents {
            let Some(dependent) = makefile.target_id(dependent) else {
                continue;
            };
            match self.node_for_target.get(&dependent) {
                Some(&child) => self.add_edge(node, child),
                None => {
                    let child = self.create_node(dependent, Some(node));
                    self.build_subtree(makefile, child);
                }
            }
        }
    }

    fn create_node(&mut self, target: TargetId, parent: Option<NodeId>) -> NodeId {
        let node = self.nodes.push(Node {
            target,
            children: Vec::new(),
            parents: Vec::new(),
            state: NodeState::Unknown,
        });
        if let Some(parent) = parent {
            self.add_edge(parent, node);
        }
        self.node_for_target.insert(target, node);
        node
    }

    fn add_edge(&mut self, parent: NodeId, child: NodeId) {
        if !self.nodes.get(parent).children.contains(&child) {
            self.nodes.get_mut(parent).children.push(child);
        }
        if !self.nodes.get(child).parents.contains(&parent) {
            self.nodes.get_mut(child).parents.push(parent);
        }
    }

    /// A target is current iff it exists on disk and is no older than any
    /// of its declared dependents.  A missing dependent counts as
    /// brand-new, forcing the target out of date.
    pub fn is_target_up_to_date(
        &self,
        makefile: &Makefile,
        cache: &mut FileCache,
        target: TargetId,
    ) -> bool {
        let target = makefile.target(target);
        let mut mtime = cache.probe(&target.name);
        if !mtime.exists() {
            // A concurrent build may have produced it since the last probe.
            mtime = cache.restat(&target.name);
        }
        let Some(target_time) = mtime.timestamp() else {
            return false;
        };

        let mut latest = SystemTime::UNIX_EPOCH;
        for dependent in &target.dependents {
            match cache.probe(dependent) {
                MTime::Stamp(t) => {
                    if t > latest {
                        latest = t;
                    }
                }
                MTime::Missing => {
                    latest = SystemTime::now();
                    break;
                }
            }
        }
        target_time >= latest
    }

    /// Search for a leaf whose commands should run.  The first call of a
    /// round walks the whole graph: up-to-date leaves are pruned (after
    /// the pass, the traversal must not mutate the graph), every
    /// executable leaf is collected and marked Executing, inference rules
    /// are bound for the batch in one go, and the first leaf is returned.
    /// Subsequent calls drain the batch; None means nothing is available
    /// until a running target finishes.
    pub fn find_available_target(
        &mut self,
        makefile: &mut Makefile,
        cache: &mut FileCache,
    ) -> Option<TargetId> {
        if let Some(leaf) = self.leaves.pop_front() {
            // Late safety net for leaves that joined after their batch.
            let target = makefile.target(leaf);
            if target.commands.is_empty() && !target.inference_rules.is_empty() {
                makefile.apply_inference_rules(&[leaf], cache);
            }
            return Some(leaf);
        }

        loop {
            let mut result = None;
            loop {
                for node in std::mem::take(&mut self.nodes_to_remove) {
                    self.remove_node(node);
                }
                let Some(root) = self.root else {
                    break;
                };
                let mut visited = HashSet::new();
                result = self.search(makefile, cache, root, &mut visited);
                if result.is_some() || self.nodes_to_remove.is_empty() {
                    break;
                }
            }
            match result {
                Some(target) => self.leaves.push_back(target),
                None => break,
            }
        }

        if !self.leaves.is_empty() {
            let batch: Vec<TargetId> = self.leaves.iter().copied().collect();
            makefile.apply_inference_rules(&batch, cache);
        }
        self.leaves.pop_front()
    }

    /// Depth-first, first-child order.  Each node is visited once per
    /// pass; the visited set doubles as the cycle guard.
    fn search(
        &mut self,
        makefile: &Makefile,
        cache: &mut FileCache,
        node: NodeId,
        visited: &mut HashSet<NodeId>,
    ) -> Option<TargetId> {
        if !visited.insert(node) {
            return None;
        }

        let children = self.nodes.get(node).children.clone();
        if children.is_empty() {
            let state = self.nodes.get(node).state;
            if state == NodeState::Executing {
                return None;
            }

            if !makefile.options().build_all_targets {
                let target = self.nodes.get(node).target;
                if self.is_target_up_to_date(makefile, cache, target) {
                    if state != NodeState::UpToDate {
                        self.nodes.get_mut(node).state = NodeState::UpToDate;
                        self.nodes_to_remove.push(node);
                        self.display_build_info(makefile, cache, node);
                    }
                    return None;
                }
            }

            // An Unbuildable leaf keeps its state so the scheduler can
            // observe it and skip the target.
            if state != NodeState::Unbuildable {
                self.nodes.get_mut(node).state = NodeState::Executing;
            }
            self.display_build_info(makefile, cache, node);
            return Some(self.nodes.get(node).target);
        }

        for child in children {
            let result = self.search(makefile, cache, child, visited);
            if result.is_some() {
                return result;
            }
        }
        None
    }

    fn display_build_info(&self, makefile: &Makefile, cache: &mut FileCache, node: NodeId) {
        if !makefile.options().display_build_info {
            return;
        }
        let node = self.nodes.get(node);
        let marker = if node.state == NodeState::UpToDate {
            ' '
        } else {
            '*'
        };
        let name = &makefile.target(node.target).name;
        let time_stamp = match cache.probe(name) {
            MTime::Stamp(t) => chrono::DateTime::<chrono::Local>::from(t)
                .format("%y/%m/%d %H:%M:%S")
                .to_string(),
            MTime::Missing => String::new(),
        };
        println!("{}{} {}", marker, time_stamp, name);
    }

    /// Disconnect a finished (or discarded) leaf and drop it.
    pub fn remove_leaf(&mut self, target: TargetId) {
        if let Some(&node) = self.node_for_target.get(&target) {
            self.remove_node(node);
        }
    }

    fn remove_node(&mut self, node: NodeId) {
        let parents = std::mem::take(&mut self.nodes.get_mut(node).parents);
        for parent in parents {
            self.nodes.get_mut(parent).children.retain(|&c| c != node);
        }
        let children = std::mem::take(&mut self.nodes.get_mut(node).children);
        for child in children {
            self.nodes.get_mut(child).parents.retain(|&p| p != node);
        }
        self.node_for_target.remove(&self.nodes.get(node).target);
        if self.root == Some(node) {
            self.root = None;
        }
    }

    /// Poison every transitive parent of a failed target so the scheduler
    /// can skip them instead of misreporting success.  Must run before the
    /// failed leaf is removed, while the parent edges still exist.
    pub fn mark_parents_recursively_unbuildable(&mut self, target: TargetId) {
        let Some(&node) = self.node_for_target.get(&target) else {
            return;
        };
        let mut pending = self.nodes.get(node).parents.clone();
        while let Some(parent) = pending.pop() {
            let node = self.nodes.get_mut(parent);
            if node.state == NodeState::Unbuildable {
                continue;
            }
            node.state = NodeState::Unbuildable;
            pending.extend(node.parents.iter().copied());
        }
    }

    pub fn is_unbuildable(&self, target: TargetId) -> bool {
        self.node_for_target
            .get(&target)
            .map_or(false, |&node| self.nodes.get(node).state == NodeState::Unbuildable)
    }

    /// Print the graph as an indented tree, one target per line.
    pub fn dump(&self, makefile: &Makefile) {
        let mut out = Vec::new();
        self.dump_into(makefile, &mut out);
        let _ = std::io::stdout().write_all(&out);
    }

    pub fn dump_into(&self, makefile: &Makefile, out: &mut impl Write) {
        if let Some(root) = self.root {
            let mut on_path = Vec::new();
            self.dump_subtree(makefile, root, &mut String::new(), &mut on_path, out);
        }
    }

    fn dump_subtree(
        &self,
        makefile: &Makefile,
        node: NodeId,
        indent: &mut String,
        on_path: &mut Vec<NodeId>,
        out: &mut impl Write,
    ) {
        if on_path.contains(&node) {
            return;
        }
        let target = self.nodes.get(node).target;
        let _ = writeln!(out, "{}{}", indent, makefile.target(target).name);
        on_path.push(node);
        indent.push(' ');
        for &child in &self.nodes.get(node).children {
            self.dump_subtree(makefile, child, indent, on_path, out);
        }
        indent.pop();
        on_path.pop();
    }

    /// Print the graph in dot format, each distinct edge once.
    pub fn dump_dot(&self, makefile: &Makefile) {
        let mut out = Vec::new();
        self.dump_dot_into(makefile, &mut out);
        let _ = std::io::stdout().write_all(&out);
    }

    pub fn dump_dot_into(&self, makefile: &Makefile, out: &mut impl Write) {
        let _ = writeln!(out, "digraph G {{");
        if let Some(root) = self.root {
            let mut visited = HashSet::new();
            self.dump_dot_subtree(makefile, root, None, &mut visited, out);
        }
        let _ = writeln!(out, "}}");
    }

    fn dump_dot_subtree(
        &self,
        makefile: &Makefile,
        node: NodeId,
        parent: Option<NodeId>,
        visited: &mut HashSet<NodeId>,
        out: &mut impl Write,
    ) {
        if let Some(parent) = parent {
            let parent_name = &makefile.target(self.nodes.get(parent).target).name;
            let node_name = &makefile.target(self.nodes.get(node).target).name;
            let _ = writeln!(out, "  \"{}\" -> \"{}\";", parent_name, node_name);
        }
        if !visited.insert(node) {
            return;
        }
        for &child in &self.nodes.get(node).children {
            self.dump_dot_subtree(makefile, child, Some(node), visited, out);
        }
    }
}
