//! Runnable specs.
//!
//! [`generate`] flattens a [`Tree`] into one [`Spec`] per `It`. Each spec
//! carries its full ancestor chain: for every level, the container followed
//! by the setup, teardown and report hooks declared directly inside it, and
//! finally the leaf itself.

use std::{sync::Arc, time::Duration};

use crate::{
    node::{Node, NodeId, NodeType},
    tree::{Tree, TreeNode},
};

#[derive(Debug, Clone)]
pub struct Spec {
    pub(crate) nodes: Vec<Arc<Node>>,
    /// Set by filtering.
    pub skip: bool,
    /// Position in declaration order.
    pub(crate) index: usize,
}

impl Spec {
    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn leaf(&self) -> &Arc<Node> {
        // Every generated chain ends with its It node.
        &self.nodes[self.nodes.len() - 1]
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn containers(&self) -> impl DoubleEndedIterator<Item = &Arc<Node>> {
        self.nodes
            .iter()
            .filter(|node| node.node_type == NodeType::Container)
    }

    /// Containers and the leaf, outermost first.
    fn decorated(&self) -> impl DoubleEndedIterator<Item = &Arc<Node>> {
        self.containers().chain(std::iter::once(self.leaf()))
    }

    pub fn nodes_of(&self, node_type: NodeType) -> impl Iterator<Item = &Arc<Node>> {
        self.nodes
            .iter()
            .filter(move |node| node.node_type == node_type)
    }

    /// Container texts and the leaf text joined by spaces.
    pub fn text(&self) -> String {
        self.decorated()
            .map(|node| node.text.as_str())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Labels of the containers and the leaf, deduplicated in declaration order.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        for label in self.decorated().flat_map(|node| &node.decorations.labels) {
            if !labels.contains(label) {
                labels.push(label.clone());
            }
        }
        labels
    }

    pub fn is_pending(&self) -> bool {
        self.decorated().any(|node| node.decorations.pending)
    }

    pub fn is_serial(&self) -> bool {
        self.decorated().any(|node| node.decorations.serial)
    }

    /// Whether any node in the chain carries Focus, before the nested focus
    /// policy is applied.
    pub fn is_focused(&self) -> bool {
        self.focused_nodes().next().is_some()
    }

    pub(crate) fn focused_nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.decorated().filter(|node| node.decorations.focus)
    }

    /// The outermost Ordered container, which is the unit that moves as a block.
    pub fn ordered_container(&self) -> Option<NodeId> {
        self.containers()
            .find(|node| node.decorations.ordered)
            .map(|node| node.id)
    }

    pub fn is_in_ordered_container(&self) -> bool {
        self.ordered_container().is_some()
    }

    pub fn continue_on_failure(&self) -> bool {
        self.containers()
            .find(|node| node.decorations.ordered)
            .is_some_and(|node| node.decorations.continue_on_failure)
    }

    pub fn top_level_container(&self) -> Option<NodeId> {
        self.containers().next().map(|node| node.id)
    }

    pub fn flake_attempts(&self) -> Option<u32> {
        self.decorated()
            .rev()
            .find_map(|node| node.decorations.flake_attempts)
    }

    pub fn must_pass_repeatedly(&self) -> Option<u32> {
        self.decorated()
            .rev()
            .find_map(|node| node.decorations.must_pass_repeatedly)
    }

    pub fn spec_timeout(&self) -> Option<Duration> {
        self.leaf().decorations.spec_timeout
    }

    /// Effective priority: the nearest declaring node wins, default 0.
    pub fn priority(&self) -> i32 {
        self.decorated()
            .rev()
            .find_map(|node| node.decorations.spec_priority)
            .unwrap_or(0)
    }

    pub fn semver_constraints(&self) -> impl Iterator<Item = &semver::VersionReq> {
        self.decorated().flat_map(|node| node.semver_constraints())
    }

    /// The node's own grace period, else the leaf's.
    pub fn grace_period_for(&self, node: &Node) -> Option<Duration> {
        node.decorations
            .grace_period
            .or(self.leaf().decorations.grace_period)
    }

    pub fn poll_progress_for(&self, node: &Node) -> (Option<Duration>, Option<Duration>) {
        let after = node.decorations.poll_progress_after.or_else(|| {
            self.decorated()
                .rev()
                .find_map(|node| node.decorations.poll_progress_after)
        });
        let interval = node.decorations.poll_progress_interval.or_else(|| {
            self.decorated()
                .rev()
                .find_map(|node| node.decorations.poll_progress_interval)
        });
        (after, interval)
    }

    /// The container that directly holds `node`.
    pub fn parent_container(&self, node: &Node) -> Option<NodeId> {
        let level = node.nesting_level.checked_sub(1)?;
        self.containers()
            .find(|container| container.nesting_level == level)
            .map(|container| container.id)
    }
}

/// Suite level nodes in execution order.
#[derive(Debug, Clone, Default)]
pub struct SuiteNodes {
    pub report_before_suite: Vec<Arc<Node>>,
    pub before_suite: Option<Arc<Node>>,
    pub after_suite: Option<Arc<Node>>,
    pub report_after_suite: Vec<Arc<Node>>,
}

pub fn generate(tree: &Tree) -> (Vec<Spec>, SuiteNodes) {
    let mut suite = SuiteNodes::default();
    for tree_node in &tree.roots {
        let node = &tree_node.node;
        match node.node_type {
            NodeType::ReportBeforeSuite => suite.report_before_suite.push(Arc::clone(node)),
            NodeType::ReportAfterSuite => suite.report_after_suite.push(Arc::clone(node)),
            t if t.is_before_suite() => suite.before_suite = Some(Arc::clone(node)),
            t if t.is_after_suite() => suite.after_suite = Some(Arc::clone(node)),
            _ => {}
        }
    }

    let mut specs = Vec::new();
    walk(&tree.roots, &[], &mut specs);
    tracing::debug!(specs = specs.len(), "generated specs");
    (specs, suite)
}

fn walk(children: &[TreeNode], prefix: &[Arc<Node>], specs: &mut Vec<Spec>) {
    let mut base = prefix.to_vec();
    base.extend(
        children
            .iter()
            .filter(|child| child.node.node_type.is_chain_member())
            .map(|child| Arc::clone(&child.node)),
    );

    for child in children {
        match child.node.node_type {
            NodeType::It => {
                let mut nodes = base.clone();
                nodes.push(Arc::clone(&child.node));
                let index = specs.len();
                specs.push(Spec {
                    nodes,
                    skip: false,
                    index,
                });
            }
            NodeType::Container => {
                let mut nested = base.clone();
                nested.push(Arc::clone(&child.node));
                walk(&child.children, &nested, specs);
            }
            _ => {}
        }
    }
}
