//! Tree construction.
//!
//! Nodes are declared through an explicit [`TreeBuilder`] handed to the
//! declaration closures. The builder is consumed by [`TreeBuilder::build`],
//! so nothing can be registered once the tree exists.
//!
//! ```
//! use kispec::{Decorations, Tree};
//!
//! let tree = Tree::build(|b| {
//!     b.describe("a container", |b| {
//!         b.before_each(|| ());
//!         b.it("does a thing", || ());
//!         b.it_with("is slow", Decorations::new().with_label("slow"), || ());
//!     });
//! })
//! .unwrap();
//! assert_eq!(tree.node_count(), 4);
//! ```

use std::sync::Arc;

use crate::{
    error::TreeAssemblyError,
    node::{Body, CodeLocation, Decorations, IntoBody, Node, NodeId, NodeResult, NodeType},
    report::{Report, SpecReport},
    table::{Entry, TableBody},
};

mod validate;

#[derive(Debug)]
pub(crate) struct TreeNode {
    pub node: Arc<Node>,
    pub children: Vec<TreeNode>,
}

/// An immutable, validated node tree.
#[derive(Debug)]
pub struct Tree {
    pub(crate) roots: Vec<TreeNode>,
    node_count: usize,
}

impl Tree {
    /// Shorthand for `TreeBuilder::new().build(f)`.
    pub fn build(f: impl FnOnce(&mut TreeBuilder)) -> Result<Tree, TreeAssemblyError> {
        TreeBuilder::new().build(f)
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Every node in declaration order, depth first.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        fn walk(nodes: &[TreeNode], out: &mut Vec<Arc<Node>>) {
            for tree_node in nodes {
                out.push(Arc::clone(&tree_node.node));
                walk(&tree_node.children, out);
            }
        }

        let mut out = Vec::with_capacity(self.node_count);
        walk(&self.roots, &mut out);
        out
    }
}

struct Frame {
    /// Ordered is inherited by nested containers.
    ordered: bool,
    children: Vec<TreeNode>,
}

/// Collects node declarations.
///
/// The first structural error is kept and every later declaration is
/// ignored; [`build`](TreeBuilder::build) reports it.
pub struct TreeBuilder {
    frames: Vec<Frame>,
    next_id: u32,
    node_count: usize,
    error: Option<TreeAssemblyError>,
    has_before_suite: bool,
    has_after_suite: bool,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self {
            frames: vec![Frame {
                ordered: false,
                children: Vec::new(),
            }],
            next_id: 1,
            node_count: 0,
            error: None,
            has_before_suite: false,
            has_after_suite: false,
        }
    }
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(mut self, f: impl FnOnce(&mut TreeBuilder)) -> Result<Tree, TreeAssemblyError> {
        f(&mut self);
        if let Some(err) = self.error {
            tracing::debug!(error = %err, label = err.as_label(), "tree assembly failed");
            return Err(err);
        }

        let roots = self.frames.pop().map(|frame| frame.children).unwrap_or_default();
        tracing::trace!(nodes = self.node_count, "tree built");
        Ok(Tree {
            roots,
            node_count: self.node_count,
        })
    }

    fn nesting_level(&self) -> usize {
        self.frames.len() - 1
    }

    fn fail(&mut self, err: TreeAssemblyError) {
        self.error.get_or_insert(err);
    }

    fn alloc(&mut self, node_type: NodeType, text: String, location: CodeLocation) -> Node {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.node_count += 1;
        Node::new(id, node_type, text, location, self.nesting_level())
    }

    fn attach(&mut self, tree_node: TreeNode) {
        if let Some(frame) = self.frames.last_mut() {
            frame.children.push(tree_node);
        }
    }

    fn prepare(
        &mut self,
        node_type: NodeType,
        text: String,
        decorations: Decorations,
        has_context: bool,
        location: CodeLocation,
    ) -> Option<Node> {
        if self.error.is_some() {
            return None;
        }
        match self.check(node_type, &decorations, has_context, &location) {
            Ok(constraints) => {
                let mut node = self.alloc(node_type, text, location);
                node.decorations = decorations;
                node.semver_constraints = constraints;
                Some(node)
            }
            Err(err) => {
                self.fail(err);
                None
            }
        }
    }

    fn check(
        &mut self,
        node_type: NodeType,
        decorations: &Decorations,
        has_context: bool,
        location: &CodeLocation,
    ) -> Result<Vec<semver::VersionReq>, TreeAssemblyError> {
        if node_type.is_cleanup() {
            return Err(TreeAssemblyError::UnsupportedNodeType {
                node_type,
                location: location.clone(),
            });
        }

        if node_type.is_suite_level() && self.nesting_level() > 0 {
            return Err(TreeAssemblyError::SuiteNodeInContainer {
                node_type,
                location: location.clone(),
            });
        }

        let class = match node_type {
            t if t.is_before_suite() => Some((&mut self.has_before_suite, "BeforeSuite")),
            t if t.is_after_suite() => Some((&mut self.has_after_suite, "AfterSuite")),
            _ => None,
        };
        if let Some((seen, kind)) = class {
            if *seen {
                return Err(TreeAssemblyError::MultipleSuiteNodes {
                    node_type,
                    kind,
                    location: location.clone(),
                });
            }
            *seen = true;
        }

        let in_ordered = self.frames.last().is_some_and(|frame| frame.ordered);
        if matches!(node_type, NodeType::BeforeAll | NodeType::AfterAll) && !in_ordered {
            return Err(TreeAssemblyError::SetupAllOutsideOrderedContainer {
                node_type,
                location: location.clone(),
            });
        }

        validate::check_decorations(node_type, decorations, has_context, location)?;
        validate::parse_semver_constraints(&decorations.semver_constraints, location)
    }

    /// Register a leaf or hook node.
    ///
    /// Containers go through [`describe_with`](Self::describe_with) and
    /// cleanup nodes through `SpecContext::defer_cleanup`.
    #[track_caller]
    pub fn register<M>(
        &mut self,
        node_type: NodeType,
        text: impl Into<String>,
        decorations: Decorations,
        body: impl IntoBody<M>,
    ) -> &mut Self {
        let location = CodeLocation::caller();
        if node_type == NodeType::Container {
            self.fail(TreeAssemblyError::UnsupportedNodeType {
                node_type,
                location,
            });
            return self;
        }
        self.register_body(node_type, text.into(), decorations, body.into_body(), location)
    }

    fn register_body(
        &mut self,
        node_type: NodeType,
        text: String,
        decorations: Decorations,
        body: Body,
        location: CodeLocation,
    ) -> &mut Self {
        let has_context = body.shape() == crate::node::BodyShape::Context;
        if let Some(node) = self.prepare(node_type, text, decorations, has_context, location) {
            self.attach(TreeNode {
                node: Arc::new(node.with_body(body)),
                children: Vec::new(),
            });
        }
        self
    }

    #[track_caller]
    pub fn describe(&mut self, text: impl Into<String>, f: impl FnOnce(&mut TreeBuilder)) -> &mut Self {
        self.describe_with(text, Decorations::default(), f)
    }

    #[track_caller]
    pub fn describe_with(
        &mut self,
        text: impl Into<String>,
        decorations: Decorations,
        f: impl FnOnce(&mut TreeBuilder),
    ) -> &mut Self {
        let location = CodeLocation::caller();
        let Some(node) = self.prepare(NodeType::Container, text.into(), decorations, false, location)
        else {
            return self;
        };

        let ordered = node.decorations.ordered || self.frames.last().is_some_and(|frame| frame.ordered);
        self.frames.push(Frame {
            ordered,
            children: Vec::new(),
        });
        f(self);
        let children = self.frames.pop().map(|frame| frame.children).unwrap_or_default();
        self.attach(TreeNode {
            node: Arc::new(node),
            children,
        });
        self
    }

    #[track_caller]
    pub fn it<M>(&mut self, text: impl Into<String>, body: impl IntoBody<M>) -> &mut Self {
        self.register(NodeType::It, text, Decorations::default(), body)
    }

    #[track_caller]
    pub fn it_with<M>(
        &mut self,
        text: impl Into<String>,
        decorations: Decorations,
        body: impl IntoBody<M>,
    ) -> &mut Self {
        self.register(NodeType::It, text, decorations, body)
    }

    #[track_caller]
    pub fn before_each<M>(&mut self, body: impl IntoBody<M>) -> &mut Self {
        self.register(NodeType::BeforeEach, "", Decorations::default(), body)
    }

    #[track_caller]
    pub fn just_before_each<M>(&mut self, body: impl IntoBody<M>) -> &mut Self {
        self.register(NodeType::JustBeforeEach, "", Decorations::default(), body)
    }

    #[track_caller]
    pub fn after_each<M>(&mut self, body: impl IntoBody<M>) -> &mut Self {
        self.register(NodeType::AfterEach, "", Decorations::default(), body)
    }

    #[track_caller]
    pub fn just_after_each<M>(&mut self, body: impl IntoBody<M>) -> &mut Self {
        self.register(NodeType::JustAfterEach, "", Decorations::default(), body)
    }

    #[track_caller]
    pub fn before_all<M>(&mut self, body: impl IntoBody<M>) -> &mut Self {
        self.register(NodeType::BeforeAll, "", Decorations::default(), body)
    }

    #[track_caller]
    pub fn after_all<M>(&mut self, body: impl IntoBody<M>) -> &mut Self {
        self.register(NodeType::AfterAll, "", Decorations::default(), body)
    }

    #[track_caller]
    pub fn before_suite<M>(&mut self, body: impl IntoBody<M>) -> &mut Self {
        self.register(NodeType::BeforeSuite, "", Decorations::default(), body)
    }

    #[track_caller]
    pub fn after_suite<M>(&mut self, body: impl IntoBody<M>) -> &mut Self {
        self.register(NodeType::AfterSuite, "", Decorations::default(), body)
    }

    /// `primary` runs on process #1 only and returns the payload that every
    /// process' `all` body then receives.
    #[track_caller]
    pub fn synchronized_before_suite<M, F, T>(&mut self, primary: impl IntoBody<M>, all: F) -> &mut Self
    where
        F: Fn(&[u8]) -> T + Send + Sync + 'static,
        T: Into<NodeResult>,
    {
        self.synchronized_before_suite_with(Decorations::default(), primary.into_body(), Body::with_payload(all))
    }

    #[track_caller]
    pub fn synchronized_before_suite_with(
        &mut self,
        decorations: Decorations,
        primary: Body,
        all: Body,
    ) -> &mut Self {
        self.register_synchronized(NodeType::SynchronizedBeforeSuite, decorations, primary, all)
    }

    /// `all` runs on every process; `primary` runs on process #1 once every
    /// other process has finished.
    #[track_caller]
    pub fn synchronized_after_suite<M1, M2>(
        &mut self,
        all: impl IntoBody<M1>,
        primary: impl IntoBody<M2>,
    ) -> &mut Self {
        self.register_synchronized(
            NodeType::SynchronizedAfterSuite,
            Decorations::default(),
            primary.into_body(),
            all.into_body(),
        )
    }

    #[track_caller]
    fn register_synchronized(
        &mut self,
        node_type: NodeType,
        decorations: Decorations,
        primary: Body,
        all: Body,
    ) -> &mut Self {
        let location = CodeLocation::caller();
        let has_context = [&primary, &all]
            .iter()
            .all(|body| body.shape() == crate::node::BodyShape::Context);
        if let Some(mut node) = self.prepare(node_type, String::new(), decorations, has_context, location) {
            node.primary_body = Some(primary);
            self.attach(TreeNode {
                node: Arc::new(node.with_body(all)),
                children: Vec::new(),
            });
        }
        self
    }

    #[track_caller]
    pub fn report_before_each<F, T>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&SpecReport) -> T + Send + Sync + 'static,
        T: Into<NodeResult>,
    {
        self.register(NodeType::ReportBeforeEach, "", Decorations::default(), Body::for_spec_report(f))
    }

    #[track_caller]
    pub fn report_after_each<F, T>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&SpecReport) -> T + Send + Sync + 'static,
        T: Into<NodeResult>,
    {
        self.register(NodeType::ReportAfterEach, "", Decorations::default(), Body::for_spec_report(f))
    }

    #[track_caller]
    pub fn report_before_suite<F, T>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&Report) -> T + Send + Sync + 'static,
        T: Into<NodeResult>,
    {
        self.register(NodeType::ReportBeforeSuite, "", Decorations::default(), Body::for_suite_report(f))
    }

    #[track_caller]
    pub fn report_after_suite<F, T>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&Report) -> T + Send + Sync + 'static,
        T: Into<NodeResult>,
    {
        self.register(NodeType::ReportAfterSuite, "", Decorations::default(), Body::for_suite_report(f))
    }

    /// A container with one `It` per entry, all sharing `body`.
    #[track_caller]
    pub fn table(
        &mut self,
        text: impl Into<String>,
        decorations: Decorations,
        body: TableBody,
        entries: impl IntoIterator<Item = Entry>,
    ) -> &mut Self {
        let location = CodeLocation::caller();
        let text = text.into();
        let entries: Vec<Entry> = entries.into_iter().collect();
        if entries.is_empty() {
            self.fail(TreeAssemblyError::EmptyTable { text, location });
            return self;
        }

        let Some(node) = self.prepare(NodeType::Container, text, decorations, false, location) else {
            return self;
        };
        let ordered = node.decorations.ordered || self.frames.last().is_some_and(|frame| frame.ordered);
        self.frames.push(Frame {
            ordered,
            children: Vec::new(),
        });
        for entry in &entries {
            let description = body.describe(entry);
            let bound = body.bind(entry);
            self.register_body(
                NodeType::It,
                description,
                entry.decorations.clone(),
                bound,
                entry.location.clone(),
            );
        }
        let children = self.frames.pop().map(|frame| frame.children).unwrap_or_default();
        self.attach(TreeNode {
            node: Arc::new(node),
            children,
        });
        self
    }
}
