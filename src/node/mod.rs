//! The node model.
//!
//! A [`Node`] is one declared unit of behavior: a container, a leaf `It`, a
//! setup or teardown hook, a report hook or a dynamically registered cleanup.
//! Nodes are created by the [`TreeBuilder`](crate::tree::TreeBuilder) and are
//! immutable afterwards; everything downstream shares them as `Arc<Node>`.

use std::{fmt, panic::Location};

use serde::{Deserialize, Serialize};

mod body;
pub use body::*;

mod decorations;
pub use decorations::*;

/// Identity of a node within one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Container,
    It,
    BeforeEach,
    JustBeforeEach,
    AfterEach,
    JustAfterEach,
    BeforeAll,
    AfterAll,
    BeforeSuite,
    AfterSuite,
    SynchronizedBeforeSuite,
    SynchronizedAfterSuite,
    ReportBeforeSuite,
    ReportAfterSuite,
    ReportBeforeEach,
    ReportAfterEach,
    CleanupAfterEach,
    CleanupAfterAll,
    CleanupAfterSuite,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Container => "Container",
            NodeType::It => "It",
            NodeType::BeforeEach => "BeforeEach",
            NodeType::JustBeforeEach => "JustBeforeEach",
            NodeType::AfterEach => "AfterEach",
            NodeType::JustAfterEach => "JustAfterEach",
            NodeType::BeforeAll => "BeforeAll",
            NodeType::AfterAll => "AfterAll",
            NodeType::BeforeSuite => "BeforeSuite",
            NodeType::AfterSuite => "AfterSuite",
            NodeType::SynchronizedBeforeSuite => "SynchronizedBeforeSuite",
            NodeType::SynchronizedAfterSuite => "SynchronizedAfterSuite",
            NodeType::ReportBeforeSuite => "ReportBeforeSuite",
            NodeType::ReportAfterSuite => "ReportAfterSuite",
            NodeType::ReportBeforeEach => "ReportBeforeEach",
            NodeType::ReportAfterEach => "ReportAfterEach",
            NodeType::CleanupAfterEach => "DeferCleanup",
            NodeType::CleanupAfterAll => "DeferCleanup (All)",
            NodeType::CleanupAfterSuite => "DeferCleanup (Suite)",
        }
    }

    /// Nodes that only exist at the top level and run once per process.
    pub fn is_suite_level(self) -> bool {
        self.is_before_suite()
            || self.is_after_suite()
            || matches!(self, NodeType::ReportBeforeSuite | NodeType::ReportAfterSuite)
    }

    pub fn is_before_suite(self) -> bool {
        matches!(
            self,
            NodeType::BeforeSuite | NodeType::SynchronizedBeforeSuite
        )
    }

    pub fn is_after_suite(self) -> bool {
        matches!(self, NodeType::AfterSuite | NodeType::SynchronizedAfterSuite)
    }

    /// Nodes that observe reports and still run after a second interrupt.
    pub fn is_report(self) -> bool {
        matches!(
            self,
            NodeType::ReportBeforeEach
                | NodeType::ReportAfterEach
                | NodeType::ReportBeforeSuite
                | NodeType::ReportAfterSuite
        )
    }

    pub fn is_cleanup(self) -> bool {
        matches!(
            self,
            NodeType::CleanupAfterEach | NodeType::CleanupAfterAll | NodeType::CleanupAfterSuite
        )
    }

    /// Setup, teardown and per-spec report nodes that become part of a spec's
    /// ancestor chain when declared inside (or at the top of) a container.
    pub(crate) fn is_chain_member(self) -> bool {
        matches!(
            self,
            NodeType::BeforeEach
                | NodeType::JustBeforeEach
                | NodeType::AfterEach
                | NodeType::JustAfterEach
                | NodeType::BeforeAll
                | NodeType::AfterAll
                | NodeType::ReportBeforeEach
                | NodeType::ReportAfterEach
        )
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a node (or a failure) was declared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CodeLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl CodeLocation {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    /// The location of the caller, resolved through `#[track_caller]` frames.
    #[track_caller]
    pub fn caller() -> Self {
        Self::from(Location::caller())
    }
}

impl From<&Location<'_>> for CodeLocation {
    fn from(location: &Location<'_>) -> Self {
        Self::new(location.file(), location.line(), location.column())
    }
}

impl fmt::Display for CodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// One declared unit of behavior.
#[derive(Debug)]
#[non_exhaustive]
pub struct Node {
    pub id: NodeId,
    pub node_type: NodeType,
    pub text: String,
    pub location: CodeLocation,
    pub nesting_level: usize,
    pub decorations: Decorations,
    pub(crate) body: Option<Body>,
    /// The process #1 half of a synchronized suite node.
    pub(crate) primary_body: Option<Body>,
    pub(crate) semver_constraints: Vec<semver::VersionReq>,
}

impl Node {
    pub(crate) fn new(
        id: NodeId,
        node_type: NodeType,
        text: impl Into<String>,
        location: CodeLocation,
        nesting_level: usize,
    ) -> Self {
        Self {
            id,
            node_type,
            text: text.into(),
            location,
            nesting_level,
            decorations: Decorations::default(),
            body: None,
            primary_body: None,
            semver_constraints: Vec::new(),
        }
    }

    pub(crate) fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn primary_body(&self) -> Option<&Body> {
        self.primary_body.as_ref()
    }

    /// Whether the node's body observes a [`SpecContext`](crate::context::SpecContext) and
    /// can therefore be cancelled.
    pub fn has_context(&self) -> bool {
        self.body
            .iter()
            .chain(self.primary_body.iter())
            .any(|body| body.shape() == BodyShape::Context)
    }

    pub fn semver_constraints(&self) -> &[semver::VersionReq] {
        &self.semver_constraints
    }

    /// A human readable name, falling back to the node type for unnamed hooks.
    pub fn display_text(&self) -> &str {
        match self.text.is_empty() {
            true => self.node_type.as_str(),
            false => &self.text,
        }
    }
}
