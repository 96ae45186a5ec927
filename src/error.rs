//! Error types used by kispec.
//!
//! Spec level failures are never errors: they end up as a
//! [`SpecState`](crate::report::SpecState) on a [`SpecReport`](crate::report::SpecReport).
//! The enums here cover the things that stop a suite from being built or
//! coordinated at all.

use std::{io, time::Duration};

use thiserror::Error;

use crate::{
    node::{CodeLocation, NodeType},
    table::ArgKind,
};

/// Structural misuse detected while assembling the node tree.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeAssemblyError {
    #[error("{node_type} at {location} must be declared at the top level, not inside a container")]
    SuiteNodeInContainer {
        node_type: NodeType,
        location: CodeLocation,
    },

    #[error("{node_type} at {location} is a second {kind} node; only one is allowed per suite")]
    MultipleSuiteNodes {
        node_type: NodeType,
        kind: &'static str,
        location: CodeLocation,
    },

    #[error("{node_type} at {location} cannot be decorated with both {first} and {second}")]
    MutuallyExclusiveDecorations {
        node_type: NodeType,
        first: &'static str,
        second: &'static str,
        location: CodeLocation,
    },

    #[error("{node_type} at {location} does not accept the {decoration} decoration")]
    InvalidDecoration {
        node_type: NodeType,
        decoration: &'static str,
        location: CodeLocation,
    },

    #[error(
        "{node_type} at {location} has a {decoration} but its body does not take a SpecContext"
    )]
    TimeoutOnNonContextNode {
        node_type: NodeType,
        decoration: &'static str,
        location: CodeLocation,
    },

    #[error("{node_type} at {location} must be declared inside an Ordered container")]
    SetupAllOutsideOrderedContainer {
        node_type: NodeType,
        location: CodeLocation,
    },

    #[error("invalid label {label:?} at {location}: {reason}")]
    InvalidLabel {
        label: String,
        reason: &'static str,
        location: CodeLocation,
    },

    #[error("invalid semantic version constraint {constraint:?} at {location}: {reason}")]
    InvalidSemVerConstraint {
        constraint: String,
        reason: String,
        location: CodeLocation,
    },

    #[error("table {text:?} at {location} has no entries")]
    EmptyTable { text: String, location: CodeLocation },

    #[error("{node_type} nodes cannot be registered directly (at {location})")]
    UnsupportedNodeType {
        node_type: NodeType,
        location: CodeLocation,
    },
}

impl TreeAssemblyError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::SuiteNodeInContainer { .. } => "tree_suite_node_in_container",
            Self::MultipleSuiteNodes { .. } => "tree_multiple_suite_nodes",
            Self::MutuallyExclusiveDecorations { .. } => "tree_mutually_exclusive_decorations",
            Self::InvalidDecoration { .. } => "tree_invalid_decoration",
            Self::TimeoutOnNonContextNode { .. } => "tree_timeout_on_non_context_node",
            Self::SetupAllOutsideOrderedContainer { .. } => "tree_setup_all_outside_ordered",
            Self::InvalidLabel { .. } => "tree_invalid_label",
            Self::InvalidSemVerConstraint { .. } => "tree_invalid_semver_constraint",
            Self::EmptyTable { .. } => "tree_empty_table",
            Self::UnsupportedNodeType { .. } => "tree_unsupported_node_type",
        }
    }
}

/// A table entry whose arguments do not fit the table body.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParameterMismatchError {
    #[error("entry at {location} passes {got} parameter(s) but the table body expects {expected}")]
    Arity {
        expected: usize,
        got: usize,
        location: CodeLocation,
    },

    #[error("entry at {location} passes a {got} as parameter {index} but the table body expects {expected}")]
    Type {
        index: usize,
        expected: ArgKind,
        got: ArgKind,
        location: CodeLocation,
    },
}

/// Errors from parsing a label filter expression.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelFilterError {
    #[error("unexpected {found} at position {position} in label filter {input:?}")]
    UnexpectedToken {
        found: String,
        position: usize,
        input: String,
    },

    #[error("label filter {input:?} ended unexpectedly")]
    UnexpectedEnd { input: String },

    #[error("unclosed regular expression starting at position {position} in label filter {input:?}")]
    UnclosedRegex { position: usize, input: String },

    #[error("invalid regular expression {pattern:?} in label filter: {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("unknown set operation {operation:?} in label filter {input:?}")]
    UnknownSetOperation { operation: String, input: String },
}

/// Errors from compiling a [`FilterConfig`](crate::filter::FilterConfig).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("invalid focus/skip pattern {pattern:?}: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error(transparent)]
    Label(#[from] LabelFilterError),

    #[error("invalid file filter {filter:?}: {reason}")]
    Location { filter: String, reason: String },

    #[error("invalid semantic version filter {version:?}: {source}")]
    SemVer {
        version: String,
        #[source]
        source: semver::Error,
    },
}

/// Errors from talking to the parallel synchronization server.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("synchronization transport failed: {0}")]
    Io(#[from] io::Error),

    #[error("malformed synchronization message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("unexpected response to {endpoint}: {response}")]
    UnexpectedResponse {
        endpoint: &'static str,
        response: String,
    },

    #[error("synchronization server rejected the request: {0}")]
    Server(String),

    #[error("the SynchronizedBeforeSuite primary function failed on process #1")]
    BeforeSuiteFailed,

    #[error("the ReportBeforeSuite node failed on process #1")]
    ReportBeforeSuiteFailed,

    #[error("process #1 disappeared before it could report back")]
    PrimaryProcessGone,

    #[error("interrupted while waiting on the synchronization server")]
    Interrupted,
}

impl SyncError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Io(_) => "sync_io",
            Self::Codec(_) => "sync_codec",
            Self::UnexpectedResponse { .. } => "sync_unexpected_response",
            Self::Server(_) => "sync_server",
            Self::BeforeSuiteFailed => "sync_before_suite_failed",
            Self::ReportBeforeSuiteFailed => "sync_report_before_suite_failed",
            Self::PrimaryProcessGone => "sync_primary_gone",
            Self::Interrupted => "sync_interrupted",
        }
    }
}

/// Invalid suite configuration.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidEnv { key: String, value: String },

    #[error("parallel process {process} is outside 1..={total}")]
    InvalidParallelProcess { process: usize, total: usize },

    #[error("parallel total must be at least 1")]
    NoParallelProcesses,

    #[error("flake attempts and must pass repeatedly cannot both be set globally")]
    ConflictingRetryPolicies,

    #[error("{name} must be greater than zero, got {value:?}")]
    ZeroDuration { name: &'static str, value: Duration },

    #[error("running {total} parallel processes needs a sync client or a sync server address")]
    MissingSyncServer { total: usize },
}

/// Errors returned by [`Suite`](crate::Suite).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SuiteError {
    #[error(transparent)]
    Tree(#[from] TreeAssemblyError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("signal handler installation failed: {0}")]
    Signal(String),

    #[error("the suite already ran; build a new one to run again")]
    AlreadyRan,
}

impl SuiteError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Tree(err) => err.as_label(),
            Self::Filter(_) => "suite_filter",
            Self::Config(_) => "suite_config",
            Self::Sync(err) => err.as_label(),
            Self::Signal(_) => "suite_signal",
            Self::AlreadyRan => "suite_already_ran",
        }
    }
}
