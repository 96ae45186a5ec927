//! kispec runs hierarchical specs.
//!
//! A suite is a tree of containers, setup and teardown nodes and leaf
//! specs, assembled with a [`TreeBuilder`]. Every leaf becomes a [`Spec`]:
//! the chain of nodes from the root down to it. The suite filters, orders
//! and distributes those specs over one or more processes and runs each of
//! them with its setup and teardown, reporting through a [`Reporter`].
//!
//! ```
//! use kispec::{Decorations, NoReporter, SpecState, Suite, SuiteConfig};
//!
//! let mut suite = Suite::build(SuiteConfig::new().with_seed(7), |b| {
//!     b.describe_with("a database", Decorations::new().ordered(), |b| {
//!         b.before_all(|| ());
//!         b.it("connects", || ());
//!         b.it("queries", || kispec::fail("no rows"));
//!     });
//! })
//! .unwrap();
//!
//! let report = suite.run(&mut NoReporter).unwrap();
//! assert!(!report.suite_succeeded);
//! assert_eq!(report.find("queries").unwrap().state, SpecState::Failed);
//! ```

pub mod config;
pub mod distribute;
pub mod error;
pub mod filter;
pub mod node;
pub mod order;
pub mod parallel;
pub mod report;
pub mod reporter;
pub mod spec;
pub mod table;

mod capture;
mod cleanup;
mod context;
mod interrupt;
mod progress;
mod runner;
mod suite;
mod task;
mod tree;
mod util;

#[cfg(test)]
mod test_support;

pub use capture::SpecWriter;
pub use config::SuiteConfig;
pub use context::{CancelCause, Cancelled, Done, SpecContext};
pub use error::{
    ConfigError, FilterError, LabelFilterError, ParameterMismatchError, SuiteError, SyncError, TreeAssemblyError,
};
pub use filter::FilterConfig;
pub use interrupt::{InterruptCause, InterruptHandler, InterruptLevel, InterruptStatus, TimeoutScope};
pub use node::{
    Body, CodeLocation, Decorations, IntoBody, NodeOutcome, NodeResult, NodeType, abort, fail, skip,
};
pub use progress::ProgressReport;
pub use report::{Failure, Report, SpecReport, SpecState};
pub use reporter::{LogReporter, NoReporter, Reporter};
pub use spec::Spec;
pub use suite::{Phase, Suite};
pub use table::{Arg, ArgKind, Args, Entry, TableBody};
pub use task::{TaskState, TaskSummary};
pub use tree::{Tree, TreeBuilder};
