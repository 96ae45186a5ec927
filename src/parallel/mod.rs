//! Coordination between the processes of a parallel run.
//!
//! Process #1 is the primary: it runs the primary halves of synchronized
//! suite nodes, the serial specs and the `ReportAfterSuite` nodes. The other
//! processes wait on it (or it on them) through a [`SyncClient`].

mod client;
pub mod protocol;
mod server;
mod tcp;

pub use client::{AggregatedReports, HeartbeatGuard, LocalClient, SyncClient};
pub use server::SyncServer;
pub use tcp::{TcpClient, TcpSyncServer};
