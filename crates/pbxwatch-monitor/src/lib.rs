//! Live agent/call/queue state reconstructed from the PBX event stream.
//!
//! Data flows in one direction:
//!
//! ```text
//! EventStream ─▶ Normalizer ─(TenantResolver)─▶ {AgentStore, CallStore, QueueStore} ─▶ Fanout ─▶ observers
//! ```
//!
//! The [`Normalizer`] is the protocol state machine. It is driven by a
//! single ingestion task, so events are applied strictly in wire order. The
//! stores are plain in-memory maps keyed by tenant, each behind its own
//! lock, and every mutation pokes that tenant's subscribers through a
//! non-blocking [`Fanout`]. A slow observer loses notifications, never
//! stalls ingestion; the next mutation notifies again and the observer
//! re-reads a full snapshot.
//!
//! Missed hangups are healed by the reconciliation sweep in [`sweep`],
//! which diffs a full channel enumeration against the stored calls.
//! Operator commands in [`commands`] flow the other way: read a snapshot,
//! send one command frame, update the stores optimistically.

pub mod commands;
mod error;
mod fanout;
mod identify;
mod normalizer;
mod resolver;
mod stores;
pub mod sweep;
mod sync;

pub use commands::{HangupReceipt, OperatorCommands};
pub use error::{CommandError, DirectoryError};
pub use fanout::{Fanout, StoreKind, Subscription};
pub use identify::{agent_from_channel, agent_from_device, ip_from_address, ip_from_uri, IpCache};
pub use normalizer::{Normalizer, NormalizerOptions};
pub use resolver::{extract_extension, EndpointDirectory, SqliteDirectory, TenantCache, TenantResolver};
pub use stores::{AgentStore, CallLeg, CallStore, LegRemoval, Monitor, QueueStore};
