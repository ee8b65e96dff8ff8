//! Manager protocol plumbing for pbxwatch.
//!
//! The PBX exposes a line-oriented management protocol: records are runs of
//! `Key: Value` lines terminated by a blank line, in both directions. This
//! crate owns everything about that wire format and nothing about what the
//! events mean for monitored state:
//!
//! - [`RecordDecoder`] frames raw lines into [`EventRecord`]s and
//!   [`encode_action`] serializes outbound commands.
//! - [`ManagerEvent`] is the closed set of event families the monitor
//!   consumes, decoded with lenient defaults (missing fields are empty,
//!   non-numeric counters are zero).
//! - [`ManagerClient`] owns the TCP connection: login, a read side handed
//!   out as an [`EventStream`], and a mutually exclusive write path so two
//!   concurrent commands never interleave their lines.
//!
//! Reconnect policy is left to the caller; a closed stream simply ends.

mod client;
mod error;
mod event;
mod frame;

pub use client::{
    run_bootstrap, BootstrapPlan, ConnectOptions, EventStream, ManagerClient, BOOTSTRAP_ACTIONS,
    MAX_LINE_BYTES,
};
pub use error::AmiError;
pub use event::{ChannelSignal, ManagerEvent};
pub use frame::{encode_action, EventRecord, RecordDecoder};
