//! # Apilane Client
//! Multiplexes API commands onto independent, strictly ordered HTTP channels.
//! Commands are batched per channel, retried with backoff on transient
//! failures, deduplicated while in flight, optionally cached, and (when
//! acknowledged) reconciled with the action packets of the notification
//! stream before they settle.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

#[macro_use]
extern crate cfg_if;

pub mod transport;
pub mod shared {
    pub use apilane_shared::{
        strerror, ActionPacket, ApiCode, ApiError, Payload, PayloadKind, RequestId, SequenceTag,
        SubReply, TrackedReply, TransportError,
    };
}

mod channel;
mod client_config;
mod connectivity;
mod context;
mod dedup;
mod dispatcher;
mod options;
mod reconcile;
mod splitter;

pub use apilane_shared::strerror;
pub use channel::{
    backoff::{Backoff, BackoffConfig, RetryCause},
    stats::{ChannelPhase, ChannelStats, SessionCredential},
};
pub use client_config::{CacheConfig, ChannelSpec, ClientConfig, ReconcileConfig};
pub use connectivity::{AlwaysOnline, Connectivity, OnlineFlag};
pub use dispatcher::Dispatcher;
pub use options::{CacheLifetime, CachePolicy, CustomTarget, SubmitOptions};
pub use splitter::{
    JsonSplitter, JsonSplitterFactory, Splitter, SplitterFactory, SPLIT_DONE, SPLIT_PARTIAL,
    SPLIT_SYNTAX_ERROR,
};
