//! # Apilane Shared
//! Wire-level vocabulary shared by the request engine and its callers:
//! result codes, error taxonomy, payloads, sequence tags and action packets.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod action_packet;
mod codes;
mod error;
mod payload;
mod reply;
mod request_id;
mod sequence_tag;
mod types;

pub use action_packet::{ActionPacket, ACTION_FIELD, TAG_FIELD};
pub use codes::{strerror, ApiCode, CodeError};
pub use error::{ApiError, TransportError};
pub use payload::{Fingerprint, Payload, PayloadError, PayloadKind, REQUEST_ID_FIELD};
pub use reply::{SubReply, TrackedReply};
pub use request_id::{RequestId, RequestIdGenerator};
pub use sequence_tag::{split_tagged_result, SequenceTag, TagError};
pub use types::{ChannelIndex, ExchangeSeqNo, SessionScope};
