pub mod backoff;
pub mod stats;

pub(crate) mod channel;
pub(crate) mod command;
pub(crate) mod result_matcher;
