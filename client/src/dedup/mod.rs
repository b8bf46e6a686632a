mod dedup_index;
mod response_cache;

pub(crate) use dedup_index::{Admission, DedupIndex};
pub(crate) use response_cache::ResponseCache;
