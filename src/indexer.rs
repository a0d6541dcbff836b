//! Transfer history: chunked log scans, event decoding and the dual-source fetcher.

pub(crate) mod batch;
pub(crate) mod dedup;
pub(crate) mod events;
pub(crate) mod fetcher;
pub(crate) mod priority;
pub(crate) mod tokens;
