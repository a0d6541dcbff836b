//! Transfer lifecycle tracking, outgoing message resolution and the bridge HTTP API.

pub(crate) mod executed;
pub(crate) mod pending;
pub(crate) mod resolver;
pub(crate) mod status;
pub(crate) mod store;
pub(crate) mod types;
