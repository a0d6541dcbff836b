pub(crate) mod retry_policy;
pub(crate) mod rpc_client;
