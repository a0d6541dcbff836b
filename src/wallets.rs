pub(crate) mod balance;
pub(crate) mod context;
pub(crate) mod traits;
