//! Internal implementation details

pub(crate) mod utils;
