pub mod filter;
pub mod partition;
pub mod status;
pub mod summary;
