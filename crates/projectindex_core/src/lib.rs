pub mod classify;
pub mod config;
pub mod identity;
pub mod resolve;
pub mod scan;
pub mod source;
pub mod store;
pub mod sync;
pub mod titles;

#[cfg(test)]
pub(crate) mod fixtures;
