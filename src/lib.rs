pub mod aggregate;
pub mod cli;
pub mod config;
pub mod error;
pub mod faiss;
pub mod flow;
pub mod index;
pub mod info;
pub mod manager;
pub mod matcher;
pub mod segment;
pub mod sift;
pub mod store;
#[cfg(test)]
mod testing;
pub mod utils;

pub use config::Opts;
pub use error::{Error, Result};
pub use manager::{CacheManager, Gallery};
