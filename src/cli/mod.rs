mod build;
mod clean;
mod r#match;
mod multi;

pub use build::*;
pub use clean::*;
pub use r#match::*;
pub use multi::*;

use clap::ValueEnum;

use crate::config::{IndexOptions, Opts, SiftOptions};
use crate::manager::CacheManager;
use crate::sift::SiftDetector;
use crate::store::DescriptorStore;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}

fn open_manager(opts: &Opts, sift: &SiftOptions, index: &IndexOptions) -> CacheManager {
    let store = DescriptorStore::new(opts.layout(), &opts.suffix);
    CacheManager::new(store, index.clone(), SiftDetector::factory(sift.clone()))
}
