use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::store::DescriptorStore;

#[derive(Parser, Debug, Clone)]
pub struct CleanCommand {
    /// 类别名称
    pub category: String,
}

impl SubCommandExtend for CleanCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let store = DescriptorStore::new(opts.layout(), &opts.suffix);
        info!("清理缓存中……");
        let removed = store.invalidate(&self.category)?;
        info!("清理完成，删除了 {} 个文件", removed);
        Ok(())
    }
}
