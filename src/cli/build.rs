use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::task::block_in_place;

use crate::cli::{SubCommandExtend, open_manager};
use crate::config::{IndexOptions, Opts, SiftOptions};

#[derive(Parser, Debug, Clone)]
pub struct BuildCommand {
    #[command(flatten)]
    pub sift: SiftOptions,
    #[command(flatten)]
    pub index: IndexOptions,
    /// 类别名称，`all` 表示图库中的所有类别
    pub category: String,
}

impl SubCommandExtend for BuildCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let manager = open_manager(opts, &self.sift, &self.index);
        let gallery = block_in_place(|| manager.gallery(&self.category))?;
        let cache = &gallery.cache;
        info!("构建成功");
        println!("类别    : {}", cache.category);
        println!("图片数量: {}", cache.records.len());
        println!("描述符  : {} x {}", cache.descriptors.nrows(), cache.dim());
        println!("索引    : {} 个向量", gallery.index.ntotal());
        Ok(())
    }
}
