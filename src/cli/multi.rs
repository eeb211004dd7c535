use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use futures::future::try_join_all;
use tokio::task::block_in_place;

use crate::aggregate::{Aggregator, BatchOutcome};
use crate::cli::{OutputFormat, SubCommandExtend, open_manager};
use crate::config::{ALL_CATEGORY, IndexOptions, MatchOptions, Opts, SiftOptions};
use crate::info::InfoStore;
use crate::sift::SiftDetector;

#[derive(Parser, Debug, Clone)]
pub struct MultiCommand {
    #[command(flatten)]
    pub sift: SiftOptions,
    #[command(flatten)]
    pub index: IndexOptions,
    #[command(flatten)]
    pub matching: MatchOptions,
    /// 裁切好的卡片图片，每张图片一张卡片
    pub images: Vec<PathBuf>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for MultiCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let images = try_join_all(self.images.iter().map(|path| async move {
            tokio::fs::read(path).await.with_context(|| format!("无法读取 {}", path.display()))
        }))
        .await?;

        let manager = open_manager(opts, &self.sift, &self.index);
        let info = InfoStore::new(opts.layout().info);

        let outcome = block_in_place(|| -> Result<BatchOutcome> {
            let gallery = manager.gallery(ALL_CATEGORY)?;
            let mut sift = SiftDetector::create(&self.sift)?;
            let aggregator = Aggregator::new(&gallery, &info, self.matching.ratio);
            Ok(aggregator.run(images.as_slice(), &mut sift)?)
        })?;

        print_outcome(&outcome, self.output_format)
    }
}

fn print_outcome(outcome: &BatchOutcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(outcome)?),
        OutputFormat::Table => match outcome {
            BatchOutcome::Empty => println!("没有输入图片"),
            BatchOutcome::Unidentified { skipped } => {
                println!("没有识别出任何卡片（{} 张图片）", skipped)
            }
            BatchOutcome::Identified(report) => {
                for (card_id, tally) in &report.cards {
                    let name = tally.info.as_ref().map_or("-", |info| info.name_jp.as_str());
                    println!("{}\t{}\t{}\t{}", card_id, tally.count, name, tally.gallery_name);
                }
                println!(
                    "共识别 {} 张，{} 种，跳过 {} 张",
                    report.total(),
                    report.kinds(),
                    report.skipped
                );
            }
        },
    }
    Ok(())
}
