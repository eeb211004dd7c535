use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::block_in_place;

use crate::cli::{OutputFormat, SubCommandExtend, open_manager};
use crate::config::{ALL_CATEGORY, IndexOptions, MatchOptions, Opts, SiftOptions};
use crate::flow::{SingleOutcome, identify_one};
use crate::info::InfoStore;
use crate::sift::SiftDetector;

#[derive(Parser, Debug, Clone)]
pub struct MatchCommand {
    #[command(flatten)]
    pub sift: SiftOptions,
    #[command(flatten)]
    pub index: IndexOptions,
    #[command(flatten)]
    pub matching: MatchOptions,
    /// 需要识别的卡片图片
    pub image: PathBuf,
    /// 在哪个类别中搜索
    #[arg(short, long, default_value = ALL_CATEGORY)]
    pub category: String,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for MatchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let bytes = tokio::fs::read(&self.image)
            .await
            .with_context(|| format!("无法读取 {}", self.image.display()))?;
        let manager = open_manager(opts, &self.sift, &self.index);
        let info = InfoStore::new(opts.layout().info);

        let outcome = block_in_place(|| {
            let mut sift = SiftDetector::create(&self.sift)?;
            identify_one(&bytes, &self.category, &manager, &mut sift, &info, self.matching.ratio)
        })?;

        print_outcome(&outcome, self.output_format)
    }
}

fn print_outcome(outcome: &SingleOutcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(outcome)?),
        OutputFormat::Table => match outcome {
            SingleOutcome::NoMatch => println!("未找到匹配的卡片"),
            SingleOutcome::Matched { gallery_name, card_id, info, votes } => {
                println!("卡片 ID : {}", card_id);
                println!("图库图片: {}", gallery_name);
                println!("匹配票数: {}", votes);
                match info {
                    Some(info) => {
                        println!("日文名  : {}", info.name_jp);
                        println!("{}", info.text_html);
                    }
                    None => println!("找不到卡片资料"),
                }
            }
        },
    }
    Ok(())
}
