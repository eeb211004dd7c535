use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::info::{CardInfo, InfoStore, card_id_from_name};
use crate::manager::Gallery;
use crate::matcher::{MatchParams, VotePolicy};
use crate::sift::FeatureExtractor;

/// 同一张卡片在一批图片中的识别结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardTally {
    /// 被识别为这张卡片的图片数量
    pub count: usize,
    /// 最后一次匹配到的图库文件名
    pub gallery_name: String,
    /// 卡片资料，资料文件不存在时为 `None`
    pub info: Option<CardInfo>,
}

/// 按卡片 ID 升序排列的汇总结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub cards: Vec<(String, CardTally)>,
    /// 没有特征点、无法读取或没有匹配的图片数量
    pub skipped: usize,
}

impl BatchReport {
    /// 识别出的图片总数
    pub fn total(&self) -> usize {
        self.cards.iter().map(|(_, t)| t.count).sum()
    }

    /// 识别出的卡片种类数
    pub fn kinds(&self) -> usize {
        self.cards.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    /// 这一批没有任何图片
    Empty,
    /// 所有图片都没有识别出卡片
    Unidentified { skipped: usize },
    Identified(BatchReport),
}

/// 多卡识别：逐张识别一批裁切好的卡片图片并按卡片 ID 汇总
pub struct Aggregator<'a> {
    gallery: &'a Gallery,
    info: &'a InfoStore,
    params: MatchParams,
}

impl<'a> Aggregator<'a> {
    pub fn new(gallery: &'a Gallery, info: &'a InfoStore, ratio: f32) -> Self {
        Self { gallery, info, params: MatchParams::new(ratio, VotePolicy::MultiCard) }
    }

    /// 识别一张图片，返回最佳匹配的图库文件名，没有匹配时返回 `None`
    pub fn identify(
        &self,
        bytes: &[u8],
        extractor: &mut dyn FeatureExtractor,
    ) -> Result<Option<&'a str>> {
        let features = extractor.detect_bytes(bytes)?;
        if features.is_empty() {
            return Err(Error::NoFeatures);
        }
        let best = self.gallery.match_best(features.descriptors.view(), &self.params)?;
        Ok(best.map(|best| self.gallery.record(best.image).name.as_str()))
    }

    /// 单张图片的失败只会被记录并计入跳过数量，不会中断整批处理
    pub fn run<B: AsRef<[u8]>>(
        &self,
        images: &[B],
        extractor: &mut dyn FeatureExtractor,
    ) -> Result<BatchOutcome> {
        if images.is_empty() {
            return Ok(BatchOutcome::Empty);
        }

        let mut cards = BTreeMap::<String, CardTally>::new();
        let mut skipped = 0;
        for (i, image) in images.iter().enumerate() {
            let name = match self.identify(image.as_ref(), extractor) {
                Ok(Some(name)) => name,
                Ok(None) => {
                    debug!("第 {} 张图片没有匹配", i);
                    skipped += 1;
                    continue;
                }
                Err(e @ (Error::ImageDecode(_) | Error::NoFeatures | Error::OpenCv(_))) => {
                    warn!("跳过第 {} 张图片: {}", i, e);
                    skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let card_id = card_id_from_name(name);
            let info = match self.info.lookup(&card_id) {
                Ok(Some(info)) => Some(info),
                Ok(None) => {
                    warn!("找不到卡片资料: {}", card_id);
                    None
                }
                Err(e) => {
                    warn!("无法读取卡片资料 {}: {}", card_id, e);
                    None
                }
            };
            let tally = cards.entry(card_id).or_insert_with(|| CardTally {
                count: 0,
                gallery_name: name.to_owned(),
                info: None,
            });
            tally.count += 1;
            tally.gallery_name = name.to_owned();
            tally.info = info;
        }

        if cards.is_empty() {
            info!("{} 张图片都没有识别出卡片", images.len());
            return Ok(BatchOutcome::Unidentified { skipped });
        }
        Ok(BatchOutcome::Identified(BatchReport { cards: cards.into_iter().collect(), skipped }))
    }
}
