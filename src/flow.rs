use log::{info, warn};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::info::{CardInfo, InfoStore, card_id_from_name};
use crate::manager::CacheManager;
use crate::matcher::{MatchParams, VotePolicy};
use crate::sift::FeatureExtractor;

/// 单卡识别的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SingleOutcome {
    NoMatch,
    Matched {
        gallery_name: String,
        card_id: String,
        /// 匹配成功但资料文件不存在时为 `None`
        info: Option<CardInfo>,
        votes: usize,
    },
}

/// 在指定类别中识别一张卡片
///
/// 与多卡识别不同，图片无法读取或没有特征点时直接返回错误。
pub fn identify_one(
    bytes: &[u8],
    category: &str,
    manager: &CacheManager,
    extractor: &mut dyn FeatureExtractor,
    info: &InfoStore,
    ratio: f32,
) -> Result<SingleOutcome> {
    let features = extractor.detect_bytes(bytes)?;
    if features.is_empty() {
        return Err(Error::NoFeatures);
    }
    info!("提取到 {} 个特征点", features.len());

    let gallery = manager.gallery(category)?;
    let params = MatchParams::new(ratio, VotePolicy::SingleCard);
    let Some(best) = gallery.match_best(features.descriptors.view(), &params)? else {
        return Ok(SingleOutcome::NoMatch);
    };

    let gallery_name = gallery.record(best.image).name.clone();
    let card_id = card_id_from_name(&gallery_name);
    let info = match info.lookup(&card_id) {
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
    Ok(SingleOutcome::Matched { gallery_name, card_id, info, votes: best.votes.len() })
}
