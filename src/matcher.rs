use log::debug;
use ndarray::ArrayView2;

use crate::error::Result;
use crate::index::{AnnIndex, Neighbor};
use crate::segment::SegmentMap;

/// 比率测试的默认阈值
pub const DEFAULT_RATIO: f32 = 0.9;

/// 判断最佳匹配是否可信的票数规则
///
/// 两种流程的规则分开保留，避免在调整其中一个时影响另一个。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VotePolicy {
    /// 单卡识别：票数必须大于 1
    SingleCard,
    /// 多卡识别：票数至少为 2
    MultiCard,
}

impl VotePolicy {
    pub fn accepts(&self, votes: usize) -> bool {
        match self {
            Self::SingleCard => votes > 1,
            Self::MultiCard => votes >= 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MatchParams {
    pub ratio: f32,
    pub policy: VotePolicy,
}

impl MatchParams {
    pub fn new(ratio: f32, policy: VotePolicy) -> Self {
        Self { ratio, policy }
    }
}

/// 通过比率测试的一次匹配
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchVote {
    /// 查询描述符序号
    pub query: usize,
    /// 图库图片内的描述符序号
    pub local: usize,
    /// 最近邻距离
    pub distance: f32,
}

/// 最佳匹配的图库图片
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch {
    /// 图库图片序号
    pub image: usize,
    pub votes: Vec<MatchVote>,
}

/// 对每个查询描述符的两个最近邻做比率测试，并把通过的匹配归到对应的图库图片
///
/// 最近邻缺失的查询被忽略；只有次近邻缺失时视为没有歧义，直接接受。
pub fn collect_votes(
    neighbors: &[Vec<Neighbor>],
    segments: &SegmentMap,
    ratio: f32,
) -> Vec<Vec<MatchVote>> {
    let mut votes = vec![vec![]; segments.len()];
    for (query, knn) in neighbors.iter().enumerate() {
        let Some(&nearest) = knn.first() else {
            continue;
        };
        if nearest.is_none() {
            continue;
        }
        let second = knn.get(1).copied().unwrap_or(Neighbor::NONE);
        if !second.is_none() && nearest.distance >= ratio * second.distance {
            continue;
        }
        let (image, local) = segments.attribute(nearest.id as usize);
        votes[image].push(MatchVote { query, local, distance: nearest.distance });
    }
    votes
}

/// 选出票数最多的图片，票数相同时取序号最小的；票数不满足 `policy` 时返回 `None`
pub fn select_best(votes: Vec<Vec<MatchVote>>, policy: VotePolicy) -> Option<BestMatch> {
    let mut best: Option<(usize, usize)> = None;
    for (image, v) in votes.iter().enumerate() {
        if best.is_none_or(|(_, n)| v.len() > n) {
            best = Some((image, v.len()));
        }
    }
    let (image, count) = best?;
    if !policy.accepts(count) {
        debug!("最佳匹配只有 {} 票，视为没有匹配", count);
        return None;
    }
    let votes = votes.into_iter().nth(image).unwrap_or_default();
    Some(BestMatch { image, votes })
}

/// 在索引中为一组查询描述符找到最匹配的图库图片
///
/// 只读取 `index` 和 `segments`，可以在多个线程中对同一个索引并发调用。
pub fn match_best(
    query: ArrayView2<f32>,
    index: &dyn AnnIndex,
    segments: &SegmentMap,
    params: &MatchParams,
) -> Result<Option<BestMatch>> {
    if query.nrows() == 0 || segments.is_empty() {
        return Ok(None);
    }
    let neighbors = index.search(query, 2)?;
    let votes = collect_votes(&neighbors, segments, params.ratio);
    Ok(select_best(votes, params.policy))
}
