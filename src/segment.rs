use serde::{Deserialize, Serialize};

/// 拼接后的描述符矩阵中，每张图库图片所占区间的前缀和边界表
///
/// `boundaries[i]` 为第 0..=i 张图片的描述符总数，单调不减。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMap {
    boundaries: Vec<usize>,
}

impl SegmentMap {
    /// 根据每张图片的描述符数量构建边界表
    pub fn from_counts<I: IntoIterator<Item = usize>>(counts: I) -> Self {
        let boundaries = counts
            .into_iter()
            .scan(0usize, |acc, n| {
                *acc += n;
                Some(*acc)
            })
            .collect();
        Self { boundaries }
    }

    pub fn boundaries(&self) -> &[usize] {
        &self.boundaries
    }

    /// 图片数量
    pub fn len(&self) -> usize {
        self.boundaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boundaries.is_empty()
    }

    /// 描述符总数
    pub fn total(&self) -> usize {
        self.boundaries.last().copied().unwrap_or(0)
    }

    /// 第 i 张图片在拼接矩阵中的起止位置
    pub fn range(&self, image: usize) -> std::ops::Range<usize> {
        let start = if image == 0 { 0 } else { self.boundaries[image - 1] };
        start..self.boundaries[image]
    }

    /// 将全局描述符偏移量映射为 `(图片序号, 图片内偏移量)`
    ///
    /// 返回满足 `offset < boundaries[i]` 的最小 `i`，恰好落在边界上的偏移属于下一张图片。
    ///
    /// # Panics
    ///
    /// 偏移量超出 `[0, total)` 时 panic，这意味着索引与缓存已经不同步。
    pub fn attribute(&self, offset: usize) -> (usize, usize) {
        let image = self.boundaries.partition_point(|&b| b <= offset);
        assert!(
            image < self.boundaries.len(),
            "描述符偏移 {} 超出范围 [0, {})，索引与缓存不同步",
            offset,
            self.total()
        );
        let start = if image == 0 { 0 } else { self.boundaries[image - 1] };
        (image, offset - start)
    }
}
