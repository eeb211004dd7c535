use std::path::Path;
use std::time::Instant;

use log::{debug, info, warn};
use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;

use crate::config::{IndexOptions, IndexType};
use crate::error::{Error, Result};
use crate::faiss::IvfPqIndex;
use crate::utils;

/// 搜索结果中的一个近邻
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// 向量在拼接描述符矩阵中的全局偏移，没有结果时为 -1
    pub id: i64,
    /// 与查询向量的 L2 距离平方
    pub distance: f32,
}

impl Neighbor {
    pub const NONE: Neighbor = Neighbor { id: -1, distance: f32::MAX };

    pub fn is_none(&self) -> bool {
        self.id < 0
    }
}

/// 近似最近邻索引，构建完成后只读，可在多个查询之间共享
pub trait AnnIndex: Send + Sync {
    /// 索引中的向量数量
    fn ntotal(&self) -> usize;

    /// 向量维数
    fn dim(&self) -> usize;

    /// 每次查询访问的粗聚类单元数量，精确索引返回 `None`
    fn nprobe(&self) -> Option<usize> {
        None
    }

    /// 对每个查询向量返回 k 个最近邻，按距离升序，不足 k 个时以 [`Neighbor::NONE`] 填充
    fn search(&self, queries: ArrayView2<f32>, k: usize) -> Result<Vec<Vec<Neighbor>>>;
}

/// 暴力搜索索引，结果精确
pub struct FlatIndex {
    data: Array2<f32>,
}

impl FlatIndex {
    pub fn new(data: Array2<f32>) -> Self {
        Self { data }
    }
}

impl AnnIndex for FlatIndex {
    fn ntotal(&self) -> usize {
        self.data.nrows()
    }

    fn dim(&self) -> usize {
        self.data.ncols()
    }

    fn search(&self, queries: ArrayView2<f32>, k: usize) -> Result<Vec<Vec<Neighbor>>> {
        assert_eq!(queries.ncols(), self.data.ncols(), "dimension mismatch");
        let result = (0..queries.nrows())
            .into_par_iter()
            .map(|qi| {
                let q = queries.row(qi);
                let mut all = self
                    .data
                    .axis_iter(Axis(0))
                    .enumerate()
                    .map(|(i, row)| {
                        let distance =
                            row.iter().zip(q.iter()).map(|(a, b)| (a - b) * (a - b)).sum();
                        Neighbor { id: i as i64, distance }
                    })
                    .collect::<Vec<_>>();
                all.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
                all.truncate(k);
                all.resize(k, Neighbor::NONE);
                all
            })
            .collect();
        Ok(result)
    }
}

/// 不超过 `m` 且能整除 `d` 的最大子量化器数量
pub fn pq_subquantizers(d: usize, m: usize) -> usize {
    (1..=m.min(d).max(1)).rev().find(|m| d % m == 0).unwrap_or(1)
}

/// 训练所需的最少向量数量：粗聚类中心数和 PQ 码本大小中的较大者
pub fn min_training_points(opts: &IndexOptions) -> usize {
    opts.nlist.max(1 << opts.pq_nbits)
}

/// 如果索引文件存在，直接加载；否则在全部描述符上训练、添加并保存
///
/// 已写入的索引文件不会被重新训练，重建需要先删除文件。
/// 加载的索引与描述符数量或维数不一致时返回 [`Error::CorruptCache`]。
pub fn build_or_load(
    category: &str,
    descriptors: ArrayView2<f32>,
    opts: &IndexOptions,
    index_file: &Path,
) -> Result<Box<dyn AnnIndex>> {
    if descriptors.nrows() == 0 {
        return Err(Error::EmptyCache(category.to_owned()));
    }

    if opts.index_type == IndexType::Flat {
        debug!("使用暴力搜索索引: {category}");
        return Ok(Box::new(FlatIndex::new(descriptors.to_owned())));
    }

    if index_file.exists() {
        info!("加载索引: {}", index_file.display());
        let mut index =
            IvfPqIndex::from_file(index_file).map_err(|e| Error::corrupt(category, e))?;
        if !index.is_trained() {
            return Err(Error::corrupt(category, "索引未训练"));
        }
        if index.ntotal() != descriptors.nrows() || index.dim() != descriptors.ncols() {
            return Err(Error::corrupt(
                category,
                format!(
                    "索引包含 {}x{} 个向量，缓存包含 {}x{} 个描述符",
                    index.ntotal(),
                    index.dim(),
                    descriptors.nrows(),
                    descriptors.ncols()
                ),
            ));
        }
        index.set_nprobe(opts.nprobe);
        return Ok(Box::new(index));
    }

    let need = min_training_points(opts);
    if descriptors.nrows() < need {
        return Err(Error::InsufficientData {
            category: category.to_owned(),
            have: descriptors.nrows(),
            need,
        });
    }

    let d = descriptors.ncols();
    let m = pq_subquantizers(d, opts.pq_m);
    if m != opts.pq_m {
        warn!("描述符维数 {} 不能被 {} 整除，改用 {} 个子量化器", d, opts.pq_m, m);
    }
    let description = format!("IVF{},PQ{}x{}", opts.nlist, m, opts.pq_nbits);

    info!("训练索引 {}: {} 个描述符，{}", category, descriptors.nrows(), description);
    let start = Instant::now();
    let mut index = IvfPqIndex::new(d, &description)?;
    index.train(descriptors)?;
    index.add(descriptors)?;
    info!("索引训练完成，耗时 {:.2}s", start.elapsed().as_secs_f32());

    utils::write_atomic(index_file, |tmp| index.write_file(tmp))?;
    index.set_nprobe(opts.nprobe);
    Ok(Box::new(index))
}
