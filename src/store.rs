use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use indicatif::{ParallelProgressIterator, ProgressBar};
use log::{debug, info, warn};
use ndarray::{Array2, ArrayView2, s};
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::config::{ALL_CATEGORY, DataLayout};
use crate::error::{Error, Result};
use crate::segment::SegmentMap;
use crate::sift::{ExtractorFactory, Features, KeyPointAttr};
use crate::utils::{self, pb_style};

/// 缓存格式版本，格式变化时递增，旧缓存会被视为损坏并重建
const CACHE_VERSION: u32 = 1;

/// 图库中的一张图片
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryImageRecord {
    /// 图片路径
    pub path: PathBuf,
    /// 文件名，前 8 个字符为卡片 ID
    pub name: String,
    /// 特征点属性
    pub keypoints: Vec<KeyPointAttr>,
    /// 描述符数量
    pub descriptor_count: usize,
}

#[derive(Serialize, Deserialize)]
struct CacheArchive {
    version: u32,
    category: String,
    records: Vec<GalleryImageRecord>,
}

/// 一个类别的描述符缓存
///
/// `descriptors` 按 `records` 的顺序拼接了所有图片的描述符，归属判断依赖这个顺序。
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorCache {
    pub category: String,
    pub records: Vec<GalleryImageRecord>,
    pub descriptors: Array2<f32>,
    pub segments: SegmentMap,
}

impl DescriptorCache {
    fn new(category: String, records: Vec<GalleryImageRecord>, descriptors: Array2<f32>) -> Self {
        let segments = SegmentMap::from_counts(records.iter().map(|r| r.descriptor_count));
        Self { category, records, descriptors, segments }
    }

    /// 描述符维数，空缓存为 0
    pub fn dim(&self) -> usize {
        self.descriptors.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.nrows() == 0
    }

    /// 第 i 张图片自己的描述符
    pub fn image_descriptors(&self, image: usize) -> ArrayView2<f32> {
        self.descriptors.slice(s![self.segments.range(image), ..])
    }
}

/// 负责提取图库特征并读写缓存文件
pub struct DescriptorStore {
    layout: DataLayout,
    suffix: Regex,
}

impl DescriptorStore {
    /// # Arguments
    ///
    /// * `layout` - 数据目录布局
    /// * `suffix` - 图片后缀名，多个后缀用逗号分隔，不区分大小写
    pub fn new(layout: DataLayout, suffix: &str) -> Self {
        let alternatives =
            suffix.split(',').map(|s| regex::escape(s.trim())).collect::<Vec<_>>().join("|");
        let suffix = Regex::new(&format!("(?i)^({alternatives})$")).expect("failed to build regex");
        Self { layout, suffix }
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// 列出类别下的所有图片，按路径排序
    ///
    /// `all` 类别包含图库根目录下每个类别目录中的图片。
    pub fn gallery_files(&self, category: &str) -> Result<Vec<PathBuf>> {
        let dir = self.layout.gallery_dir(category);
        if !dir.is_dir() {
            return Err(Error::GalleryNotFound(dir));
        }
        let depth = if category == ALL_CATEGORY { 2 } else { 1 };
        let mut files = vec![];
        for entry in WalkDir::new(&dir).min_depth(depth).max_depth(depth).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            match path.extension() {
                Some(ext) if self.suffix.is_match(&ext.to_string_lossy()) => {
                    files.push(path.to_path_buf())
                }
                _ => debug!("跳过非图片文件: {}", path.display()),
            }
        }
        Ok(files)
    }

    /// 读取已有的缓存，缓存文件不完整时返回 `None`
    pub fn load(&self, category: &str) -> Result<Option<DescriptorCache>> {
        let archive_file = self.layout.cache_archive(category);
        let matrix_file = self.layout.cache_matrix(category);
        if !archive_file.exists() || !matrix_file.exists() {
            return Ok(None);
        }

        let archive: CacheArchive =
            bincode::deserialize_from(BufReader::new(File::open(&archive_file)?))
                .map_err(|e| Error::corrupt(category, e))?;
        if archive.version != CACHE_VERSION {
            return Err(Error::corrupt(category, format!("缓存版本 {}", archive.version)));
        }
        if archive.category != category {
            return Err(Error::corrupt(category, format!("缓存属于类别 {}", archive.category)));
        }

        let descriptors = Array2::<f32>::read_npy(BufReader::new(File::open(&matrix_file)?))
            .map_err(|e| Error::corrupt(category, e))?;
        let expected = archive.records.iter().map(|r| r.descriptor_count).sum::<usize>();
        if descriptors.nrows() != expected {
            return Err(Error::corrupt(
                category,
                format!("描述符矩阵有 {} 行，记录中共 {} 个", descriptors.nrows(), expected),
            ));
        }

        Ok(Some(DescriptorCache::new(archive.category, archive.records, descriptors)))
    }

    /// 提取类别下所有图片的特征，并写入缓存文件
    ///
    /// 无法读取或没有特征点的图片会被跳过。
    pub fn build(&self, category: &str, factory: &ExtractorFactory) -> Result<DescriptorCache> {
        let files = self.gallery_files(category)?;
        // 提前创建一次，尽早暴露提取器本身的错误
        factory()?;

        info!("正在建立缓存: {} ({} 张图片)", category, files.len());
        let pb = ProgressBar::new(files.len() as u64).with_style(pb_style());
        pb.set_prefix(format!("提取特征 ({category})"));

        let extracted = files
            .par_iter()
            .progress_with(pb.clone())
            .map_init(factory.as_ref(), |extractor, path| {
                let extractor = extractor.as_mut().ok()?;
                match extractor.detect_file(path) {
                    Ok(features) if !features.is_empty() => Some((path, features)),
                    Ok(_) => {
                        warn!("没有特征点，跳过: {}", path.display());
                        None
                    }
                    Err(e) => {
                        warn!("提取特征失败，跳过 {}: {}", path.display(), e);
                        None
                    }
                }
            })
            .collect::<Vec<_>>();
        pb.finish_and_clear();

        let mut dim = None;
        let mut kept: Vec<(&PathBuf, Features)> = vec![];
        for (path, features) in extracted.into_iter().flatten() {
            let d = *dim.get_or_insert(features.descriptors.ncols());
            if features.descriptors.ncols() != d {
                warn!("描述符维数不一致，跳过: {}", path.display());
                continue;
            }
            kept.push((path, features));
        }

        let total = kept.iter().map(|(_, f)| f.len()).sum::<usize>();
        let mut descriptors = Array2::<f32>::zeros((total, dim.unwrap_or(0)));
        let mut records = Vec::with_capacity(kept.len());
        let mut start = 0;
        for (path, features) in kept {
            let end = start + features.len();
            descriptors.slice_mut(s![start..end, ..]).assign(&features.descriptors);
            start = end;
            records.push(GalleryImageRecord {
                path: path.clone(),
                name: file_name(path),
                descriptor_count: features.len(),
                keypoints: features.keypoints,
            });
        }

        if records.is_empty() {
            warn!("类别 {} 没有有效的图像数据", category);
        }

        self.save(category, &records, &descriptors)?;
        info!("缓存构建完成: {} ({} 张图片，{} 个描述符)", category, records.len(), total);

        Ok(DescriptorCache::new(category.to_owned(), records, descriptors))
    }

    /// 读取缓存，不存在时构建
    ///
    /// 重新构建前会删除类别的旧索引文件，它对应的描述符已经不存在。
    pub fn load_or_build(
        &self,
        category: &str,
        factory: &ExtractorFactory,
    ) -> Result<DescriptorCache> {
        if let Some(cache) = self.load(category)? {
            info!("已加载缓存: {}", category);
            return Ok(cache);
        }
        let index_file = self.layout.index_file(category);
        if utils::remove_if_exists(&index_file)? {
            warn!("缓存不存在，删除旧索引: {}", index_file.display());
        }
        info!("缓存不存在，开始构建: {}", category);
        self.build(category, factory)
    }

    /// 删除类别的缓存和索引文件，返回删除的文件数量
    pub fn invalidate(&self, category: &str) -> Result<usize> {
        let mut removed = 0;
        for path in [
            self.layout.cache_archive(category),
            self.layout.cache_matrix(category),
            self.layout.index_file(category),
        ] {
            if utils::remove_if_exists(&path)? {
                debug!("删除缓存文件: {}", path.display());
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn save(
        &self,
        category: &str,
        records: &[GalleryImageRecord],
        descriptors: &Array2<f32>,
    ) -> Result<()> {
        std::fs::create_dir_all(&self.layout.cache)?;

        utils::write_atomic(&self.layout.cache_matrix(category), |tmp| {
            utils::write_buffered(tmp, |w| {
                descriptors.write_npy(w).map_err(|e| Error::Serialize(e.to_string()))
            })
        })?;

        let archive =
            CacheArchive { version: CACHE_VERSION, category: category.to_owned(), records: records.to_vec() };
        utils::write_atomic(&self.layout.cache_archive(category), |tmp| {
            utils::write_buffered(tmp, |w| {
                bincode::serialize_into(w, &archive).map_err(|e| Error::Serialize(e.to_string()))
            })
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
}
