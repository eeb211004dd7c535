use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;

/// 虚拟类别，包含图库下所有类别的图片
pub const ALL_CATEGORY: &str = "all";

static DATA_DIR: LazyLock<PathBuf> = LazyLock::new(|| {
    let proj_dirs =
        ProjectDirs::from("", "cardsearch", "cardsearch").expect("failed to get project dir");
    proj_dirs.data_dir().to_path_buf()
});

fn default_data_dir() -> &'static str {
    DATA_DIR.to_str().unwrap()
}

#[derive(Parser, Debug, Clone)]
pub struct SiftOptions {
    /// SIFT 保留的最大特征点数量，0 表示不限制
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub sift_nfeatures: i32,
    /// SIFT 每个 octave 的层数
    #[arg(long, value_name = "N", default_value_t = 3)]
    pub sift_octave_layers: i32,
    /// SIFT 对比度阈值，越大保留的特征点越少
    #[arg(long, value_name = "THRESHOLD", default_value_t = 0.04)]
    pub sift_contrast_threshold: f64,
    /// SIFT 边缘阈值，越大保留的特征点越多
    #[arg(long, value_name = "THRESHOLD", default_value_t = 10.)]
    pub sift_edge_threshold: f64,
    /// 第 0 个 octave 的高斯 sigma
    #[arg(long, value_name = "SIGMA", default_value_t = 1.6)]
    pub sift_sigma: f64,
    /// 图片最大尺寸，宽或高超过这个尺寸时等比缩小，0x0 表示不缩放
    #[arg(short = 'S', long, value_name = "WIDTHxHEIGHT", value_parser = parse_size, default_value = "1920x1080")]
    pub max_size: (i32, i32),
}

impl Default for SiftOptions {
    fn default() -> Self {
        Self {
            sift_nfeatures: 0,
            sift_octave_layers: 3,
            sift_contrast_threshold: 0.04,
            sift_edge_threshold: 10.,
            sift_sigma: 1.6,
            max_size: (1920, 1080),
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct IndexOptions {
    /// 索引类型
    #[arg(long, value_enum, default_value_t = IndexType::IvfPq)]
    pub index_type: IndexType,
    /// 倒排列表（粗聚类中心）数量
    #[arg(long, value_name = "N", default_value_t = 500)]
    pub nlist: usize,
    /// PQ 子量化器数量，不能整除描述符维数时自动取不超过它的最大约数
    #[arg(long, value_name = "M", default_value_t = 24)]
    pub pq_m: usize,
    /// 每个子量化器编码的位数
    #[arg(long, value_name = "BITS", default_value_t = 8)]
    pub pq_nbits: usize,
    /// 搜索的倒排列表数量
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub nprobe: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self { index_type: IndexType::IvfPq, nlist: 500, pq_m: 24, pq_nbits: 8, nprobe: 1 }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct MatchOptions {
    /// 比率测试阈值，最近邻距离必须小于次近邻距离乘以该值
    #[arg(long, value_name = "RATIO", default_value_t = 0.9)]
    pub ratio: f32,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// IVF + PQ 近似索引，持久化到缓存目录
    IvfPq,
    /// 暴力搜索，只适合很小的图库，不会持久化
    Flat,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "cardsearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 数据目录，包含 gallery、cache、cards_info 三个子目录
    #[arg(short, long, default_value = default_data_dir())]
    pub data_dir: PathBuf,
    /// 图库目录，默认为 <DATA_DIR>/gallery
    #[arg(long, value_name = "DIR")]
    pub gallery_dir: Option<PathBuf>,
    /// 缓存目录，默认为 <DATA_DIR>/cache
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
    /// 卡片资料目录，默认为 <DATA_DIR>/cards_info
    #[arg(long, value_name = "DIR")]
    pub info_dir: Option<PathBuf>,
    /// 扫描图库时的文件后缀名，多个后缀用逗号分隔
    #[arg(long, default_value = "jpg,jpeg,png,webp")]
    pub suffix: String,
}

impl Opts {
    pub fn layout(&self) -> DataLayout {
        let root = &self.data_dir;
        DataLayout {
            gallery: self.gallery_dir.clone().unwrap_or_else(|| root.join("gallery")),
            cache: self.cache_dir.clone().unwrap_or_else(|| root.join("cache")),
            info: self.info_dir.clone().unwrap_or_else(|| root.join("cards_info")),
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 构建（或加载）指定类别的特征缓存和索引
    Build(BuildCommand),
    /// 识别单张卡片
    Match(MatchCommand),
    /// 识别一批裁切好的卡片图片并汇总
    Multi(MultiCommand),
    /// 删除指定类别的缓存和索引文件
    Clean(CleanCommand),
}

/// 数据目录布局
#[derive(Debug, Clone)]
pub struct DataLayout {
    pub gallery: PathBuf,
    pub cache: PathBuf,
    pub info: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            gallery: root.join("gallery"),
            cache: root.join("cache"),
            info: root.join("cards_info"),
        }
    }

    /// 返回类别对应的图库目录，`all` 对应整个图库根目录
    pub fn gallery_dir(&self, category: &str) -> PathBuf {
        if category == ALL_CATEGORY { self.gallery.clone() } else { self.gallery.join(category) }
    }

    /// 返回图片路径、名称、特征点信息的缓存文件
    pub fn cache_archive(&self, category: &str) -> PathBuf {
        self.cache.join(format!("{category}.bin"))
    }

    /// 返回拼接后的描述符矩阵文件
    pub fn cache_matrix(&self, category: &str) -> PathBuf {
        self.cache.join(format!("{category}.npy"))
    }

    /// 返回索引文件
    pub fn index_file(&self, category: &str) -> PathBuf {
        self.cache.join(format!("{category}.index"))
    }
}

fn parse_size(s: &str) -> anyhow::Result<(i32, i32)> {
    let parts: Vec<&str> = s.split('x').collect();
    if parts.len() != 2 {
        return Err(anyhow::anyhow!("无效的尺寸: {}", s));
    }
    Ok((parts[0].parse()?, parts[1].parse()?))
}
