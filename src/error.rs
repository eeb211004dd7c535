use std::path::PathBuf;

/// 特征缓存与索引相关的错误
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 图库目录不存在
    #[error("图库目录不存在: {}", .0.display())]
    GalleryNotFound(PathBuf),
    /// 类别中没有任何可用的描述符
    #[error("类别 {0} 没有有效的描述符，无法构建索引")]
    EmptyCache(String),
    /// 描述符数量不足以训练索引
    #[error("类别 {category} 只有 {have} 个描述符，训练索引至少需要 {need} 个")]
    InsufficientData { category: String, have: usize, need: usize },
    /// 缓存文件无法读取或与其他缓存文件不一致
    #[error("类别 {category} 的缓存已损坏: {reason}")]
    CorruptCache { category: String, reason: String },
    /// 图片无法解码
    #[error("无法读取图像: {0}")]
    ImageDecode(String),
    /// 图片中找不到特征点
    #[error("找不到特征点")]
    NoFeatures,
    #[error("faiss 错误 {code}: {message}")]
    Faiss { code: i32, message: String },
    /// 缓存写入时序列化失败
    #[error("序列化失败: {0}")]
    Serialize(String),
    #[error(transparent)]
    OpenCv(#[from] opencv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn corrupt(category: &str, reason: impl ToString) -> Self {
        Self::CorruptCache { category: category.to_owned(), reason: reason.to_string() }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
