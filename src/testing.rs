//! 单元测试共用的假特征提取器和图库

use std::sync::Arc;

use ndarray::Array2;
use tempfile::{TempDir, tempdir};

use crate::config::DataLayout;
use crate::error::{Error, Result};
use crate::sift::{ExtractorFactory, FeatureExtractor, Features, KeyPointAttr};

/// 文件内容为描述符数量 n，第 r 行第 c 列的值为 `n * 100 + r * 8 + c`
///
/// 内容相同的两张图片描述符完全相同，n 相差较大的图片之间无法通过比率测试。
pub struct CountingExtractor;

impl FeatureExtractor for CountingExtractor {
    fn detect_bytes(&mut self, bytes: &[u8]) -> Result<Features> {
        let n: usize = std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| Error::ImageDecode("not a number".to_owned()))?;
        let keypoints =
            (0..n).map(|i| KeyPointAttr { x: i as f32, y: 0., size: 1., angle: 0. }).collect();
        let descriptors = Array2::from_shape_fn((n, 8), |(r, c)| (n * 100 + r * 8 + c) as f32);
        Ok(Features { keypoints, descriptors })
    }
}

pub fn factory() -> ExtractorFactory {
    Arc::new(|| Ok(Box::new(CountingExtractor) as Box<dyn FeatureExtractor>))
}

/// 在临时目录中创建数据目录，`files` 为相对图库根目录的路径和内容
pub fn data_dir(files: &[(&str, &str)]) -> (TempDir, DataLayout) {
    let dir = tempdir().unwrap();
    let layout = DataLayout::new(dir.path());
    for (path, content) in files {
        let path = layout.gallery.join(path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }
    (dir, layout)
}
