use std::path::Path;
use std::sync::Arc;

use ndarray::Array2;
use opencv::core::{KeyPoint, Mat, Ptr, Vector};
use opencv::features2d::SIFT;
use opencv::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::SiftOptions;
use crate::error::Result;
use crate::utils;

/// 特征点属性：位置、尺度、方向
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyPointAttr {
    pub x: f32,
    pub y: f32,
    pub size: f32,
    pub angle: f32,
}

impl From<&KeyPoint> for KeyPointAttr {
    fn from(kp: &KeyPoint) -> Self {
        Self { x: kp.pt.x, y: kp.pt.y, size: kp.size, angle: kp.angle }
    }
}

/// 单张图片的特征点与描述符，描述符矩阵大小为 (n, d)
#[derive(Debug, Clone)]
pub struct Features {
    pub keypoints: Vec<KeyPointAttr>,
    pub descriptors: Array2<f32>,
}

impl Features {
    pub fn len(&self) -> usize {
        self.descriptors.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.nrows() == 0
    }
}

/// 局部特征提取器
pub trait FeatureExtractor {
    /// 从编码后的图片数据中提取特征
    fn detect_bytes(&mut self, bytes: &[u8]) -> Result<Features>;

    /// 从图片文件中提取特征
    fn detect_file(&mut self, path: &Path) -> Result<Features> {
        let bytes = std::fs::read(path)?;
        self.detect_bytes(&bytes)
    }
}

/// 每个工作线程各自创建一个特征提取器
pub type ExtractorFactory = Arc<dyn Fn() -> Result<Box<dyn FeatureExtractor>> + Send + Sync>;

pub struct SiftDetector {
    sift: Ptr<SIFT>,
    max_size: (i32, i32),
}

impl SiftDetector {
    pub fn create(opts: &SiftOptions) -> Result<Self> {
        let sift = SIFT::create(
            opts.sift_nfeatures,
            opts.sift_octave_layers,
            opts.sift_contrast_threshold,
            opts.sift_edge_threshold,
            opts.sift_sigma,
            false,
        )?;
        Ok(Self { sift, max_size: opts.max_size })
    }

    /// 返回按 `opts` 创建 SIFT 提取器的工厂
    pub fn factory(opts: SiftOptions) -> ExtractorFactory {
        Arc::new(move || Ok(Box::new(SiftDetector::create(&opts)?) as Box<dyn FeatureExtractor>))
    }

    pub fn detect_image(&mut self, image: &Mat) -> Result<Features> {
        let mask = Mat::default();
        let mut keypoints = Vector::<KeyPoint>::new();
        let mut descriptors = Mat::default();
        self.sift.detect_and_compute(image, &mask, &mut keypoints, &mut descriptors, false)?;
        Ok(Features {
            keypoints: keypoints.iter().map(|kp| KeyPointAttr::from(&kp)).collect(),
            descriptors: utils::mat_to_array(&descriptors)?,
        })
    }
}

impl FeatureExtractor for SiftDetector {
    fn detect_bytes(&mut self, bytes: &[u8]) -> Result<Features> {
        let image = utils::imdecode(bytes, self.max_size)?;
        self.detect_image(&image)
    }
}
