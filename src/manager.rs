use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::warn;
use ndarray::ArrayView2;
use once_cell::sync::OnceCell;

use crate::config::IndexOptions;
use crate::error::{Error, Result};
use crate::index::{self, AnnIndex};
use crate::matcher::{self, BestMatch, MatchParams};
use crate::sift::ExtractorFactory;
use crate::store::{DescriptorCache, DescriptorStore, GalleryImageRecord};
use crate::utils;

/// 一个类别的描述符缓存和对应的索引，构建完成后只读
pub struct Gallery {
    pub cache: DescriptorCache,
    pub index: Box<dyn AnnIndex>,
}

impl Gallery {
    pub fn match_best(
        &self,
        query: ArrayView2<f32>,
        params: &MatchParams,
    ) -> Result<Option<BestMatch>> {
        matcher::match_best(query, self.index.as_ref(), &self.cache.segments, params)
    }

    pub fn record(&self, image: usize) -> &GalleryImageRecord {
        &self.cache.records[image]
    }
}

/// 按类别持有已加载的图库
///
/// 每个类别在进程内最多构建一次，之后不会被淘汰。
/// 同一类别的并发请求会等待第一个请求完成构建，不同类别之间互不阻塞。
pub struct CacheManager {
    store: DescriptorStore,
    index_opts: IndexOptions,
    factory: ExtractorFactory,
    galleries: Mutex<HashMap<String, Arc<OnceCell<Arc<Gallery>>>>>,
}

impl CacheManager {
    pub fn new(store: DescriptorStore, index_opts: IndexOptions, factory: ExtractorFactory) -> Self {
        Self { store, index_opts, factory, galleries: Mutex::default() }
    }

    /// 获取类别的图库，第一次调用时加载或构建缓存和索引
    ///
    /// 构建失败时不会记录结果，下一次调用会重新尝试。
    pub fn gallery(&self, category: &str) -> Result<Arc<Gallery>> {
        let cell = self
            .galleries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(category.to_owned())
            .or_default()
            .clone();
        cell.get_or_try_init(|| self.open(category).map(Arc::new)).cloned()
    }

    /// 删除类别的缓存文件，并丢弃已加载的图库
    pub fn invalidate(&self, category: &str) -> Result<usize> {
        self.galleries.lock().unwrap_or_else(|e| e.into_inner()).remove(category);
        self.store.invalidate(category)
    }

    fn open(&self, category: &str) -> Result<Gallery> {
        let index_file = self.store.layout().index_file(category);

        let cache = match self.store.load_or_build(category, &self.factory) {
            Err(Error::CorruptCache { reason, .. }) => {
                warn!("缓存已损坏，重新构建 {}: {}", category, reason);
                self.store.invalidate(category)?;
                self.store.build(category, &self.factory)?
            }
            r => r?,
        };

        let descriptors = cache.descriptors.view();
        let index = match index::build_or_load(category, descriptors, &self.index_opts, &index_file) {
            Err(Error::CorruptCache { reason, .. }) => {
                warn!("索引已损坏，重新训练 {}: {}", category, reason);
                utils::remove_if_exists(&index_file)?;
                index::build_or_load(category, descriptors, &self.index_opts, &index_file)?
            }
            r => r?,
        };

        Ok(Gallery { cache, index })
    }
}
