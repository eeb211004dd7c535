use std::ffi::{CStr, CString};
use std::os::raw::c_int;
use std::path::Path;
use std::ptr;

use faiss_sys::*;
use log::debug;
use ndarray::ArrayView2;

use crate::error::{Error, Result};
use crate::index::{AnnIndex, Neighbor};

/// 基于 faiss 的浮点向量索引，使用 L2 距离
pub struct IvfPqIndex {
    index: *mut FaissIndex,
    /// 向量维数
    d: usize,
}

impl IvfPqIndex {
    /// 使用 faiss 描述字符串创建一个新的索引，如 `IVF500,PQ16x8`
    pub fn new(d: usize, description: &str) -> Result<Self> {
        let mut index = ptr::null_mut();
        let description = CString::new(description).expect("description contains NUL");
        unsafe {
            faiss_try(faiss_index_factory(
                &mut index,
                d as c_int,
                description.as_ptr(),
                FaissMetricType_METRIC_L2,
            ))?;
        }
        Ok(Self { index, d })
    }

    /// 从文件加载索引，不会重新训练
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut index = ptr::null_mut();
        let path = path_to_cstring(path.as_ref());
        unsafe {
            faiss_try(faiss_read_index_fname(path.as_ptr(), 0, &mut index))?;
        }
        let d = unsafe { faiss_Index_d(index) } as usize;
        Ok(Self { index, d })
    }

    /// 该索引是否已经训练
    pub fn is_trained(&self) -> bool {
        unsafe { faiss_Index_is_trained(self.index) != 0 }
    }

    /// 使用 (n, d) 的数据训练粗量化器和 PQ 码本
    pub fn train(&mut self, x: ArrayView2<f32>) -> Result<()> {
        assert_eq!(x.ncols(), self.d, "dimension mismatch");
        let x = x.as_standard_layout();
        unsafe {
            faiss_try(faiss_Index_train(self.index, x.nrows() as i64, x.as_ptr()))?;
        }
        Ok(())
    }

    /// 添加若干条向量，ID 依次递增
    pub fn add(&mut self, x: ArrayView2<f32>) -> Result<()> {
        assert_eq!(x.ncols(), self.d, "dimension mismatch");
        let x = x.as_standard_layout();
        unsafe {
            faiss_try(faiss_Index_add(self.index, x.nrows() as i64, x.as_ptr()))?;
        }
        Ok(())
    }

    /// 设置搜索时访问的倒排列表数量
    pub fn set_nprobe(&mut self, nprobe: usize) {
        unsafe {
            let ivf = faiss_IndexIVF_cast(self.index);
            if !ivf.is_null() {
                faiss_IndexIVF_set_nprobe(ivf, nprobe);
            }
        }
    }

    /// 搜索时访问的倒排列表数量，非 IVF 索引返回 `None`
    pub fn nprobe(&self) -> Option<usize> {
        unsafe {
            let ivf = faiss_IndexIVF_cast(self.index);
            (!ivf.is_null()).then(|| faiss_IndexIVF_nprobe(ivf))
        }
    }

    /// 将索引写入到文件
    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path_to_cstring(path.as_ref());
        unsafe {
            faiss_try(faiss_write_index_fname(self.index, path.as_ptr()))?;
        }
        Ok(())
    }
}

impl AnnIndex for IvfPqIndex {
    fn ntotal(&self) -> usize {
        unsafe { faiss_Index_ntotal(self.index) as usize }
    }

    fn dim(&self) -> usize {
        self.d
    }

    fn nprobe(&self) -> Option<usize> {
        IvfPqIndex::nprobe(self)
    }

    fn search(&self, queries: ArrayView2<f32>, k: usize) -> Result<Vec<Vec<Neighbor>>> {
        assert_eq!(queries.ncols(), self.d, "dimension mismatch");
        let n = queries.nrows();
        let queries = queries.as_standard_layout();
        let mut distances = vec![0f32; n * k];
        let mut labels = vec![0i64; n * k];
        unsafe {
            faiss_try(faiss_Index_search(
                self.index,
                n as i64,
                queries.as_ptr(),
                k as i64,
                distances.as_mut_ptr(),
                labels.as_mut_ptr(),
            ))?;
        }

        let result = labels
            .chunks(k.max(1))
            .zip(distances.chunks(k.max(1)))
            .map(|(labels, distances)| {
                labels
                    .iter()
                    .zip(distances)
                    .map(|(&id, &distance)| Neighbor { id, distance })
                    .collect()
            })
            .collect();
        Ok(result)
    }
}

impl Drop for IvfPqIndex {
    fn drop(&mut self) {
        debug!("释放 faiss 索引");
        unsafe {
            faiss_Index_free(self.index);
        }
    }
}

// faiss 的搜索接口是只读的，训练和添加需要 &mut self
unsafe impl Sync for IvfPqIndex {}
unsafe impl Send for IvfPqIndex {}

fn path_to_cstring(path: &Path) -> CString {
    CString::new(path.to_string_lossy().as_bytes()).expect("path contains NUL")
}

fn faiss_try(code: c_int) -> Result<()> {
    if code != 0 {
        let message = unsafe {
            let err = faiss_get_last_error();
            if err.is_null() {
                String::from("unknown error")
            } else {
                CStr::from_ptr(err).to_string_lossy().into_owned()
            }
        };
        return Err(Error::Faiss { code, message });
    }
    Ok(())
}
