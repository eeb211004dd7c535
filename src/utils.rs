use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use indicatif::ProgressStyle;
use ndarray::Array2;
use opencv::prelude::*;
use opencv::{core, imgcodecs, imgproc};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// 从内存中解码图片为灰度图，并按 `max_size` 等比缩小
pub fn imdecode(bytes: &[u8], max_size: (i32, i32)) -> Result<Mat> {
    if bytes.is_empty() {
        return Err(Error::ImageDecode("空文件".to_owned()));
    }
    let mat = Mat::from_slice(bytes)?;
    let img = imgcodecs::imdecode(&mat, imgcodecs::IMREAD_GRAYSCALE)?;
    if img.empty() {
        return Err(Error::ImageDecode(format!("无法解码 {} 字节的数据", bytes.len())));
    }
    adjust_image_size(img, max_size)
}

/// 如果图片宽或高超过 `(width, height)`，则等比缩小；任一维度为 0 表示不限制
pub fn adjust_image_size(img: Mat, (width, height): (i32, i32)) -> Result<Mat> {
    if width <= 0 || height <= 0 || (img.cols() <= width && img.rows() <= height) {
        return Ok(img);
    }
    let (ow, oh) = (img.cols() as f64, img.rows() as f64);
    let scale = (height as f64 / oh).min(width as f64 / ow);
    let mut output = Mat::default();
    imgproc::resize(
        &img,
        &mut output,
        core::Size::default(),
        scale,
        scale,
        imgproc::InterpolationFlags::INTER_AREA as i32,
    )?;
    Ok(output)
}

/// 将 CV_32F 的描述符矩阵拷贝为 ndarray
pub fn mat_to_array(des: &Mat) -> Result<Array2<f32>> {
    if des.empty() {
        return Ok(Array2::zeros((0, des.cols().max(0) as usize)));
    }
    let (rows, cols) = (des.rows() as usize, des.cols() as usize);
    let data = des.data_typed::<f32>()?;
    Ok(Array2::from_shape_fn((rows, cols), |(r, c)| data[r * cols + c]))
}

/// 先写入同目录下的临时文件，成功后再重命名到目标路径
///
/// 写入过程中任何一步失败，临时文件都会被删除，目标文件保持原样。
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = NamedTempFile::new_in(dir)?;
    write(tmp.path())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// 通过带缓冲的写入器写文件，返回前刷新缓冲区，刷新失败同样返回错误
pub fn write_buffered<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let mut writer = BufWriter::new(File::create(path)?);
    write(&mut writer)?;
    writer.flush()?;
    Ok(())
}

/// 删除文件，文件不存在时不视为错误，返回是否确实删除了文件
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix:.bold} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos}/{len} ({eta}) {msg}",
    )
    .expect("invalid progress bar template")
    .progress_chars("##-")
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_write_atomic_replaces_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"old").unwrap();

        write_atomic(&path, |tmp| Ok(std::fs::write(tmp, b"new")?)).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_atomic_failure_keeps_old_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"old").unwrap();

        let r = write_atomic(&path, |tmp| {
            std::fs::write(tmp, b"partial")?;
            Err(Error::Serialize("boom".to_owned()))
        });
        assert!(r.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"old");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_imdecode_rejects_garbage() {
        assert!(matches!(imdecode(b"", (0, 0)), Err(Error::ImageDecode(_))));
        assert!(matches!(imdecode(b"not an image", (0, 0)), Err(Error::ImageDecode(_))));
    }

    #[test]
    fn test_remove_if_exists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x");
        assert!(!remove_if_exists(&path).unwrap());
        std::fs::write(&path, b"1").unwrap();
        assert!(remove_if_exists(&path).unwrap());
    }

    #[test]
    fn test_write_buffered_flushes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.bin");
        write_buffered(&path, |w| Ok(w.write_all(b"buffered")?)).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"buffered");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_write_buffered_reports_flush_failure() {
        // 写入缓冲区总能成功，错误要到刷新时才出现
        let r = write_buffered(Path::new("/dev/full"), |w| Ok(w.write_all(b"x")?));
        assert!(matches!(r, Err(Error::Io(_))));
    }
}
