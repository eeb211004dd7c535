use std::fs;

use anyhow::Result;
use cardsearch::aggregate::{Aggregator, BatchOutcome};
use cardsearch::config::{DataLayout, IndexOptions, IndexType};
use cardsearch::flow::{SingleOutcome, identify_one};
use cardsearch::index::AnnIndex;
use cardsearch::info::InfoStore;
use cardsearch::matcher::DEFAULT_RATIO;
use cardsearch::sift::{ExtractorFactory, FeatureExtractor, Features, KeyPointAttr};
use cardsearch::store::DescriptorStore;
use cardsearch::{CacheManager, Error};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rstest::*;
use tempfile::TempDir;

const DIM: usize = 128;
const IMAGES: u64 = 10;

/// 文件内容为 `seed` 或 `seed:count`，描述符由种子生成的随机数构成
struct SeededExtractor;

impl FeatureExtractor for SeededExtractor {
    fn detect_bytes(&mut self, bytes: &[u8]) -> cardsearch::Result<Features> {
        let text = String::from_utf8_lossy(bytes);
        let (seed, count) = text.trim().split_once(':').unwrap_or((text.trim(), "80"));
        let (Ok(seed), Ok(count)) = (seed.parse::<u64>(), count.parse::<usize>()) else {
            return Err(Error::ImageDecode(text.into_owned()));
        };
        let mut rng = StdRng::seed_from_u64(seed);
        let descriptors = Array2::from_shape_fn((count, DIM), |_| rng.random::<f32>());
        let keypoints =
            (0..count).map(|i| KeyPointAttr { x: i as f32, y: 0., size: 1., angle: 0. }).collect();
        Ok(Features { keypoints, descriptors })
    }
}

fn factory() -> ExtractorFactory {
    std::sync::Arc::new(|| Ok(Box::new(SeededExtractor) as Box<dyn FeatureExtractor>))
}

fn ivfpq() -> IndexOptions {
    IndexOptions { index_type: IndexType::IvfPq, nlist: 4, pq_m: 16, pq_nbits: 8, nprobe: 1 }
}

#[fixture]
fn data_dir() -> (TempDir, DataLayout) {
    let dir = TempDir::new().unwrap();
    let layout = DataLayout::new(dir.path());
    let set1 = layout.gallery_dir("set1");
    fs::create_dir_all(&set1).unwrap();
    for seed in 0..IMAGES {
        fs::write(set1.join(format!("{:08}.jpg", seed + 1)), seed.to_string()).unwrap();
    }
    fs::create_dir_all(&layout.info).unwrap();
    fs::write(layout.info.join("00000004.txt"), "日文名: 四\n圖片 URL: https://x.example/4.png\n")
        .unwrap();
    (dir, layout)
}

fn manager(layout: &DataLayout) -> CacheManager {
    CacheManager::new(DescriptorStore::new(layout.clone(), "jpg"), ivfpq(), factory())
}

#[rstest]
#[case(0)]
#[case(3)]
#[case(9)]
fn self_identification(data_dir: (TempDir, DataLayout), #[case] seed: u64) -> Result<()> {
    let (_dir, layout) = data_dir;
    let manager = manager(&layout);
    let info = InfoStore::new(&layout.info);

    let outcome = identify_one(
        seed.to_string().as_bytes(),
        "set1",
        &manager,
        &mut SeededExtractor,
        &info,
        DEFAULT_RATIO,
    )?;
    let SingleOutcome::Matched { card_id, votes, info, .. } = outcome else {
        panic!("image {seed} was not identified");
    };
    assert_eq!(card_id, format!("{:08}", seed + 1));
    assert!(votes >= 2);
    assert_eq!(info.is_some(), seed == 3);
    Ok(())
}

#[rstest]
fn index_persisted_and_reloaded(data_dir: (TempDir, DataLayout)) -> Result<()> {
    let (_dir, layout) = data_dir;
    let index_file = layout.index_file("set1");

    let first = manager(&layout).gallery("set1")?;
    assert!(index_file.exists());
    assert_eq!(first.index.ntotal(), IMAGES as usize * 80);
    let modified = fs::metadata(&index_file)?.modified()?;

    let second = manager(&layout).gallery("set1")?;
    assert_eq!(second.index.ntotal(), first.index.ntotal());
    assert_eq!(second.cache, first.cache);
    assert_eq!(fs::metadata(&index_file)?.modified()?, modified);
    Ok(())
}

#[rstest]
fn one_cell_searched_per_query(data_dir: (TempDir, DataLayout)) -> Result<()> {
    let (_dir, layout) = data_dir;
    let trained = manager(&layout).gallery("set1")?;
    assert_eq!(trained.index.nprobe(), Some(1));

    let loaded = manager(&layout).gallery("set1")?;
    assert_eq!(loaded.index.nprobe(), Some(1));

    // 文件中保存的值不影响加载后的设置
    let opts = IndexOptions { nprobe: 3, ..ivfpq() };
    let manager = CacheManager::new(DescriptorStore::new(layout.clone(), "jpg"), opts, factory());
    assert_eq!(manager.gallery("set1")?.index.nprobe(), Some(3));
    Ok(())
}

#[rstest]
fn corrupt_index_retrained(data_dir: (TempDir, DataLayout)) -> Result<()> {
    let (_dir, layout) = data_dir;
    manager(&layout).gallery("set1")?;
    fs::write(layout.index_file("set1"), b"not an index")?;

    let gallery = manager(&layout).gallery("set1")?;
    assert_eq!(gallery.index.ntotal(), IMAGES as usize * 80);
    Ok(())
}

#[rstest]
fn insufficient_training_data(data_dir: (TempDir, DataLayout)) -> Result<()> {
    let (_dir, layout) = data_dir;
    let opts = IndexOptions { nlist: 2000, ..ivfpq() };
    let manager = CacheManager::new(DescriptorStore::new(layout.clone(), "jpg"), opts, factory());
    let r = manager.gallery("set1");
    assert!(matches!(r, Err(Error::InsufficientData { have: 800, need: 2000, .. })));
    assert!(!layout.index_file("set1").exists());
    Ok(())
}

#[rstest]
fn batch_of_three(data_dir: (TempDir, DataLayout)) -> Result<()> {
    let (_dir, layout) = data_dir;
    let manager = manager(&layout);
    let info = InfoStore::new(&layout.info);
    let gallery = manager.gallery("set1")?;
    let aggregator = Aggregator::new(&gallery, &info, DEFAULT_RATIO);

    // 只有一个描述符的图片最多得到一票
    let outcome = aggregator.run(&["3", "999:1", "3"], &mut SeededExtractor)?;
    let BatchOutcome::Identified(report) = &outcome else {
        panic!("expected identified batch, got {outcome:?}");
    };
    assert_eq!(report.kinds(), 1);
    assert_eq!(report.total(), 2);
    assert_eq!(report.skipped, 1);
    let (card_id, tally) = &report.cards[0];
    assert_eq!(card_id, "00000004");
    assert_eq!(tally.count, 2);
    let info = tally.info.as_ref().unwrap();
    assert_eq!(info.name_jp, "四");
    assert_eq!(info.images_html, r#"<img src="https://x.example/4.png" alt="圖片" />"#);
    Ok(())
}
