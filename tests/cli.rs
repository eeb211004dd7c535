use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use opencv::core::{Mat, Size};
use opencv::prelude::*;
use opencv::{imgcodecs, imgproc};
use predicates::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rstest::*;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

/// 放大后的随机噪声图，斑点结构足够 SIFT 提取特征
fn write_noise_image(path: &Path, seed: u64) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let pixels = (0..60 * 80).map(|_| rng.random::<u8>()).collect::<Vec<_>>();
    let small = Mat::from_slice(&pixels)?.reshape(1, 60)?.try_clone()?;
    let mut image = Mat::default();
    imgproc::resize(
        &small,
        &mut image,
        Size::new(320, 240),
        0.,
        0.,
        imgproc::InterpolationFlags::INTER_CUBIC as i32,
    )?;
    fs::create_dir_all(path.parent().unwrap())?;
    imgcodecs::imwrite_def(path.to_str().unwrap(), &image)?;
    Ok(())
}

#[fixture]
fn data_dir() -> assert_fs::TempDir {
    let dir = assert_fs::TempDir::new().unwrap();
    let names = ["set1/00000001.png", "set1/00000002.png", "set2/00000003.png"];
    for (seed, name) in names.iter().enumerate() {
        write_noise_image(&dir.path().join("gallery").join(name), seed as u64).unwrap();
    }
    fs::create_dir_all(dir.path().join("cards_info")).unwrap();
    fs::write(dir.path().join("cards_info/00000002.txt"), "日文名: テスト\n說明: test\n").unwrap();
    dir
}

#[test]
fn build_missing_gallery() -> Result<()> {
    let dir = assert_fs::TempDir::new()?;
    cargo_run!("cardsearch", "-d", dir.path(), "build", "nope")
        .failure()
        .stderr(predicate::str::contains("图库目录不存在"));
    Ok(())
}

#[test]
fn clean_empty_cache() -> Result<()> {
    let dir = assert_fs::TempDir::new()?;
    cargo_run!("cardsearch", "-d", dir.path(), "clean", "set1").success();
    Ok(())
}

#[rstest]
fn build_then_clean(data_dir: assert_fs::TempDir) -> Result<()> {
    let cache = data_dir.path().join("cache");
    cargo_run!("cardsearch", "-d", data_dir.path(), "build", "set1", "--index-type", "flat")
        .success()
        .stdout(predicate::str::contains("图片数量: 2"));
    assert!(cache.join("set1.bin").exists());
    assert!(cache.join("set1.npy").exists());

    cargo_run!("cardsearch", "-d", data_dir.path(), "clean", "set1").success();
    assert!(!cache.join("set1.bin").exists());
    assert!(!cache.join("set1.npy").exists());
    Ok(())
}

#[rstest]
fn match_gallery_image(data_dir: assert_fs::TempDir) -> Result<()> {
    let image = data_dir.path().join("gallery/set1/00000002.png");
    cargo_run!(
        "cardsearch",
        "-d",
        data_dir.path(),
        "match",
        &image,
        "--category",
        "set1",
        "--index-type",
        "flat"
    )
    .success()
    .stdout(predicate::str::contains("00000002").and(predicate::str::contains("テスト")));
    Ok(())
}

#[rstest]
fn multi_tally(data_dir: assert_fs::TempDir) -> Result<()> {
    let gallery = data_dir.path().join("gallery");
    let output = cargo_run!(
        "cardsearch",
        "-d",
        data_dir.path(),
        "multi",
        gallery.join("set2/00000003.png"),
        gallery.join("set1/00000001.png"),
        gallery.join("set2/00000003.png"),
        "--index-type",
        "flat",
        "--output-format",
        "json"
    )
    .success()
    .stdout(predicate::str::contains(r#""status": "identified""#));

    let report: serde_json::Value = serde_json::from_slice(&output.get_output().stdout)?;
    let counts = report["cards"]
        .as_array()
        .unwrap()
        .iter()
        .map(|card| (card[0].as_str().unwrap().to_owned(), card[1]["count"].as_u64().unwrap()))
        .collect::<Vec<_>>();
    assert_eq!(counts, vec![("00000001".to_owned(), 1), ("00000003".to_owned(), 2)]);
    assert_eq!(counts.iter().map(|(_, n)| n).sum::<u64>(), 3);
    assert_eq!(report["skipped"], 0);
    Ok(())
}
