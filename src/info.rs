use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use log::{debug, warn};
use regex::Regex;
use serde::Serialize;

use crate::error::Result;

/// 卡片 ID 的宽度
pub const CARD_ID_WIDTH: usize = 8;

const JP_NAME_LABEL: &str = "日文名:";
const IMAGE_URL_LABEL: &str = "圖片 URL:";

static RE_URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(https?://[^\s]+)").unwrap());
static RE_IMG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<img src="[^"]+" alt="圖片" />"#).unwrap());

/// 由图库文件名得到卡片 ID：去掉扩展名，取前 8 个字符，不足 8 位左侧补 0
pub fn card_id_from_name(name: &str) -> String {
    let stem = Path::new(name).file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let head = stem.chars().take(CARD_ID_WIDTH).collect::<String>();
    format!("{head:0>CARD_ID_WIDTH$}")
}

/// 一张卡片的资料
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardInfo {
    pub card_id: String,
    /// 资料文件路径
    pub source: PathBuf,
    /// 日文名，查询价格时使用
    pub name_jp: String,
    /// 所有图片链接转换成的 `<img>` 标签
    pub images_html: String,
    /// 去掉图片后的文字部分
    pub text_html: String,
}

/// 卡片资料目录，每张卡片一个以卡片 ID 开头的 txt 文件
pub struct InfoStore {
    dir: PathBuf,
}

impl InfoStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 按文件名排序后，返回第一个以 `card_id` 开头的 txt 文件
    pub fn find(&self, card_id: &str) -> Result<Option<PathBuf>> {
        if !self.dir.is_dir() {
            warn!("卡片资料目录不存在: {}", self.dir.display());
            return Ok(None);
        }
        let mut matches = vec![];
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(card_id) && name.to_lowercase().ends_with(".txt") {
                matches.push(entry.path());
            }
        }
        matches.sort();
        Ok(matches.into_iter().next())
    }

    /// 读取卡片资料，找不到资料文件时返回 `None`
    pub fn lookup(&self, card_id: &str) -> Result<Option<CardInfo>> {
        let Some(source) = self.find(card_id)? else {
            return Ok(None);
        };
        debug!("匹配资料文件: {}", source.display());
        let raw = std::fs::read_to_string(&source)?;
        let (images_html, text_html) = render(&raw);
        Ok(Some(CardInfo {
            card_id: card_id.to_owned(),
            source,
            name_jp: japanese_name(&raw).unwrap_or_default(),
            images_html,
            text_html,
        }))
    }
}

/// 资料中 `日文名:` 行的内容
pub fn japanese_name(raw: &str) -> Option<String> {
    raw.lines()
        .find_map(|line| line.strip_prefix(JP_NAME_LABEL))
        .map(|name| name.trim().to_owned())
}

/// 将资料文本渲染为 `(图片, 文字)` 两段 HTML
pub fn render(raw: &str) -> (String, String) {
    let escaped = escape_html(raw).replace(IMAGE_URL_LABEL, "").replace('\n', " <br>");
    let html = RE_URL.replace_all(&escaped, r#"<img src="$1" alt="圖片" />"#);
    let images = RE_IMG.find_iter(&html).map(|m| m.as_str()).collect::<String>();
    let text = RE_IMG.replace_all(&html, "").into_owned();
    (images, text)
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
