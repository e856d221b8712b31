// 该文件是 Jishu （计数） 项目的一部分。
// src/model/replay.rs - 回放检测结果的模型
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! # 回放模型
//!
//! 从 JSON 文件读取预先计算好的检测结果，按调用次数依次返回。
//! 适用于离线复现一次运行，或在没有推理硬件的机器上调试计数流程。
//!
//! ## URL Scheme
//!
//! `replay:///path/to/detections.json`
//!
//! ## 文件格式
//!
//! ```json
//! {
//!   "labels": ["person", "bicycle", "car"],
//!   "frames": [
//!     [{"class_id": 0, "score": 0.91, "bbox": [12.0, 40.5, 88.0, 200.0]}],
//!     []
//!   ]
//! }
//! ```
//!
//! 第 `n` 次调用返回 `frames[n % frames.len()]`。

use std::{cell::Cell, path::Path};

use image::RgbImage;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectItem, DetectResult, Model, fallback_label},
  url_file_path,
};

#[derive(Error, Debug)]
pub enum ReplayModelError {
  #[error("模型路径必须使用 {0} 方案")]
  SchemeMismatch(&'static str),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("检测文件格式错误: {0}")]
  FormatError(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct ReplayFile {
  #[serde(default)]
  labels: Vec<String>,
  #[serde(default)]
  frames: Vec<Vec<DetectItem>>,
}

#[derive(Debug)]
pub struct ReplayModel {
  labels: Vec<String>,
  frames: Vec<Box<[DetectItem]>>,
  cursor: Cell<usize>,
}

impl FromUrlWithScheme for ReplayModel {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayModel {
  type Error = ReplayModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayModelError::SchemeMismatch(Self::SCHEME));
    }
    Self::open(url_file_path(url))
  }
}

impl ReplayModel {
  pub fn new(labels: Vec<String>, frames: Vec<Vec<DetectItem>>) -> Self {
    ReplayModel {
      labels,
      frames: frames.into_iter().map(Vec::into_boxed_slice).collect(),
      cursor: Cell::new(0),
    }
  }

  pub fn open(path: impl AsRef<Path>) -> Result<Self, ReplayModelError> {
    let path = path.as_ref();
    info!("加载检测回放文件: {}", path.display());
    let data = std::fs::read(path)?;
    let file: ReplayFile = serde_json::from_slice(&data)?;
    debug!(
      "回放文件包含 {} 个类别, {} 帧",
      file.labels.len(),
      file.frames.len()
    );
    Ok(Self::new(file.labels, file.frames))
  }
}

impl Model for ReplayModel {
  type Error = ReplayModelError;

  fn infer(&self, _image: &RgbImage) -> Result<DetectResult, Self::Error> {
    if self.frames.is_empty() {
      return Ok(DetectResult::default());
    }
    let index = self.cursor.get();
    self.cursor.set(index.wrapping_add(1));
    let items = self.frames[index % self.frames.len()].clone();
    debug!("回放第 {} 次推理, {} 个检测", index, items.len());
    Ok(DetectResult { items })
  }

  fn label_of(&self, class_id: u32) -> String {
    self
      .labels
      .get(class_id as usize)
      .cloned()
      .unwrap_or_else(|| fallback_label(class_id))
  }
}
