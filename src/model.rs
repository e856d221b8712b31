// 该文件是 Jishu （计数） 项目的一部分。
// src/model.rs - 模型
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

use image::RgbImage;
use serde::Deserialize;

/// 检测模型边界
///
/// 给定一帧图像，返回该帧的全部检测结果；类别名称由模型自身提供。
pub trait Model {
  type Error;

  fn infer(&self, image: &RgbImage) -> Result<DetectResult, Self::Error>;

  /// 类别 id 到名称的映射，对模型可能输出的所有 id 都有定义
  fn label_of(&self, class_id: u32) -> String;
}

impl<M: Model + ?Sized> Model for &M {
  type Error = M::Error;

  fn infer(&self, image: &RgbImage) -> Result<DetectResult, Self::Error> {
    (**self).infer(image)
  }

  fn label_of(&self, class_id: u32) -> String {
    (**self).label_of(class_id)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，像素坐标
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    DetectResult {
      items: items.into_boxed_slice(),
    }
  }
}

/// 没有名称的类别使用的占位名称
pub fn fallback_label(class_id: u32) -> String {
  format!("class{}", class_id)
}

mod replay;
pub use self::replay::{ReplayModel, ReplayModelError};
