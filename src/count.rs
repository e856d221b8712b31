// 该文件是 Jishu （计数） 项目的一部分。
// src/count.rs - 检测过滤与分类计数
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

use std::{collections::BTreeMap, fmt};

use crate::model::DetectItem;

/// 按置信度过滤检测结果，保持原有顺序
///
/// `score >= threshold` 的检测被保留。阈值不做范围检查，
/// 超出 `[0, 1]` 时等价于全部保留或全部丢弃。
pub fn filter_detections(items: &[DetectItem], threshold: f32) -> Vec<DetectItem> {
  items
    .iter()
    .filter(|item| item.score >= threshold)
    .copied()
    .collect()
}

/// 单帧（或单张图片）的分类计数
///
/// 每帧从头计算，不跨帧累加。`per_category` 使用有序映射，
/// 遍历顺序即类别名称的字典序。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountSnapshot {
  pub per_category: BTreeMap<String, u64>,
  pub total: u64,
}

impl CountSnapshot {
  pub fn is_empty(&self) -> bool {
    self.per_category.is_empty()
  }

  /// 按字典序遍历 (类别, 数量)
  pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
    self
      .per_category
      .iter()
      .map(|(label, count)| (label.as_str(), *count))
  }

  pub fn get(&self, label: &str) -> u64 {
    self.per_category.get(label).copied().unwrap_or(0)
  }
}

impl fmt::Display for CountSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "total={}", self.total)?;
    for (label, count) in self.iter() {
      write!(f, ", {}={}", label, count)?;
    }
    Ok(())
  }
}

/// 将已接受的检测归约为分类计数
pub fn aggregate<F>(items: &[DetectItem], label_of: F) -> CountSnapshot
where
  F: Fn(u32) -> String,
{
  let mut per_category = BTreeMap::new();
  for item in items {
    *per_category.entry(label_of(item.class_id)).or_insert(0u64) += 1;
  }
  let total = per_category.values().sum();
  CountSnapshot {
    per_category,
    total,
  }
}
