// 该文件是 Jishu （计数） 项目的一部分。
// src/snapshot.rs - 计数快照 CSV 记录
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

//! # 计数快照
//!
//! 快照文件为纯文本 CSV，每次写入都整体覆盖：
//!
//! ```text
//! class,count
//! total,3
//! car,1
//! person,2
//! ```
//!
//! 类别行按名称字典序排列，与画面上的统计面板一致。

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, info};

use crate::count::CountSnapshot;

pub const SNAPSHOT_HEADER: [&str; 2] = ["class", "count"];
pub const SNAPSHOT_TOTAL_ROW: &str = "total";
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum SnapshotError {
  #[error("无法写入快照文件 {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("无法读取快照文件 {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("快照格式错误（第 {line} 行）: {reason}")]
  Format { line: usize, reason: String },
}

fn escape_field(field: &str) -> String {
  if field.contains([',', '"', '\n', '\r']) {
    format!("\"{}\"", field.replace('"', "\"\""))
  } else {
    field.to_string()
  }
}

/// 将快照序列化为 CSV 文本
pub fn to_csv(snapshot: &CountSnapshot) -> String {
  let mut out = String::new();
  out.push_str(&SNAPSHOT_HEADER.join(","));
  out.push_str("\r\n");
  out.push_str(&format!("{},{}\r\n", SNAPSHOT_TOTAL_ROW, snapshot.total));
  for (label, count) in snapshot.iter() {
    out.push_str(&format!("{},{}\r\n", escape_field(label), count));
  }
  out
}

fn split_record(line: &str, line_no: usize) -> Result<(String, String), SnapshotError> {
  let format_error = |reason: &str| SnapshotError::Format {
    line: line_no,
    reason: reason.to_string(),
  };

  let (label, rest) = if let Some(quoted) = line.strip_prefix('"') {
    let mut label = String::new();
    let mut chars = quoted.char_indices().peekable();
    let mut end = None;
    while let Some((idx, ch)) = chars.next() {
      if ch == '"' {
        if let Some((_, '"')) = chars.peek() {
          chars.next();
          label.push('"');
        } else {
          end = Some(idx + 1);
          break;
        }
      } else {
        label.push(ch);
      }
    }
    let end = end.ok_or_else(|| format_error("引号未闭合"))?;
    let rest = quoted[end..]
      .strip_prefix(',')
      .ok_or_else(|| format_error("缺少分隔符"))?;
    (label, rest)
  } else {
    let (label, rest) = line
      .rsplit_once(',')
      .ok_or_else(|| format_error("缺少分隔符"))?;
    (label.to_string(), rest)
  };

  Ok((label, rest.to_string()))
}

/// 从 CSV 文本解析快照
pub fn from_csv(text: &str) -> Result<CountSnapshot, SnapshotError> {
  let mut lines = text.lines().enumerate();

  match lines.next() {
    Some((_, header)) if header == SNAPSHOT_HEADER.join(",") => {}
    _ => {
      return Err(SnapshotError::Format {
        line: 1,
        reason: "缺少表头".to_string(),
      });
    }
  }

  let mut total = None;
  let mut per_category = BTreeMap::new();
  for (idx, line) in lines {
    let line_no = idx + 1;
    if line.is_empty() {
      continue;
    }
    let (label, count) = split_record(line, line_no)?;
    let count: u64 = count.trim().parse().map_err(|_| SnapshotError::Format {
      line: line_no,
      reason: format!("计数无效: {}", count),
    })?;
    if total.is_none() && label == SNAPSHOT_TOTAL_ROW {
      total = Some(count);
    } else {
      per_category.insert(label, count);
    }
  }

  Ok(CountSnapshot {
    per_category,
    total: total.ok_or_else(|| SnapshotError::Format {
      line: 2,
      reason: "缺少 total 行".to_string(),
    })?,
  })
}

/// 覆盖写入一次快照
pub fn write_snapshot(snapshot: &CountSnapshot, path: &Path) -> Result<(), SnapshotError> {
  std::fs::write(path, to_csv(snapshot)).map_err(|source| SnapshotError::Write {
    path: path.to_path_buf(),
    source,
  })
}

pub fn read_snapshot(path: &Path) -> Result<CountSnapshot, SnapshotError> {
  let text = std::fs::read_to_string(path).map_err(|source| SnapshotError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  from_csv(&text)
}

/// 带节流的快照写入器
///
/// 连续输入时两次写入之间至少间隔 `interval`；第一次总是允许写入。
/// 计时器属于单次运行，不在多次运行之间共享。
#[derive(Debug)]
pub struct SnapshotWriter {
  path: PathBuf,
  interval: Duration,
  last_write: Option<Instant>,
}

impl SnapshotWriter {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    SnapshotWriter {
      path: path.into(),
      interval: DEFAULT_SNAPSHOT_INTERVAL,
      last_write: None,
    }
  }

  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = interval;
    self
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn interval(&self) -> Duration {
    self.interval
  }

  pub fn is_due(&self, now: Instant) -> bool {
    match self.last_write {
      None => true,
      Some(last) => now.saturating_duration_since(last) >= self.interval,
    }
  }

  /// 到期时写入快照，返回是否进行了写入
  ///
  /// 写入失败同样会重置计时器，下一个到期窗口再重试。
  pub fn write_debounced(
    &mut self,
    snapshot: &CountSnapshot,
    now: Instant,
  ) -> Result<bool, SnapshotError> {
    if !self.is_due(now) {
      return Ok(false);
    }
    self.last_write = Some(now);
    write_snapshot(snapshot, &self.path)?;
    debug!("快照已写入: {} ({})", self.path.display(), snapshot);
    Ok(true)
  }

  /// 不受节流限制的写入，用于单张图片和流结束时的最终快照
  pub fn write_now(&mut self, snapshot: &CountSnapshot) -> Result<(), SnapshotError> {
    self.last_write = Some(Instant::now());
    write_snapshot(snapshot, &self.path)?;
    info!("保存计数快照: {}", self.path.display());
    Ok(())
  }
}
