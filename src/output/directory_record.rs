// 该文件是 Jishu （计数） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;

use crate::{
  frame::Frame,
  output::{FrameSink, OutputError},
};

/// 将标注后的帧逐张保存为 PNG
///
/// 每次运行在目标目录下新建 `<日期>/<时间>` 子目录，
/// 文件名为六位帧序号。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frames_written: u64,
  finished: bool,
}

impl DirectoryRecordOutput {
  pub fn create(root: &Path) -> Result<Self, OutputError> {
    let now = Local::now();
    let directory = root
      .join(now.format("%Y-%m-%d").to_string())
      .join(now.format("%H-%M-%S").to_string());
    std::fs::create_dir_all(&directory)?;
    info!("逐帧保存到目录: {}", directory.display());

    Ok(DirectoryRecordOutput {
      directory,
      frames_written: 0,
      finished: false,
    })
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn frames_written(&self) -> u64 {
    self.frames_written
  }

  fn frame_path(&self) -> PathBuf {
    self
      .directory
      .join(format!("{:06}.png", self.frames_written + 1))
  }
}

impl FrameSink for DirectoryRecordOutput {
  fn write_frame(&mut self, frame: &Frame) -> Result<(), OutputError> {
    if self.finished {
      return Err(OutputError::Unsupported("输出已关闭".to_string()));
    }
    frame.image.save(self.frame_path())?;
    self.frames_written += 1;
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    if !self.finished {
      self.finished = true;
      info!(
        "目录记录完成，共 {} 帧: {}",
        self.frames_written,
        self.directory.display()
      );
    }
    Ok(())
  }
}
