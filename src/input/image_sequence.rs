// 该文件是 Jishu （计数） 项目的一部分。
// src/input/image_sequence.rs - 图片序列目录输入
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

use std::{
  collections::VecDeque,
  path::{Path, PathBuf},
};

use tracing::{debug, info};

use crate::{
  frame::Frame,
  input::{FrameSource, ImageFileInput, InputError, is_image_path},
};

const SEQUENCE_FPS: f64 = 30.0;

/// 以目录中的图片作为连续帧，按文件名排序读取
pub struct ImageSequenceInput {
  pending: VecDeque<PathBuf>,
  width: u32,
  height: u32,
  frame_index: u64,
  closed: bool,
}

impl ImageSequenceInput {
  pub fn open(directory: &Path) -> Result<Self, InputError> {
    let entries =
      std::fs::read_dir(directory).map_err(|e| InputError::unavailable(directory.display(), e))?;

    let mut files: Vec<PathBuf> = entries
      .filter_map(|entry| entry.ok().map(|entry| entry.path()))
      .filter(|path| path.is_file() && is_image_path(path))
      .collect();
    files.sort();

    // 读取第一张图片以确定帧尺寸
    let first = files
      .first()
      .ok_or_else(|| InputError::unavailable(directory.display(), "目录中没有图片"))?;
    let (width, height) = ImageFileInput::open(first)?.image().dimensions();

    info!(
      "打开图片序列 {}: {} 帧, {}x{}",
      directory.display(),
      files.len(),
      width,
      height
    );

    Ok(ImageSequenceInput {
      pending: files.into(),
      width,
      height,
      frame_index: 0,
      closed: false,
    })
  }

  pub fn remaining(&self) -> usize {
    self.pending.len()
  }
}

impl Iterator for ImageSequenceInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.closed {
      return None;
    }
    let path = self.pending.pop_front()?;
    debug!("读取序列帧: {}", path.display());

    let index = self.frame_index;
    self.frame_index += 1;
    let timestamp_ms = (index as f64 * 1000.0 / SEQUENCE_FPS) as u64;

    Some(
      ImageFileInput::open(&path)
        .map(|input| Frame::new(input.into_image(), index, timestamp_ms))
        .map_err(|e| InputError::ReadError(e.to_string())),
    )
  }
}

impl FrameSource for ImageSequenceInput {
  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> Option<f64> {
    Some(SEQUENCE_FPS)
  }

  fn close(&mut self) {
    self.closed = true;
    self.pending.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  #[test]
  fn reads_images_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::new(4, 4).save(dir.path().join("b.png")).unwrap();
    RgbImage::new(4, 4).save(dir.path().join("a.png")).unwrap();
    std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

    let mut input = ImageSequenceInput::open(dir.path()).unwrap();
    assert_eq!((input.width(), input.height()), (4, 4));
    assert_eq!(input.remaining(), 2);

    let frames: Vec<_> = input.by_ref().map(Result::unwrap).collect();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].index, 0);
    assert_eq!(frames[1].index, 1);
    assert!(input.next().is_none());
  }

  #[test]
  fn empty_directories_are_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      ImageSequenceInput::open(dir.path()),
      Err(InputError::SourceUnavailable { .. })
    ));
  }

  #[test]
  fn closing_ends_the_stream() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::new(2, 2).save(dir.path().join("a.png")).unwrap();
    let mut input = ImageSequenceInput::open(dir.path()).unwrap();
    input.close();
    assert!(input.next().is_none());
  }
}
