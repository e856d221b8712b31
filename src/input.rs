// 该文件是 Jishu （计数） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use std::{fmt, path::PathBuf, str::FromStr};

use thiserror::Error;

use crate::frame::Frame;

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, is_image_path};

mod image_sequence;
pub use self::image_sequence::ImageSequenceInput;

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInput, GStreamerInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("无法打开输入源 {source_name}: {reason}")]
  SourceUnavailable { source_name: String, reason: String },
  #[error("读取帧失败: {0}")]
  ReadError(String),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
}

impl InputError {
  pub fn unavailable(source: impl fmt::Display, reason: impl fmt::Display) -> Self {
    InputError::SourceUnavailable {
      source_name: source.to_string(),
      reason: reason.to_string(),
    }
  }
}

/// 输入源描述：纯数字为摄像头序号，其余为文件路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
  Device(u32),
  Path(PathBuf),
}

impl SourceSpec {
  pub fn parse(source: &str) -> Self {
    if !source.is_empty() && source.bytes().all(|b| b.is_ascii_digit()) {
      if let Ok(index) = source.parse() {
        return SourceSpec::Device(index);
      }
    }
    SourceSpec::Path(PathBuf::from(source))
  }

  /// 是否为单张静态图片
  pub fn is_still(&self) -> bool {
    match self {
      SourceSpec::Device(_) => false,
      SourceSpec::Path(path) => is_image_path(path),
    }
  }
}

impl FromStr for SourceSpec {
  type Err = std::convert::Infallible;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(SourceSpec::parse(s))
  }
}

impl fmt::Display for SourceSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SourceSpec::Device(index) => write!(f, "camera #{}", index),
      SourceSpec::Path(path) => write!(f, "{}", path.display()),
    }
  }
}

/// 连续输入源
///
/// 迭代器返回 `None` 表示输入结束；`Some(Err(_))` 为读取失败。
pub trait FrameSource: Iterator<Item = Result<Frame, InputError>> {
  /// 获取帧宽度
  fn width(&self) -> u32;

  /// 获取帧高度
  fn height(&self) -> u32;

  /// 获取帧率（如果适用）
  fn fps(&self) -> Option<f64>;

  /// 释放输入源，重复调用无副作用
  fn close(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn width(&self) -> u32 {
    (**self).width()
  }

  fn height(&self) -> u32 {
    (**self).height()
  }

  fn fps(&self) -> Option<f64> {
    (**self).fps()
  }

  fn close(&mut self) {
    (**self).close()
  }
}

/// 打开连续输入源
///
/// 目录按文件名顺序读取其中的图片；其余文件和摄像头需要 GStreamer 支持。
pub fn open_source(spec: &SourceSpec) -> Result<Box<dyn FrameSource>, InputError> {
  match spec {
    SourceSpec::Path(path) if path.is_dir() => Ok(Box::new(ImageSequenceInput::open(path)?)),
    #[cfg(feature = "gstreamer_input")]
    SourceSpec::Path(path) => Ok(Box::new(GStreamerInput::open_file(path)?)),
    #[cfg(feature = "gstreamer_input")]
    SourceSpec::Device(index) => Ok(Box::new(GStreamerInput::open_camera(*index)?)),
    #[cfg(not(feature = "gstreamer_input"))]
    _ => Err(InputError::unavailable(
      spec,
      "视频文件与摄像头需要启用 gstreamer_input 特性",
    )),
  }
}
