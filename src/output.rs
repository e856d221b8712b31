// 该文件是 Jishu （计数） 项目的一部分。
// src/output.rs - 输出定义
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

use std::path::Path;

use thiserror::Error;

use crate::frame::Frame;

pub mod draw;

mod save_image_file;
pub use self::save_image_file::{ANNOTATED_SUFFIX, annotated_path, save_annotated_image};

mod directory_record;
pub use self::directory_record::DirectoryRecordOutput;

#[cfg(feature = "gstreamer_output")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_video_output::{GStreamerVideoOutput, GStreamerVideoOutputError};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_display;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_display::{DISPLAY_WINDOW_TITLE, GStreamerDisplay};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("字体错误: {0}")]
  FontError(String),
  #[error("不支持的输出: {0}")]
  Unsupported(String),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 视频输出错误: {0}")]
  GStreamerVideoOutputError(#[from] GStreamerVideoOutputError),
}

/// 文件输出：每个运行打开一次、每帧写一次、结束时关闭一次
pub trait FrameSink {
  fn write_frame(&mut self, frame: &Frame) -> Result<(), OutputError>;

  /// 刷新并关闭输出，重复调用无副作用
  fn finish(&mut self) -> Result<(), OutputError>;
}

/// 实时显示输出
pub trait DisplaySink {
  fn show(&mut self, frame: &Frame) -> Result<(), OutputError>;

  /// 非阻塞地检查用户是否要求停止
  fn poll_stop_signal(&mut self) -> bool;

  fn close(&mut self);
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
  fn write_frame(&mut self, frame: &Frame) -> Result<(), OutputError> {
    (**self).write_frame(frame)
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    (**self).finish()
  }
}

impl<S: DisplaySink + ?Sized> DisplaySink for Box<S> {
  fn show(&mut self, frame: &Frame) -> Result<(), OutputError> {
    (**self).show(frame)
  }

  fn poll_stop_signal(&mut self) -> bool {
    (**self).poll_stop_signal()
  }

  fn close(&mut self) {
    (**self).close()
  }
}

/// 一次运行中启用的输出
#[derive(Default)]
pub struct Sinks {
  pub file: Option<Box<dyn FrameSink>>,
  pub display: Option<Box<dyn DisplaySink>>,
}

impl Sinks {
  pub fn none() -> Self {
    Self::default()
  }

  pub fn with_file(mut self, sink: impl FrameSink + 'static) -> Self {
    self.file = Some(Box::new(sink));
    self
  }

  pub fn with_display(mut self, sink: impl DisplaySink + 'static) -> Self {
    self.display = Some(Box::new(sink));
    self
  }
}

const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "mkv", "avi", "webm"];

pub fn is_video_path(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      VIDEO_EXTENSIONS
        .iter()
        .any(|known| ext.eq_ignore_ascii_case(known))
    })
    .unwrap_or(false)
}

/// 根据输出路径创建文件输出
///
/// 视频扩展名使用 GStreamer 编码，其余路径视为逐帧图片目录。
pub fn create_file_sink(
  path: &Path,
  width: u32,
  height: u32,
  fps: Option<f64>,
) -> Result<Box<dyn FrameSink>, OutputError> {
  if is_video_path(path) {
    #[cfg(feature = "gstreamer_output")]
    {
      let output = GStreamerVideoOutput::new(path, width, height, fps.unwrap_or(30.0))?;
      return Ok(Box::new(output));
    }
    #[cfg(not(feature = "gstreamer_output"))]
    {
      let _ = (width, height, fps);
      return Err(OutputError::Unsupported(format!(
        "{} 需要启用 gstreamer_output 特性",
        path.display()
      )));
    }
  }
  Ok(Box::new(DirectoryRecordOutput::create(path)?))
}
