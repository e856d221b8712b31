// 该文件是 Jishu （计数） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! 本模块提供基于 GStreamer 的连续输入：
//! - 视频文件读取（`filesrc ! decodebin`）
//! - 摄像头捕获（`v4l2src device=/dev/video<N>`）
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! 所有帧都在管道内转换为 RGB，交给计数流程时为 `RgbImage`。

use std::{path::Path, time::Instant};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  frame::Frame,
  input::{FrameSource, InputError},
};

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource { camera: String },
  TargetFormat { format: String },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource { camera } => {
        format!("v4l2src device={}", camera)
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

/// GStreamer 视频输入
///
/// 管理 GStreamer 管道和 appsink，逐帧拉取 RGB 图像。
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  width: u32,
  height: u32,
  fps: Option<f64>,
  frame_index: u64,
  start_time: Instant,
  closed: bool,
}

impl GStreamerInput {
  pub fn open_file(path: &Path) -> Result<Self, InputError> {
    if !path.is_file() {
      return Err(InputError::unavailable(path.display(), "文件不存在"));
    }
    let items = vec![
      GStreamerInputBuilderItem::FileSource(path.to_string_lossy().into_owned()),
      GStreamerInputBuilderItem::TargetFormat {
        format: "RGB".to_string(),
      },
    ];
    Self::build(&items).map_err(|e| InputError::unavailable(path.display(), e))
  }

  pub fn open_camera(index: u32) -> Result<Self, InputError> {
    let camera = format!("/dev/video{}", index);
    let items = vec![
      GStreamerInputBuilderItem::CameraSource {
        camera: camera.clone(),
      },
      GStreamerInputBuilderItem::TargetFormat {
        format: "RGB".to_string(),
      },
    ];
    Self::build(&items).map_err(|e| InputError::unavailable(camera, e))
  }

  fn build(items: &[GStreamerInputBuilderItem]) -> Result<Self, GStreamerInputError> {
    gst::init()?;

    let basic_pipeline = items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    let full_pipeline = format!("{} ! appsink max-buffers=2 name=sink", basic_pipeline);

    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    // 预读一帧以确定尺寸与帧率，预读失败说明输入无法打开
    let preroll = appsink.pull_preroll().map_err(|e| {
      let _ = pipeline.set_state(gst::State::Null);
      GStreamerInputError::PipelineError(format!("Failed to preroll: {}", e))
    })?;
    let caps = preroll
      .caps()
      .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;
    let video_info =
      gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
    let fps = video_info.fps();
    let fps = (fps.numer() > 0 && fps.denom() > 0)
      .then(|| fps.numer() as f64 / fps.denom() as f64);

    Ok(GStreamerInput {
      pipeline,
      appsink,
      width: video_info.width(),
      height: video_info.height(),
      fps,
      frame_index: 0,
      start_time: Instant::now(),
      closed: false,
    })
  }
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    self.close();
  }
}

fn convert_sample_to_rgb(sample: &gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
  if video_info.format() != gst_video::VideoFormat::Rgb {
    return Err(GStreamerInputError::UnsupportedFormat);
  }

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let expected_size = stride * (height.saturating_sub(1)) + width * 3;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  // 行可能带有对齐填充，逐行拷贝
  let mut pixels = Vec::with_capacity(width * height * 3);
  for row in 0..height {
    let start = row * stride;
    pixels.extend_from_slice(&data[start..start + width * 3]);
  }

  RgbImage::from_raw(width as u32, height as u32, pixels)
    .ok_or_else(|| GStreamerInputError::PipelineError("无法创建 RGB 图像".to_string()))
}

impl Iterator for GStreamerInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.closed {
      return None;
    }
    // 拉取失败即流结束（EOS）
    let sample = self.appsink.pull_sample().ok()?;
    let image = match convert_sample_to_rgb(&sample) {
      Ok(image) => image,
      Err(e) => {
        error!("Failed to fetch sample: {}", e);
        return Some(Err(InputError::from(e)));
      }
    };

    let frame = Frame::new(
      image,
      self.frame_index,
      self.start_time.elapsed().as_millis() as u64,
    );
    self.frame_index += 1;
    Some(Ok(frame))
  }
}

impl FrameSource for GStreamerInput {
  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> Option<f64> {
    self.fps
  }

  fn close(&mut self) {
    if self.closed {
      return;
    }
    self.closed = true;
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}
