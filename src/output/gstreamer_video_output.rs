// 该文件是 Jishu （计数） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件输出
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

//! # GStreamer 视频文件输出模块
//!
//! 将标注后的帧编码保存为视频文件，编码器按扩展名选择：
//!
//! - **MP4** (H.264)，未知扩展名的默认选择
//! - **MKV** (Matroska)
//! - **AVI**
//! - **WebM** (VP8)
//!
//! ## 系统依赖
//!
//! 需要 GStreamer 开发库以及 `x264enc` / `vp8enc` 所在的插件包。

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  frame::Frame,
  output::{FrameSink, OutputError},
};

/// GStreamer 视频输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsrc 元素
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  /// 无法转换元素为 appsrc
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 帧尺寸与编码器不一致
  #[error("Frame size mismatch: expected {expected:?}, got {actual:?}")]
  FrameSizeMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
}

fn encoder_pipeline(file_path: &str) -> String {
  let lower = file_path.to_lowercase();
  if lower.ends_with(".mkv") {
    format!(
      "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! matroskamux ! filesink location=\"{}\"",
      file_path
    )
  } else if lower.ends_with(".avi") {
    format!(
      "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! x264enc ! avimux ! filesink location=\"{}\"",
      file_path
    )
  } else if lower.ends_with(".webm") {
    format!(
      "appsrc name=src ! videoconvert ! vp8enc ! webmmux ! filesink location=\"{}\"",
      file_path
    )
  } else {
    format!(
      "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast tune=zerolatency ! h264parse ! mp4mux ! filesink location=\"{}\"",
      file_path
    )
  }
}

/// GStreamer 视频文件输出
///
/// 管理 GStreamer 编码管道；`finish` 发送 EOS 并等待文件写完。
pub struct GStreamerVideoOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  width: u32,
  height: u32,
  fps: i32,
  frame_count: u64,
  finished: bool,
}

impl GStreamerVideoOutput {
  pub fn new(
    path: &Path,
    width: u32,
    height: u32,
    fps: f64,
  ) -> Result<Self, GStreamerVideoOutputError> {
    // 重复初始化是安全的
    gst::init()?;

    let fps = (fps.round() as i32).max(1);
    let file_path = path.to_string_lossy();
    let pipeline_desc = encoder_pipeline(&file_path);
    info!("Creating video output pipeline: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcConversionFailed)?;

    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", width as i32)
      .field("height", height as i32)
      .field("framerate", gst::Fraction::new(fps, 1))
      .build();

    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;

    info!(
      "Video output initialized: {}x{} @ {} fps -> {}",
      width, height, fps, file_path
    );

    Ok(GStreamerVideoOutput {
      pipeline,
      appsrc,
      width,
      height,
      fps,
      frame_count: 0,
      finished: false,
    })
  }

  fn push_frame(&mut self, frame: &Frame) -> Result<(), GStreamerVideoOutputError> {
    let actual = (frame.width(), frame.height());
    if actual != (self.width, self.height) {
      return Err(GStreamerVideoOutputError::FrameSizeMismatch {
        expected: (self.width, self.height),
        actual,
      });
    }

    let mut buffer = gst::Buffer::from_mut_slice(frame.image.as_raw().clone());

    let frame_duration = 1_000_000_000 / self.fps as u64;
    let timestamp = self.frame_count * frame_duration;
    self.frame_count += 1;

    {
      let buffer_ref = buffer.get_mut().ok_or_else(|| {
        GStreamerVideoOutputError::PipelineError("Buffer is not writable".to_string())
      })?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(timestamp));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_duration));
    }

    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;

    Ok(())
  }

  fn close(&mut self) -> Result<(), GStreamerVideoOutputError> {
    if self.finished {
      return Ok(());
    }
    self.finished = true;

    // 发送 EOS 并等待复用器写完文件尾
    let _ = self.appsrc.end_of_stream();
    if let Some(bus) = self.pipeline.bus() {
      let _ = bus.timed_pop_filtered(
        gst::ClockTime::from_seconds(5),
        &[gst::MessageType::Eos, gst::MessageType::Error],
      );
    }
    self.pipeline.set_state(gst::State::Null)?;

    info!(
      "Video output closed. Total frames written: {}",
      self.frame_count
    );
    Ok(())
  }
}

impl Drop for GStreamerVideoOutput {
  fn drop(&mut self) {
    if let Err(e) = self.close() {
      warn!("Failed to stop GStreamer video output pipeline: {}", e);
    }
  }
}

impl FrameSink for GStreamerVideoOutput {
  fn write_frame(&mut self, frame: &Frame) -> Result<(), OutputError> {
    self.push_frame(frame).map_err(OutputError::from)
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    self.close().map_err(OutputError::from)
  }
}
