// 该文件是 Jishu （计数） 项目的一部分。
// src/output/gstreamer_display.rs - GStreamer 实时显示窗口
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

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use tracing::{info, warn};

use crate::{
  frame::Frame,
  output::{DisplaySink, GStreamerVideoOutputError, OutputError},
};

pub const DISPLAY_WINDOW_TITLE: &str = "Object Counter";

/// 通过 `autovideosink` 显示标注后的帧
///
/// 窗口被关闭时管道总线上会出现错误或 EOS 消息，视为停止信号；
/// 在窗口中按下 Escape 同样会停止。
pub struct GStreamerDisplay {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  closed: bool,
}

impl GStreamerDisplay {
  pub fn new(width: u32, height: u32) -> Result<Self, GStreamerVideoOutputError> {
    gst::init()?;

    // 窗口标题通过 title 标签传给视频 sink
    let pipeline_desc = format!(
      concat!(
        "appsrc name=src is-live=true format=time ! videoconvert ! ",
        "taginject tags=\"title=\\\"{}\\\"\" ! autovideosink sync=false"
      ),
      DISPLAY_WINDOW_TITLE
    );
    info!("Creating display pipeline: {}", pipeline_desc);

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
      .field("framerate", gst::Fraction::new(0, 1))
      .build();
    appsrc.set_caps(Some(&caps));

    pipeline.set_state(gst::State::Playing)?;
    info!("显示窗口已打开: {}", DISPLAY_WINDOW_TITLE);

    Ok(GStreamerDisplay {
      pipeline,
      appsrc,
      closed: false,
    })
  }
}

impl DisplaySink for GStreamerDisplay {
  fn show(&mut self, frame: &Frame) -> Result<(), OutputError> {
    let buffer = gst::Buffer::from_mut_slice(frame.image.as_raw().clone());
    self.appsrc.push_buffer(buffer).map_err(|e| {
      OutputError::from(GStreamerVideoOutputError::PipelineError(format!(
        "Failed to push buffer: {:?}",
        e
      )))
    })?;
    Ok(())
  }

  fn poll_stop_signal(&mut self) -> bool {
    let Some(bus) = self.pipeline.bus() else {
      return false;
    };
    while let Some(message) = bus.pop() {
      match message.view() {
        gst::MessageView::Eos(..) => return true,
        gst::MessageView::Error(err) => {
          warn!("显示窗口已关闭: {}", err.error());
          return true;
        }
        gst::MessageView::Element(element) => {
          if element.structure().is_some_and(is_escape_message) {
            info!("显示窗口中按下 Escape");
            return true;
          }
        }
        _ => {}
      }
    }
    false
  }

  fn close(&mut self) {
    if self.closed {
      return;
    }
    self.closed = true;
    let _ = self.appsrc.end_of_stream();
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer display pipeline: {}", e);
    }
  }
}

/// 视频 sink 转发的导航消息中是否带有 Escape 按键
fn is_escape_message(message: &gst::StructureRef) -> bool {
  if !message.has_name("GstNavigationMessage") {
    return false;
  }
  message
    .get::<gst::Event>("event")
    .ok()
    .and_then(|event| event.structure().map(is_escape_press))
    .unwrap_or(false)
}

fn is_escape_press(event: &gst::StructureRef) -> bool {
  event.get::<&str>("event").is_ok_and(|kind| kind == "key-press")
    && event.get::<&str>("key").is_ok_and(|key| key == "Escape")
}

impl Drop for GStreamerDisplay {
  fn drop(&mut self) {
    self.close();
  }
}
