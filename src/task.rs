// 该文件是 Jishu （计数） 项目的一部分。
// src/task.rs - 单张图片与连续输入的计数任务
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
  path::PathBuf,
  sync::mpsc::Receiver,
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  count::{CountSnapshot, aggregate, filter_detections},
  input::{FrameSource, ImageFileInput, InputError},
  model::Model,
  output::{OutputError, Sinks, annotated_path, draw::Draw, save_annotated_image},
  snapshot::{SnapshotError, SnapshotWriter, write_snapshot},
};

pub const DEFAULT_CONFIDENCE: f32 = 0.25;

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("输入源不可用: {0}")]
  SourceUnavailable(#[source] InputError),
  #[error("模型推理失败: {0}")]
  Model(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("快照写入失败: {0}")]
  Snapshot(#[from] SnapshotError),
  #[error("输入错误: {0}")]
  Input(#[source] InputError),
  #[error("输出错误: {0}")]
  Output(#[from] OutputError),
}

fn model_error<E: std::error::Error + Send + Sync + 'static>(e: E) -> TaskError {
  error!("模型推理失败: {}", e);
  TaskError::Model(Box::new(e))
}

/// 单张图片的处理结果
#[derive(Debug, Clone)]
pub struct StillReport {
  pub snapshot: CountSnapshot,
  pub snapshot_path: Option<PathBuf>,
  pub annotated_path: Option<PathBuf>,
}

/// 单张图片任务：推理一次、计数、按需保存快照与标注图片
pub struct StillTask {
  threshold: f32,
  snapshot_path: Option<PathBuf>,
  save_annotated: bool,
  draw: Draw,
}

impl StillTask {
  pub fn new(threshold: f32) -> Self {
    StillTask {
      threshold,
      snapshot_path: None,
      save_annotated: false,
      draw: Draw::default(),
    }
  }

  pub fn with_snapshot_path(mut self, path: Option<PathBuf>) -> Self {
    self.snapshot_path = path;
    self
  }

  pub fn with_save_annotated(mut self, save: bool) -> Self {
    self.save_annotated = save;
    self
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn run<M>(self, input: &ImageFileInput, model: &M) -> Result<StillReport, TaskError>
  where
    M: Model,
    M::Error: std::error::Error + Send + Sync + 'static,
  {
    info!("开始单张图片任务: {}", input.path().display());
    let now = Instant::now();
    let result = model.infer(input.image()).map_err(model_error)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());

    let accepted = filter_detections(&result.items, self.threshold);
    let snapshot = aggregate(&accepted, |id| model.label_of(id));
    info!("计数: {}", snapshot);

    // 单张图片只有一次机会，不做节流
    if let Some(path) = &self.snapshot_path {
      write_snapshot(&snapshot, path)?;
      info!("保存计数快照: {}", path.display());
    }

    let annotated = if self.save_annotated {
      let mut image = input.image().clone();
      self
        .draw
        .render(&mut image, &accepted, &snapshot, |id| model.label_of(id));
      let path = annotated_path(input.path());
      save_annotated_image(&image, &path)?;
      Some(path)
    } else {
      None
    };

    Ok(StillReport {
      snapshot,
      snapshot_path: self.snapshot_path,
      annotated_path: annotated,
    })
  }
}

/// 连续任务的结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
  EndOfStream,
  Interrupted,
  FrameLimit,
}

/// 连续任务的处理结果
#[derive(Debug, Clone)]
pub struct StreamReport {
  pub frames: u64,
  pub stop_reason: StopReason,
  pub last_snapshot: Option<CountSnapshot>,
  /// 运行期间按节流规则完成的写入次数，不含最终写入
  pub snapshot_writes: u64,
  /// 结束时最终写入的快照路径
  pub final_snapshot: Option<PathBuf>,
}

#[derive(Default)]
struct RunState {
  frames: u64,
  last_snapshot: Option<CountSnapshot>,
  snapshot_writes: u64,
}

/// 连续输入任务
///
/// 打开输入源 -> 逐帧处理 -> 结束或中断 -> 关闭。
/// 节流计时器与最近一次计数保存在任务实例中，互不影响的多次运行可以共存。
pub struct StreamTask {
  threshold: f32,
  snapshot: Option<SnapshotWriter>,
  draw: Draw,
  frame_number: Option<u64>,
  interrupt: Option<Receiver<()>>,
}

impl StreamTask {
  pub fn new(threshold: f32) -> Self {
    StreamTask {
      threshold,
      snapshot: None,
      draw: Draw::default(),
      frame_number: None,
      interrupt: None,
    }
  }

  pub fn with_snapshot(mut self, path: Option<PathBuf>, interval: Duration) -> Self {
    self.snapshot = path.map(|path| SnapshotWriter::new(path).with_interval(interval));
    self
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn with_frame_number(mut self, frame_number: Option<u64>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 外部中断信号（例如 Ctrl-C），每处理完一帧检查一次
  pub fn with_interrupt(mut self, interrupt: Receiver<()>) -> Self {
    self.interrupt = Some(interrupt);
    self
  }

  /// 运行任务
  ///
  /// 输入源打开失败时立即返回 `SourceUnavailable`，此时尚未创建任何输出。
  /// 其余错误会先完成关闭流程再返回。
  pub fn run<S, M, O, K>(
    mut self,
    open_source: O,
    model: &M,
    open_sinks: K,
  ) -> Result<StreamReport, TaskError>
  where
    S: FrameSource,
    M: Model,
    M::Error: std::error::Error + Send + Sync + 'static,
    O: FnOnce() -> Result<S, InputError>,
    K: FnOnce(&S) -> Result<Sinks, OutputError>,
  {
    info!("开始任务...");
    let mut source = open_source().map_err(|e| {
      error!("无法打开输入源: {}", e);
      TaskError::SourceUnavailable(e)
    })?;
    info!(
      "输入源已打开: {}x{} @ {:?} fps",
      source.width(),
      source.height(),
      source.fps()
    );

    let mut sinks = match open_sinks(&source) {
      Ok(sinks) => sinks,
      Err(e) => {
        error!("无法创建输出: {}", e);
        source.close();
        return Err(e.into());
      }
    };

    let mut state = RunState::default();
    let outcome = self.run_loop(&mut source, model, &mut sinks, &mut state);

    // 关闭：输入源 -> 文件输出 -> 显示 -> 最终快照
    source.close();
    let finish = match sinks.file.as_mut() {
      Some(file) => file.finish(),
      None => Ok(()),
    };
    if let Some(display) = sinks.display.as_mut() {
      display.close();
    }
    let final_snapshot = self.write_final_snapshot(&state);

    let stop_reason = match outcome {
      Ok(reason) => reason,
      Err(e) => {
        if let Err(finish_error) = finish {
          warn!("关闭文件输出失败: {}", finish_error);
        }
        return Err(e);
      }
    };
    finish?;

    info!("任务完成，共处理 {} 帧 ({:?})", state.frames, stop_reason);
    Ok(StreamReport {
      frames: state.frames,
      stop_reason,
      last_snapshot: state.last_snapshot,
      snapshot_writes: state.snapshot_writes,
      final_snapshot,
    })
  }

  fn run_loop<S, M>(
    &mut self,
    source: &mut S,
    model: &M,
    sinks: &mut Sinks,
    state: &mut RunState,
  ) -> Result<StopReason, TaskError>
  where
    S: FrameSource,
    M: Model,
    M::Error: std::error::Error + Send + Sync + 'static,
  {
    let mut now = Instant::now();
    loop {
      if self.frame_number.is_some_and(|limit| state.frames >= limit) {
        info!("达到指定帧数 {}, 退出任务循环", state.frames);
        return Ok(StopReason::FrameLimit);
      }

      let mut frame = match source.next() {
        None => {
          info!("输入结束");
          return Ok(StopReason::EndOfStream);
        }
        Some(Ok(frame)) => frame,
        Some(Err(e)) => {
          error!("读取帧失败: {}", e);
          return Err(TaskError::Input(e));
        }
      };

      let result = model.infer(&frame.image).map_err(model_error)?;
      let elapsed_a = now.elapsed();
      let accepted = filter_detections(&result.items, self.threshold);
      let snapshot = aggregate(&accepted, |id| model.label_of(id));
      self
        .draw
        .render(&mut frame.image, &accepted, &snapshot, |id| model.label_of(id));
      let elapsed_b = now.elapsed();
      now = Instant::now();
      debug!(
        "第 {} 帧: {} ({:.2?} / {:.2?})",
        frame.index, snapshot, elapsed_a, elapsed_b
      );

      // 输出只会看到绘制完成的帧
      if let Some(file) = sinks.file.as_mut() {
        file.write_frame(&frame)?;
      }
      if let Some(display) = sinks.display.as_mut() {
        display.show(&frame)?;
      }
      state.frames += 1;

      let stop = self.poll_stop(sinks);
      if !stop && let Some(writer) = self.snapshot.as_mut() {
        match writer.write_debounced(&snapshot, Instant::now()) {
          Ok(true) => state.snapshot_writes += 1,
          Ok(false) => {}
          Err(e) => warn!("{}，等待下一个写入窗口", e),
        }
      }
      state.last_snapshot = Some(snapshot);

      if stop {
        warn!("收到停止信号，退出任务循环");
        return Ok(StopReason::Interrupted);
      }
    }
  }

  fn poll_stop(&self, sinks: &mut Sinks) -> bool {
    let display_stop = sinks
      .display
      .as_mut()
      .is_some_and(|display| display.poll_stop_signal());
    let interrupted = self
      .interrupt
      .as_ref()
      .is_some_and(|rx| rx.try_recv().is_ok());
    display_stop || interrupted
  }

  fn write_final_snapshot(&mut self, state: &RunState) -> Option<PathBuf> {
    let (writer, snapshot) = match (self.snapshot.as_mut(), state.last_snapshot.as_ref()) {
      (Some(writer), Some(snapshot)) => (writer, snapshot),
      _ => return None,
    };
    match writer.write_now(snapshot) {
      Ok(()) => {
        info!("最终计数: {}", snapshot);
        Some(writer.path().to_path_buf())
      }
      Err(e) => {
        error!("最终快照写入失败: {}", e);
        None
      }
    }
  }
}
