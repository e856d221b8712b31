// 该文件是 Jishu （计数） 项目的一部分。
// tests/pipeline.rs - 计数流程端到端测试
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
  cell::{Cell, RefCell},
  collections::VecDeque,
  path::Path,
  rc::Rc,
  time::Duration,
};

use image::{Rgb, RgbImage};
use thiserror::Error;

use jishu::{
  count::CountSnapshot,
  frame::Frame,
  input::{FrameSource, ImageFileInput, InputError, SourceSpec, open_source},
  model::{DetectItem, DetectResult, Model, ReplayModel},
  output::{DisplaySink, FrameSink, OutputError, Sinks, draw::Draw},
  snapshot::{read_snapshot, to_csv},
  task::{StillTask, StopReason, StreamTask, TaskError},
};

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const NEVER: Duration = Duration::from_secs(3600);

fn det(class_id: u32, score: f32, bbox: [f32; 4]) -> DetectItem {
  DetectItem {
    class_id,
    score,
    bbox,
  }
}

/// cat 0.9, dog 0.2, cat 0.5
fn cat_dog_cat() -> Vec<DetectItem> {
  vec![
    det(0, 0.9, [100.0, 100.0, 150.0, 150.0]),
    det(1, 0.2, [200.0, 200.0, 240.0, 240.0]),
    det(0, 0.5, [120.0, 220.0, 180.0, 280.0]),
  ]
}

fn labels() -> Vec<String> {
  vec!["cat".to_string(), "dog".to_string()]
}

struct FakeSource {
  frames: VecDeque<Result<Frame, InputError>>,
  closed: Rc<Cell<bool>>,
}

impl FakeSource {
  fn blank(count: u64, closed: Rc<Cell<bool>>) -> Self {
    let frames = (0..count)
      .map(|index| Ok(Frame::new(RgbImage::new(300, 300), index, index * 33)))
      .collect();
    FakeSource { frames, closed }
  }
}

impl Iterator for FakeSource {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.frames.pop_front()
  }
}

impl FrameSource for FakeSource {
  fn width(&self) -> u32 {
    300
  }

  fn height(&self) -> u32 {
    300
  }

  fn fps(&self) -> Option<f64> {
    Some(30.0)
  }

  fn close(&mut self) {
    self.closed.set(true);
  }
}

#[derive(Default)]
struct SinkLog {
  frames: Vec<RgbImage>,
  finished: u32,
}

struct RecordingSink(Rc<RefCell<SinkLog>>);

impl FrameSink for RecordingSink {
  fn write_frame(&mut self, frame: &Frame) -> Result<(), OutputError> {
    self.0.borrow_mut().frames.push(frame.image.clone());
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    self.0.borrow_mut().finished += 1;
    Ok(())
  }
}

/// 显示若干帧后发出停止信号
struct StopAfter {
  shown: u32,
  stop_after: u32,
  closed: Rc<Cell<bool>>,
}

impl DisplaySink for StopAfter {
  fn show(&mut self, _frame: &Frame) -> Result<(), OutputError> {
    self.shown += 1;
    Ok(())
  }

  fn poll_stop_signal(&mut self) -> bool {
    self.shown >= self.stop_after
  }

  fn close(&mut self) {
    self.closed.set(true);
  }
}

#[derive(Error, Debug)]
#[error("model exploded")]
struct Exploded;

/// 第 `fail_at` 次调用失败的模型
struct FlakyModel {
  inner: ReplayModel,
  calls: Cell<u32>,
  fail_at: u32,
}

impl Model for FlakyModel {
  type Error = Exploded;

  fn infer(&self, image: &RgbImage) -> Result<DetectResult, Self::Error> {
    let call = self.calls.get() + 1;
    self.calls.set(call);
    if call == self.fail_at {
      return Err(Exploded);
    }
    Ok(self.inner.infer(image).unwrap_or_default())
  }

  fn label_of(&self, class_id: u32) -> String {
    self.inner.label_of(class_id)
  }
}

fn stream_task() -> StreamTask {
  StreamTask::new(0.25).with_draw(Draw::new())
}

#[test]
fn still_image_counts_and_persists() {
  let dir = tempfile::tempdir().unwrap();
  let image_path = dir.path().join("street.png");
  RgbImage::new(320, 320).save(&image_path).unwrap();
  let csv = dir.path().join("counts.csv");

  let model = ReplayModel::new(labels(), vec![cat_dog_cat()]);
  let input = ImageFileInput::open(&image_path).unwrap();
  let report = StillTask::new(0.25)
    .with_draw(Draw::new())
    .with_snapshot_path(Some(csv.clone()))
    .with_save_annotated(true)
    .run(&input, &model)
    .unwrap();

  assert_eq!(report.snapshot.total, 2);
  assert_eq!(report.snapshot.get("cat"), 2);
  assert_eq!(report.snapshot.get("dog"), 0);
  assert_eq!(
    std::fs::read_to_string(&csv).unwrap(),
    "class,count\r\ntotal,2\r\ncat,2\r\n"
  );

  let annotated = report.annotated_path.unwrap();
  assert_eq!(annotated, dir.path().join("street_annotated.png"));
  let annotated = image::open(&annotated).unwrap().into_rgb8();
  // 0.9 的 cat 被画出，0.2 的 dog 没有
  assert_eq!(*annotated.get_pixel(100, 125), WHITE);
  assert_eq!(*annotated.get_pixel(200, 220), BLACK);
  // 原图保持不变
  assert_eq!(*input.image().get_pixel(100, 125), BLACK);
}

#[test]
fn still_snapshot_failure_is_fatal() {
  let dir = tempfile::tempdir().unwrap();
  let image_path = dir.path().join("still.png");
  RgbImage::new(16, 16).save(&image_path).unwrap();

  let model = ReplayModel::new(labels(), vec![cat_dog_cat()]);
  let input = ImageFileInput::open(&image_path).unwrap();
  let result = StillTask::new(0.25)
    .with_draw(Draw::new())
    .with_snapshot_path(Some(dir.path().join("missing").join("counts.csv")))
    .run(&input, &model);

  assert!(matches!(result, Err(TaskError::Snapshot(_))));
}

#[test]
fn still_model_failure_is_fatal() {
  let dir = tempfile::tempdir().unwrap();
  let image_path = dir.path().join("still.png");
  RgbImage::new(16, 16).save(&image_path).unwrap();

  let model = FlakyModel {
    inner: ReplayModel::new(labels(), vec![]),
    calls: Cell::new(0),
    fail_at: 1,
  };
  let input = ImageFileInput::open(&image_path).unwrap();
  let result = StillTask::new(0.25).with_draw(Draw::new()).run(&input, &model);
  assert!(matches!(result, Err(TaskError::Model(_))));
}

#[test]
fn empty_frame_shows_total_only() {
  let closed = Rc::new(Cell::new(false));
  let log = Rc::new(RefCell::new(SinkLog::default()));
  let model = ReplayModel::new(labels(), vec![vec![]]);

  let sink_log = log.clone();
  let report = stream_task()
    .run(
      || Ok(FakeSource::blank(1, closed.clone())),
      &model,
      move |_| Ok(Sinks::none().with_file(RecordingSink(sink_log))),
    )
    .unwrap();

  assert_eq!(report.last_snapshot, Some(CountSnapshot::default()));
  let log = log.borrow();
  assert_eq!(log.frames.len(), 1);
  let frame = &log.frames[0];
  assert_eq!(*frame.get_pixel(10, 10), WHITE);
  assert_eq!(*frame.get_pixel(260, 46), WHITE);
  assert_eq!(*frame.get_pixel(260, 47), BLACK);
}

#[test]
fn source_failure_aborts_before_sinks() {
  let sinks_opened = Cell::new(false);
  let model = ReplayModel::new(labels(), vec![]);

  let result = stream_task().run(
    || -> Result<FakeSource, InputError> {
      Err(InputError::unavailable("camera #9", "no such device"))
    },
    &model,
    |_| {
      sinks_opened.set(true);
      Ok(Sinks::none())
    },
  );

  assert!(matches!(result, Err(TaskError::SourceUnavailable(_))));
  assert!(!sinks_opened.get());
}

#[test]
fn missing_video_file_is_source_unavailable() {
  let model = ReplayModel::new(labels(), vec![]);
  let spec = SourceSpec::parse("/no/such/dir/clip.mp4");
  let result = stream_task().run(|| open_source(&spec), &model, |_| Ok(Sinks::none()));
  assert!(matches!(result, Err(TaskError::SourceUnavailable(_))));
}

#[test]
fn end_of_stream_writes_final_snapshot_once() {
  let dir = tempfile::tempdir().unwrap();
  let csv = dir.path().join("counts.csv");
  let closed = Rc::new(Cell::new(false));
  let log = Rc::new(RefCell::new(SinkLog::default()));

  let frames = vec![
    cat_dog_cat(),
    vec![det(1, 0.8, [0.0, 0.0, 5.0, 5.0])],
    vec![det(1, 0.8, [0.0, 0.0, 5.0, 5.0]), det(0, 0.3, [9.0, 9.0, 20.0, 20.0])],
  ];
  let model = ReplayModel::new(labels(), frames);

  let sink_log = log.clone();
  let report = stream_task()
    .with_snapshot(Some(csv.clone()), NEVER)
    .run(
      || Ok(FakeSource::blank(3, closed.clone())),
      &model,
      move |_| Ok(Sinks::none().with_file(RecordingSink(sink_log))),
    )
    .unwrap();

  assert_eq!(report.frames, 3);
  assert_eq!(report.stop_reason, StopReason::EndOfStream);
  // 第一帧总是允许写入，其余帧落在节流窗口内
  assert_eq!(report.snapshot_writes, 1);
  assert_eq!(report.final_snapshot.as_deref(), Some(csv.as_path()));

  let persisted = read_snapshot(&csv).unwrap();
  assert_eq!(persisted.total, 2);
  assert_eq!(persisted.get("cat"), 1);
  assert_eq!(persisted.get("dog"), 1);
  assert_eq!(Some(persisted), report.last_snapshot);

  assert!(closed.get());
  assert_eq!(log.borrow().finished, 1);
  assert_eq!(log.borrow().frames.len(), 3);
}

#[test]
fn sinks_only_see_annotated_frames() {
  let closed = Rc::new(Cell::new(false));
  let log = Rc::new(RefCell::new(SinkLog::default()));
  let model = ReplayModel::new(labels(), vec![cat_dog_cat()]);

  let sink_log = log.clone();
  stream_task()
    .run(
      || Ok(FakeSource::blank(1, closed.clone())),
      &model,
      move |_| Ok(Sinks::none().with_file(RecordingSink(sink_log))),
    )
    .unwrap();

  let log = log.borrow();
  let frame = &log.frames[0];
  assert_eq!(*frame.get_pixel(100, 125), WHITE);
  assert_eq!(*frame.get_pixel(150, 125), WHITE);
  assert_eq!(*frame.get_pixel(125, 125), BLACK);
  assert_eq!(*frame.get_pixel(200, 220), BLACK);
}

#[test]
fn display_stop_signal_ends_the_run_gracefully() {
  let dir = tempfile::tempdir().unwrap();
  let csv = dir.path().join("counts.csv");
  let closed = Rc::new(Cell::new(false));
  let display_closed = Rc::new(Cell::new(false));
  let log = Rc::new(RefCell::new(SinkLog::default()));
  let model = ReplayModel::new(labels(), vec![cat_dog_cat()]);

  let sink_log = log.clone();
  let display = StopAfter {
    shown: 0,
    stop_after: 2,
    closed: display_closed.clone(),
  };
  let report = stream_task()
    .with_snapshot(Some(csv.clone()), NEVER)
    .run(
      || Ok(FakeSource::blank(10, closed.clone())),
      &model,
      move |_| {
        Ok(
          Sinks::none()
            .with_file(RecordingSink(sink_log))
            .with_display(display),
        )
      },
    )
    .unwrap();

  assert_eq!(report.stop_reason, StopReason::Interrupted);
  assert_eq!(report.frames, 2);
  assert!(closed.get());
  assert!(display_closed.get());
  assert_eq!(log.borrow().finished, 1);
  assert_eq!(read_snapshot(&csv).unwrap().get("cat"), 2);
}

#[test]
fn interrupt_channel_stops_between_frames() {
  let closed = Rc::new(Cell::new(false));
  let model = ReplayModel::new(labels(), vec![vec![]]);
  let (tx, rx) = std::sync::mpsc::channel();
  tx.send(()).unwrap();

  let report = stream_task()
    .with_interrupt(rx)
    .run(
      || Ok(FakeSource::blank(5, closed.clone())),
      &model,
      |_| Ok(Sinks::none()),
    )
    .unwrap();

  assert_eq!(report.stop_reason, StopReason::Interrupted);
  assert_eq!(report.frames, 1);
}

#[test]
fn frame_limit_stops_the_loop() {
  let closed = Rc::new(Cell::new(false));
  let model = ReplayModel::new(labels(), vec![vec![]]);

  let report = stream_task()
    .with_frame_number(Some(2))
    .run(
      || Ok(FakeSource::blank(5, closed.clone())),
      &model,
      |_| Ok(Sinks::none()),
    )
    .unwrap();

  assert_eq!(report.stop_reason, StopReason::FrameLimit);
  assert_eq!(report.frames, 2);
  assert!(closed.get());
}

#[test]
fn snapshot_failures_do_not_stop_the_stream() {
  let dir = tempfile::tempdir().unwrap();
  let closed = Rc::new(Cell::new(false));
  let model = ReplayModel::new(labels(), vec![cat_dog_cat()]);

  let report = stream_task()
    .with_snapshot(
      Some(dir.path().join("missing").join("counts.csv")),
      Duration::ZERO,
    )
    .run(
      || Ok(FakeSource::blank(3, closed.clone())),
      &model,
      |_| Ok(Sinks::none()),
    )
    .unwrap();

  assert_eq!(report.frames, 3);
  assert_eq!(report.snapshot_writes, 0);
  assert_eq!(report.final_snapshot, None);
}

#[test]
fn model_failure_closes_everything_before_returning() {
  let dir = tempfile::tempdir().unwrap();
  let csv = dir.path().join("counts.csv");
  let closed = Rc::new(Cell::new(false));
  let log = Rc::new(RefCell::new(SinkLog::default()));
  let model = FlakyModel {
    inner: ReplayModel::new(labels(), vec![cat_dog_cat()]),
    calls: Cell::new(0),
    fail_at: 3,
  };

  let sink_log = log.clone();
  let result = stream_task().with_snapshot(Some(csv.clone()), NEVER).run(
    || Ok(FakeSource::blank(5, closed.clone())),
    &model,
    move |_| Ok(Sinks::none().with_file(RecordingSink(sink_log))),
  );

  assert!(matches!(result, Err(TaskError::Model(_))));
  assert!(closed.get());
  assert_eq!(log.borrow().finished, 1);
  assert_eq!(log.borrow().frames.len(), 2);
  assert_eq!(read_snapshot(&csv).unwrap().total, 2);
}

#[test]
fn read_errors_propagate_after_cleanup() {
  let closed = Rc::new(Cell::new(false));
  let model = ReplayModel::new(labels(), vec![vec![]]);
  let mut source = FakeSource::blank(1, closed.clone());
  source
    .frames
    .push_back(Err(InputError::ReadError("corrupt frame".to_string())));

  let result = stream_task().run(move || Ok(source), &model, |_| Ok(Sinks::none()));
  assert!(matches!(result, Err(TaskError::Input(_))));
  assert!(closed.get());
}

#[test]
fn each_run_owns_its_debounce_timer() {
  let dir = tempfile::tempdir().unwrap();
  let model = ReplayModel::new(labels(), vec![cat_dog_cat()]);

  for name in ["first.csv", "second.csv"] {
    let csv = dir.path().join(name);
    let closed = Rc::new(Cell::new(false));
    let report = stream_task()
      .with_snapshot(Some(csv.clone()), NEVER)
      .run(
        || Ok(FakeSource::blank(2, closed.clone())),
        &model,
        |_| Ok(Sinks::none()),
      )
      .unwrap();
    assert_eq!(report.snapshot_writes, 1);
    assert!(Path::new(&csv).exists());
  }
}

#[test]
fn persisted_snapshot_matches_serialized_counts() {
  let dir = tempfile::tempdir().unwrap();
  let csv = dir.path().join("counts.csv");
  let closed = Rc::new(Cell::new(false));
  let model = ReplayModel::new(labels(), vec![cat_dog_cat()]);

  let report = stream_task()
    .with_snapshot(Some(csv.clone()), NEVER)
    .run(
      || Ok(FakeSource::blank(1, closed.clone())),
      &model,
      |_| Ok(Sinks::none()),
    )
    .unwrap();

  let snapshot = report.last_snapshot.unwrap();
  assert_eq!(std::fs::read_to_string(&csv).unwrap(), to_csv(&snapshot));
}
