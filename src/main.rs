// 该文件是 Jishu （计数） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::{thread, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use jishu::{
  FromUrl,
  input::{FrameSource, ImageFileInput, SourceSpec, open_source},
  model::ReplayModel,
  output::{Sinks, create_file_sink, draw::Draw},
  task::{StillTask, StreamTask},
};

fn load_draw(args: &args::Args) -> Result<Draw> {
  match &args.font {
    Some(path) => Draw::with_font_file(path).context("无法加载字体"),
    None => Ok(Draw::default()),
  }
}

fn run_still(args: &args::Args, source: &SourceSpec, model: &ReplayModel) -> Result<()> {
  let SourceSpec::Path(path) = source else {
    anyhow::bail!("摄像头不是静态图片: {}", source);
  };
  let input = ImageFileInput::open(path)?;
  let report = StillTask::new(args.conf)
    .with_snapshot_path(args.csv.clone())
    .with_save_annotated(args.save)
    .with_draw(load_draw(args)?)
    .run(&input, model)?;

  info!("计数: {}", report.snapshot);
  if let Some(path) = report.snapshot_path {
    info!("已保存 CSV: {}", path.display());
  }
  if let Some(path) = report.annotated_path {
    info!("已保存图片: {}", path.display());
  }
  Ok(())
}

fn run_stream(args: &args::Args, source: &SourceSpec, model: &ReplayModel) -> Result<()> {
  let (tx, rx) = std::sync::mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法设置 Ctrl-C 处理函数")?;

  let interval = Duration::try_from_secs_f64(args.snapshot_interval)
    .context("快照间隔必须是非负数")?;
  let output_path = args.output_path();

  let report = StreamTask::new(args.conf)
    .with_snapshot(args.csv.clone(), interval)
    .with_draw(load_draw(args)?)
    .with_frame_number(args.frame_number)
    .with_interrupt(rx)
    .run(
      || open_source(source),
      model,
      |input| {
        let mut sinks = Sinks::none();
        if args.save {
          info!("保存到 {}", output_path.display());
          sinks.file = Some(create_file_sink(
            &output_path,
            input.width(),
            input.height(),
            input.fps(),
          )?);
        }
        if !args.headless {
          #[cfg(feature = "gstreamer_output")]
          {
            let display = jishu::output::GStreamerDisplay::new(input.width(), input.height())?;
            sinks = sinks.with_display(display);
          }
          #[cfg(not(feature = "gstreamer_output"))]
          {
            warn!("未启用 gstreamer_output 特性，不打开显示窗口");
          }
        }
        Ok(sinks)
      },
    )?;

  if let Some(snapshot) = report.last_snapshot {
    info!("最终计数: {}", snapshot);
  }
  if let Some(path) = report.final_snapshot {
    info!("已保存 CSV: {}", path.display());
  }
  Ok(())
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.source);
  info!("置信度阈值: {}", args.conf);

  let model = ReplayModel::from_url(&args.model)?;
  let source = SourceSpec::parse(&args.source);

  if source.is_still() {
    run_still(&args, &source, &model)
  } else {
    run_stream(&args, &source, &model)
  }
}
