// 该文件是 Jishu （计数） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

/// Jishu 目标计数
#[derive(Parser, Debug)]
#[command(author, version, about = "Object counting over images, videos and cameras", long_about = None)]
pub struct Args {
  /// 输入来源
  /// - 图片: *.jpg, *.jpeg, *.png, *.bmp, *.webp, *.tif, *.tiff
  /// - 图片目录: 按文件名顺序作为连续帧
  /// - 视频文件: *.mp4, *.mkv 等（需要 gstreamer_input 特性）
  /// - 摄像头序号: 0, 1, ...（需要 gstreamer_input 特性）
  #[arg(long, value_name = "SOURCE")]
  pub source: String,

  /// 检测模型，例如 replay:///path/to/detections.json
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 置信度阈值
  #[arg(long, default_value_t = jishu::task::DEFAULT_CONFIDENCE, value_name = "THRESHOLD")]
  pub conf: f32,

  /// 保存标注后的图片或视频
  #[arg(long)]
  pub save: bool,

  /// 计数快照 CSV 路径
  #[arg(long, value_name = "PATH")]
  pub csv: Option<PathBuf>,

  /// 连续输入时标注结果的保存位置
  /// - 视频文件: *.mp4, *.mkv, *.avi, *.webm（默认 annotated.mp4）
  /// - 其他路径: 逐帧 PNG 目录（未启用 gstreamer_output 时默认 annotated/）
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<PathBuf>,

  /// 连续输入时两次快照写入的最小间隔（秒）
  #[arg(long, default_value_t = 2.0, value_name = "SECONDS")]
  pub snapshot_interval: f64,

  /// 最大处理帧数
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<u64>,

  /// 标注文字使用的 TrueType 字体
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 不打开显示窗口
  #[arg(long)]
  pub headless: bool,
}

impl Args {
  pub fn output_path(&self) -> PathBuf {
    self.output.clone().unwrap_or_else(|| {
      if cfg!(feature = "gstreamer_output") {
        PathBuf::from("annotated.mp4")
      } else {
        PathBuf::from("annotated")
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(extra: &[&str]) -> Args {
    let mut argv = vec!["jishu", "--source", "0", "--model", "replay:///tmp/dets.json"];
    argv.extend_from_slice(extra);
    Args::try_parse_from(argv).unwrap()
  }

  #[test]
  fn defaults_follow_the_counting_tool() {
    let args = parse(&[]);
    assert_eq!(args.conf, jishu::task::DEFAULT_CONFIDENCE);
    assert_eq!(args.snapshot_interval, 2.0);
    assert!(!args.save);
    assert!(args.csv.is_none());
  }

  #[cfg(feature = "gstreamer_output")]
  #[test]
  fn default_output_is_an_encoded_video() {
    assert_eq!(parse(&[]).output_path(), PathBuf::from("annotated.mp4"));
  }

  #[cfg(not(feature = "gstreamer_output"))]
  #[test]
  fn default_output_is_a_frame_directory() {
    assert_eq!(parse(&[]).output_path(), PathBuf::from("annotated"));
  }

  #[test]
  fn explicit_output_wins() {
    let args = parse(&["--output", "runs/out.mkv"]);
    assert_eq!(args.output_path(), PathBuf::from("runs/out.mkv"));
  }
}
