// 该文件是 Jishu （计数） 项目的一部分。
// src/output/draw.rs - 检测框与计数面板绘制
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use tracing::{debug, warn};

use crate::{count::CountSnapshot, model::DetectItem, output::OutputError};

/// 内置字体（DejaVu Sans），`--font` 可以替换
static EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/font.ttf");

// 检测框标签
const LABEL_FONT_SIZE: f32 = 15.0;
const LABEL_BOX_HEIGHT: i32 = 18;
const LABEL_TEXT_PADDING: i32 = 3;
const LABEL_CHAR_WIDTH: f32 = 8.0; // 没有字体时每字符宽度的粗略估计

// 计数面板
const SUMMARY_ORIGIN: (i32, i32) = (10, 10);
const SUMMARY_RIGHT: i32 = 260;
const SUMMARY_ROW_HEIGHT: i32 = 18;
/// 面板背景最多容纳的行数，文字本身不受此限制
pub const SUMMARY_MAX_ROWS: usize = 10;
const SUMMARY_TEXT_X: i32 = 16;
const SUMMARY_FIRST_BASELINE: i32 = 24;
const SUMMARY_TITLE_PITCH: i32 = 20;
const SUMMARY_ROW_PITCH: i32 = 18;
const SUMMARY_TITLE_FONT_SIZE: f32 = 19.0;
const SUMMARY_FONT_SIZE: f32 = 16.0;
const TEXT_ASCENT: i32 = 13;

const BOX_THICKNESS: i32 = 2;
// 画面外保留的坐标余量，超出部分不会出现在画面上
const CLIP_MARGIN: i64 = 64;
const BOX_COLOR: [u8; 3] = [255, 255, 255]; // 白色
const TEXT_COLOR: [u8; 3] = [0, 0, 0]; // 黑色

/// 叠加绘制器
///
/// 原地修改帧：检测框、标签以及左上角的计数面板。
pub struct Draw {
  font: Option<FontArc>,
  label_scale: PxScale,
  title_scale: PxScale,
  row_scale: PxScale,
  box_color: Rgb<u8>,
  text_color: Rgb<u8>,
}

impl Default for Draw {
  fn default() -> Self {
    Self::embedded().unwrap_or_else(|e| {
      warn!("内置字体不可用，仅绘制检测框与面板背景: {}", e);
      Self::new()
    })
  }
}

/// 由左上与右下角点（含端点）构造矩形，角点颠倒时返回 None
fn rect_from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Option<Rect> {
  let width = u32::try_from(i64::from(x2) - i64::from(x1) + 1).ok()?;
  let height = u32::try_from(i64::from(y2) - i64::from(y1) + 1).ok()?;
  if width == 0 || height == 0 {
    return None;
  }
  Some(Rect::at(x1, y1).of_size(width, height))
}

/// 截断为整数像素坐标，并限制在画面附近
fn to_pixel(value: f32, extent: u32) -> i32 {
  (value as i64).clamp(-CLIP_MARGIN, i64::from(extent) + CLIP_MARGIN) as i32
}

impl Draw {
  /// 不带字体的绘制器，文字将被跳过
  pub fn new() -> Self {
    Draw {
      font: None,
      label_scale: PxScale::from(LABEL_FONT_SIZE),
      title_scale: PxScale::from(SUMMARY_TITLE_FONT_SIZE),
      row_scale: PxScale::from(SUMMARY_FONT_SIZE),
      box_color: Rgb(BOX_COLOR),
      text_color: Rgb(TEXT_COLOR),
    }
  }

  /// 使用内置字体的绘制器
  pub fn embedded() -> Result<Self, OutputError> {
    let font = FontArc::try_from_slice(EMBEDDED_FONT)
      .map_err(|e| OutputError::FontError(format!("内置字体: {}", e)))?;
    Ok(Draw {
      font: Some(font),
      ..Self::new()
    })
  }

  pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self, OutputError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data)
      .map_err(|e| OutputError::FontError(format!("{}: {}", path.display(), e)))?;
    debug!("加载字体: {}", path.display());
    Ok(Draw {
      font: Some(font),
      ..Self::new()
    })
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  fn text_width(&self, scale: PxScale, text: &str) -> i32 {
    match &self.font {
      Some(font) => i32::try_from(text_size(scale, font, text).0).unwrap_or(i32::MAX),
      None => (text.chars().count() as f32 * LABEL_CHAR_WIDTH) as i32,
    }
  }

  fn draw_text(&self, image: &mut RgbImage, x: i32, y: i32, scale: PxScale, text: &str) {
    if let Some(font) = &self.font {
      draw_text_mut(image, self.text_color, x, y, scale, font, text);
    }
  }

  /// 标签文本，置信度取整为百分比
  pub fn label_text(label: &str, score: f32) -> String {
    format!("{} {:.0}%", label, score * 100.0)
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, item: &DetectItem, label: &str) {
    let [x1, y1, x2, y2] = item.bbox;
    let (x1, x2) = (to_pixel(x1, image.width()), to_pixel(x2, image.width()));
    let (y1, y2) = (to_pixel(y1, image.height()), to_pixel(y2, image.height()));

    for inset in 0..BOX_THICKNESS {
      if let Some(rect) = rect_from_corners(x1 + inset, y1 + inset, x2 - inset, y2 - inset) {
        draw_hollow_rect_mut(image, rect, self.box_color);
      }
    }

    let text = Self::label_text(label, item.score);
    let text_width = self.text_width(self.label_scale, &text);
    if let Some(background) = rect_from_corners(
      x1,
      y1 - LABEL_BOX_HEIGHT,
      x1.saturating_add(text_width).saturating_add(2 * LABEL_TEXT_PADDING),
      y1,
    ) {
      draw_filled_rect_mut(image, background, self.box_color);
    }
    self.draw_text(
      image,
      x1 + LABEL_TEXT_PADDING,
      y1 - LABEL_BOX_HEIGHT + 1,
      self.label_scale,
      &text,
    );
  }

  /// 绘制每个检测框及其标签
  pub fn draw_detections<F>(&self, image: &mut RgbImage, items: &[DetectItem], label_of: F)
  where
    F: Fn(u32) -> String,
  {
    for item in items {
      self.draw_bbox_with_label(image, item, &label_of(item.class_id));
    }
  }

  /// 计数面板背景的下边界
  pub fn summary_panel_bottom(categories: usize) -> i32 {
    // 面板按“类别 + 总数”计行，再多留一行
    let rows = (categories + 1).min(SUMMARY_MAX_ROWS) as i32 + 1;
    SUMMARY_ORIGIN.1 + SUMMARY_ROW_HEIGHT * rows
  }

  /// 绘制左上角的计数面板
  pub fn draw_summary(&self, image: &mut RgbImage, snapshot: &CountSnapshot) {
    let (left, top) = SUMMARY_ORIGIN;
    let bottom = Self::summary_panel_bottom(snapshot.per_category.len());
    if let Some(panel) = rect_from_corners(left, top, SUMMARY_RIGHT, bottom) {
      draw_filled_rect_mut(image, panel, self.box_color);
    }

    let mut baseline = SUMMARY_FIRST_BASELINE;
    self.draw_text(
      image,
      SUMMARY_TEXT_X,
      baseline - TEXT_ASCENT,
      self.title_scale,
      &format!("Total: {}", snapshot.total),
    );
    baseline += SUMMARY_TITLE_PITCH;

    for (label, count) in snapshot.iter() {
      self.draw_text(
        image,
        SUMMARY_TEXT_X,
        baseline - TEXT_ASCENT,
        self.row_scale,
        &format!("{}: {}", label, count),
      );
      baseline += SUMMARY_ROW_PITCH;
    }
  }

  /// 在帧上原地叠加检测框与计数面板，返回同一缓冲区
  pub fn render<'a, F>(
    &self,
    image: &'a mut RgbImage,
    items: &[DetectItem],
    snapshot: &CountSnapshot,
    label_of: F,
  ) -> &'a mut RgbImage
  where
    F: Fn(u32) -> String,
  {
    self.draw_detections(image, items, label_of);
    self.draw_summary(image, snapshot);
    image
  }
}
