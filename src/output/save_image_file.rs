// 该文件是 Jishu （计数） 项目的一部分。
// src/output/save_image_file.rs - 保存标注后的图像文件
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
  ffi::OsString,
  path::{Path, PathBuf},
};

use image::RgbImage;
use tracing::warn;

use crate::output::OutputError;

pub const ANNOTATED_SUFFIX: &str = "_annotated";

/// 标注图片的保存路径：同目录、同扩展名，文件名主干追加后缀
pub fn annotated_path(path: &Path) -> PathBuf {
  let mut name = OsString::from(path.file_stem().unwrap_or_default());
  name.push(ANNOTATED_SUFFIX);
  if let Some(ext) = path.extension() {
    name.push(".");
    name.push(ext);
  }
  path.with_file_name(name)
}

pub fn save_annotated_image(image: &RgbImage, path: &Path) -> Result<(), OutputError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }

  image.save(path)?;

  warn!("保存图像到文件: {}", path.display());

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn inserts_suffix_before_extension() {
    assert_eq!(
      annotated_path(Path::new("/data/street.jpg")),
      PathBuf::from("/data/street_annotated.jpg")
    );
    assert_eq!(
      annotated_path(Path::new("shots/a.b.PNG")),
      PathBuf::from("shots/a.b_annotated.PNG")
    );
    assert_eq!(
      annotated_path(Path::new("frame")),
      PathBuf::from("frame_annotated")
    );
  }

  #[test]
  fn saves_in_the_source_format() {
    let dir = tempfile::tempdir().unwrap();
    let path = annotated_path(&dir.path().join("still.png"));
    save_annotated_image(&RgbImage::new(4, 3), &path).unwrap();
    let reloaded = image::open(&path).unwrap();
    assert_eq!((reloaded.width(), reloaded.height()), (4, 3));
  }
}
