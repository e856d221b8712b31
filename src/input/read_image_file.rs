// 该文件是 Jishu （计数） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use tracing::{debug, error};

use crate::input::InputError;

const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "bmp", "webp", "tif", "tiff"];

pub fn is_image_path(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      IMAGE_EXTENSIONS
        .iter()
        .any(|known| ext.eq_ignore_ascii_case(known))
    })
    .unwrap_or(false)
}

/// 单张静态图片
pub struct ImageFileInput {
  path: PathBuf,
  image: RgbImage,
}

impl ImageFileInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, InputError> {
    let path = path.as_ref();
    let image = ImageReader::open(path)
      .map_err(|e| {
        error!("无法打开图片 {}: {}", path.display(), e);
        InputError::unavailable(path.display(), e)
      })?
      .with_guessed_format()
      .map_err(|e| InputError::unavailable(path.display(), e))?
      .decode()
      .map_err(|e| {
        error!("无法解码图片 {}: {}", path.display(), e);
        InputError::unavailable(path.display(), e)
      })?;
    debug!(
      "读取图片 {}: {}x{}",
      path.display(),
      image.width(),
      image.height()
    );

    Ok(ImageFileInput {
      path: path.to_path_buf(),
      image: image.into_rgb8(),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn into_image(self) -> RgbImage {
    self.image
  }
}
