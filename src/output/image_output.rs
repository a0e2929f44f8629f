// 该文件是 Tanjing （探镜） 项目的一部分。
// src/output/image_output.rs - 标注图像编码与保存
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

use image::codecs::jpeg::JpegEncoder;
use tracing::info;

use super::EncodeError;
use crate::frame::RgbNhwcFrame;

const JPEG_QUALITY: u8 = 90;

/// 将帧编码为 JPEG 字节
pub fn encode_jpeg(frame: &RgbNhwcFrame) -> Result<Vec<u8>, EncodeError> {
  let mut bytes = Vec::new();
  JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY).encode_image(&frame.to_rgb_image())?;
  Ok(bytes)
}

/// 按扩展名确定格式保存到文件，必要时创建父目录
pub fn save_image(frame: &RgbNhwcFrame, path: &Path) -> Result<(), EncodeError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }

  frame.to_rgb_image().save(path)?;
  info!("保存图像到文件: {}", path.display());
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::input::decode_image;

  #[test]
  fn jpeg_decodes_back_with_same_size() {
    let frame = RgbNhwcFrame::with_shape(12, 20);
    let bytes = encode_jpeg(&frame).unwrap();
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

    let decoded = decode_image(&bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (20, 12));
  }

  #[test]
  fn saves_into_nested_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a/b/out.png");
    save_image(&RgbNhwcFrame::with_shape(4, 4), &path).unwrap();
    assert!(path.is_file());
  }
}
