// 该文件是 Tanjing （探镜） 项目的一部分。
// src/input/image_bytes.rs - 内存图像解码
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

use std::io::Cursor;

use image::ImageReader;
use tracing::{debug, error};

use super::DecodeError;
use crate::frame::RgbNhwcFrame;

/// 将上传的图像字节解码为 RGB 帧，格式由内容判断
pub fn decode_image(bytes: &[u8]) -> Result<RgbNhwcFrame, DecodeError> {
  if bytes.is_empty() {
    return Err(DecodeError::Unsupported("空文件".to_string()));
  }

  let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
  let format = reader.format();
  let image = reader.decode().map_err(|e| {
    error!("图像解码失败: {}", e);
    e
  })?;

  debug!(
    "图像解码完成: {:?}, {}x{}",
    format,
    image.width(),
    image.height()
  );
  Ok(RgbNhwcFrame::from(image.to_rgb8()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{ImageFormat, Rgb, RgbImage};

  fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, format).unwrap();
    bytes.into_inner()
  }

  #[test]
  fn decodes_png_and_jpeg() {
    let image = RgbImage::from_pixel(10, 10, Rgb([0, 0, 0]));
    for format in [ImageFormat::Png, ImageFormat::Jpeg] {
      let frame = decode_image(&encode(&image, format)).unwrap();
      assert_eq!((frame.width(), frame.height()), (10, 10));
    }
  }

  #[test]
  fn truncated_bytes_fail() {
    let image = RgbImage::from_pixel(32, 32, Rgb([200, 10, 10]));
    let bytes = encode(&image, ImageFormat::Png);
    assert!(decode_image(&bytes[..bytes.len() / 2]).is_err());
  }

  #[test]
  fn text_is_not_an_image() {
    assert!(decode_image(b"hello, world").is_err());
    assert!(decode_image(&[]).is_err());
  }
}
