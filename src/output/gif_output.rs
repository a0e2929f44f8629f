// 该文件是 Tanjing （探镜） 项目的一部分。
// src/output/gif_output.rs - GIF 动画输出
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
  fs::File,
  io::{BufReader, BufWriter, Cursor, Read, Seek, SeekFrom},
  path::Path,
};

use image::{
  AnimationDecoder, Delay, DynamicImage, Frame, ImageDecoder, Limits,
  codecs::gif::{GifDecoder, GifEncoder, Repeat},
};
use tracing::{debug, info};

use super::{EncodeError, EncodedVideo, VideoEncoder, check_frame_size};
use crate::frame::RgbNhwcFrame;

const GIF_CONTENT_TYPE: &str = "image/gif";
const GIF_TRAILER: u8 = 0x3B;
// 1 最慢质量最好，30 最快
const GIF_ENCODE_SPEED: i32 = 10;

/// 写入临时目录中匿名文件的 GIF 编码器，文件在关闭后由系统回收
pub struct GifVideoOutput {
  encoder: GifEncoder<BufWriter<File>>,
  file: File,
  width: u32,
  height: u32,
  delay: Delay,
  frame_count: usize,
}

impl GifVideoOutput {
  pub fn new(scratch_dir: &Path, width: u32, height: u32, fps: f64) -> Result<Self, EncodeError> {
    if width == 0 || height == 0 || width > u16::MAX as u32 || height > u16::MAX as u32 {
      return Err(EncodeError::InvalidParameter(format!(
        "GIF 不支持的尺寸 {}x{}",
        width, height
      )));
    }
    if !fps.is_finite() || fps <= 0.0 {
      return Err(EncodeError::InvalidParameter(format!("帧率无效: {}", fps)));
    }

    let file = tempfile::tempfile_in(scratch_dir)?;
    let writer = BufWriter::new(file.try_clone()?);
    let mut encoder = GifEncoder::new_with_speed(writer, GIF_ENCODE_SPEED);
    encoder.set_repeat(Repeat::Infinite)?;

    let delay_ms = (1000.0 / fps).round().max(1.0) as u32;
    debug!("GIF 输出: {}x{}, 帧间隔 {} ms", width, height, delay_ms);

    Ok(GifVideoOutput {
      encoder,
      file,
      width,
      height,
      delay: Delay::from_numer_denom_ms(delay_ms, 1),
      frame_count: 0,
    })
  }
}

impl VideoEncoder for GifVideoOutput {
  fn write_frame(&mut self, frame: &RgbNhwcFrame) -> Result<(), EncodeError> {
    check_frame_size(frame, self.width, self.height)?;

    let rgba = DynamicImage::ImageRgb8(frame.to_rgb_image()).to_rgba8();
    self
      .encoder
      .encode_frame(Frame::from_parts(rgba, 0, 0, self.delay))?;
    self.frame_count += 1;
    Ok(())
  }

  fn finish(self) -> Result<EncodedVideo, EncodeError> {
    let GifVideoOutput {
      encoder,
      mut file,
      frame_count,
      ..
    } = self;

    // 释放编码器时写入 GIF 结尾
    drop(encoder);

    file.seek(SeekFrom::Start(0))?;
    let mut data = Vec::new();
    BufReader::new(&mut file).read_to_end(&mut data)?;
    if data.last() != Some(&GIF_TRAILER) {
      return Err(EncodeError::Incomplete("缺少 GIF 结尾标记".to_string()));
    }

    let mut decoder = GifDecoder::new(Cursor::new(data.as_slice()))?;
    decoder.set_limits(Limits::default())?;
    let encoded_frames = decoder
      .into_frames()
      .take_while(|frame| frame.is_ok())
      .count();
    if encoded_frames != frame_count {
      return Err(EncodeError::Incomplete(format!(
        "写入 {} 帧, 文件中只有 {} 帧",
        frame_count, encoded_frames
      )));
    }

    info!("GIF 编码完成: {} 帧, {} 字节", encoded_frames, data.len());
    Ok(EncodedVideo {
      data,
      content_type: GIF_CONTENT_TYPE,
      frame_count: encoded_frames,
    })
  }
}
