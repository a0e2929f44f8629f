// 该文件是 Tanjing （探镜） 项目的一部分。
// src/input/gif_input.rs - GIF 动画输入
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

use image::{
  AnimationDecoder, DynamicImage, Frame, Frames, ImageDecoder, Limits, codecs::gif::GifDecoder,
};
use tracing::{debug, warn};

use super::{DecodeError, VideoDecodeOptions, VideoStreamInfo};
use crate::frame::RgbNhwcFrame;

// 浏览器对 0 延迟的 GIF 按 100ms 播放
const GIF_ZERO_DELAY_FPS: f64 = 10.0;

/// 动画 GIF 帧序列
///
/// 输出帧率取自首帧延迟，后续帧各自的延迟不保留，标注后的视频按恒定帧率播放。
pub struct GifVideoInput {
  frames: Frames<'static>,
  pending: Option<RgbNhwcFrame>,
  info: VideoStreamInfo,
}

fn frame_to_rgb(frame: Frame) -> RgbNhwcFrame {
  RgbNhwcFrame::from(DynamicImage::ImageRgba8(frame.into_buffer()).to_rgb8())
}

impl GifVideoInput {
  pub fn new(data: Vec<u8>, options: &VideoDecodeOptions) -> Result<Self, DecodeError> {
    let mut decoder = GifDecoder::new(Cursor::new(data))?;
    // 首帧解码前会按声明的画布尺寸分配整块缓冲区
    decoder.set_limits(Limits::default())?;
    let (width, height) = decoder.dimensions();
    if width == 0 || height == 0 {
      return Err(DecodeError::EmptyVideo);
    }

    let mut frames = decoder.into_frames();
    let first = frames.next().ok_or(DecodeError::EmptyVideo)??;

    let (numer, denom) = first.delay().numer_denom_ms();
    let fps = if numer == 0 || denom == 0 {
      warn!("GIF 帧延迟为 0，按 {} fps 处理", GIF_ZERO_DELAY_FPS);
      GIF_ZERO_DELAY_FPS
    } else {
      1000.0 * denom as f64 / numer as f64
    };
    let fps = if fps.is_finite() && fps > 0.0 {
      fps
    } else {
      options.default_fps
    };
    debug!("GIF 输入: {}x{}, 帧延迟 {}/{} ms", width, height, numer, denom);

    Ok(GifVideoInput {
      frames,
      pending: Some(frame_to_rgb(first)),
      info: VideoStreamInfo { width, height, fps },
    })
  }

  pub fn info(&self) -> VideoStreamInfo {
    self.info
  }
}

impl Iterator for GifVideoInput {
  type Item = Result<RgbNhwcFrame, DecodeError>;

  fn next(&mut self) -> Option<Self::Item> {
    if let Some(frame) = self.pending.take() {
      return Some(Ok(frame));
    }

    self
      .frames
      .next()
      .map(|frame| frame.map(frame_to_rgb).map_err(DecodeError::from))
  }
}
