// 该文件是 Tanjing （探镜） 项目的一部分。
// src/input.rs - 图像/视频解码
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

use std::{path::PathBuf, time::Duration};

use thiserror::Error;
use tracing::{debug, info};

use crate::{
  config::VideoCodecKind,
  frame::{FrameError, RgbNhwcFrame},
};

mod image_bytes;
pub use self::image_bytes::decode_image;

mod gif_input;
pub use self::gif_input::GifVideoInput;

#[cfg(feature = "gstreamer_video")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_video")]
pub use self::gstreamer_input::{GStreamerInputError, GStreamerVideoInput};

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("图像解码错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("帧数据错误: {0}")]
  Frame(#[from] FrameError),
  #[error("视频中没有可解码的帧")]
  EmptyVideo,
  #[error("视频帧数超过上限 {0}")]
  TooManyFrames(usize),
  #[error("{0:?} 内未能读取到视频帧")]
  Timeout(Duration),
  #[error("不支持的媒体格式: {0}")]
  Unsupported(String),
  #[cfg(feature = "gstreamer_video")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamer(#[from] GStreamerInputError),
}

/// 解码后视频流的基本信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoStreamInfo {
  pub width: u32,
  pub height: u32,
  pub fps: f64,
}

#[derive(Debug, Clone)]
pub struct VideoDecodeOptions {
  pub max_frames: usize,
  pub read_timeout: Duration,
  pub default_fps: f64,
  pub scratch_dir: PathBuf,
}

impl Default for VideoDecodeOptions {
  fn default() -> Self {
    Self {
      max_frames: 18000,
      read_timeout: Duration::from_secs(10),
      default_fps: 30.0,
      scratch_dir: std::env::temp_dir(),
    }
  }
}

pub enum VideoInputWrapper {
  Gif(GifVideoInput),
  #[cfg(feature = "gstreamer_video")]
  GStreamer(GStreamerVideoInput),
}

impl VideoInputWrapper {
  fn info(&self) -> VideoStreamInfo {
    match self {
      VideoInputWrapper::Gif(input) => input.info(),
      #[cfg(feature = "gstreamer_video")]
      VideoInputWrapper::GStreamer(input) => input.info(),
    }
  }
}

impl Iterator for VideoInputWrapper {
  type Item = Result<RgbNhwcFrame, DecodeError>;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      VideoInputWrapper::Gif(input) => input.next(),
      #[cfg(feature = "gstreamer_video")]
      VideoInputWrapper::GStreamer(input) => input.next(),
    }
  }
}

/// 有限、有序的视频帧序列
///
/// 超过帧数上限时产出 `TooManyFrames`，出现任何错误后迭代结束。
pub struct VideoInput {
  source: VideoInputWrapper,
  info: VideoStreamInfo,
  max_frames: usize,
  decoded: usize,
  finished: bool,
}

impl VideoInput {
  pub fn open(
    codec: VideoCodecKind,
    data: Vec<u8>,
    options: &VideoDecodeOptions,
  ) -> Result<Self, DecodeError> {
    let source = match codec {
      VideoCodecKind::Gif => VideoInputWrapper::Gif(GifVideoInput::new(data, options)?),
      #[cfg(feature = "gstreamer_video")]
      VideoCodecKind::Gstreamer => {
        VideoInputWrapper::GStreamer(GStreamerVideoInput::new(&data, options)?)
      }
      #[cfg(not(feature = "gstreamer_video"))]
      VideoCodecKind::Gstreamer => {
        return Err(DecodeError::Unsupported("未启用 GStreamer 支持".to_string()));
      }
    };

    let info = source.info();
    info!(
      "打开视频输入: {}x{} @ {:.2} fps",
      info.width, info.height, info.fps
    );

    Ok(VideoInput {
      source,
      info,
      max_frames: options.max_frames,
      decoded: 0,
      finished: false,
    })
  }

  pub fn info(&self) -> VideoStreamInfo {
    self.info
  }
}

impl Iterator for VideoInput {
  type Item = Result<RgbNhwcFrame, DecodeError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    match self.source.next() {
      Some(Ok(frame)) => {
        if self.decoded >= self.max_frames {
          self.finished = true;
          return Some(Err(DecodeError::TooManyFrames(self.max_frames)));
        }
        self.decoded += 1;
        Some(Ok(frame))
      }
      Some(Err(e)) => {
        self.finished = true;
        Some(Err(e))
      }
      None => {
        debug!("视频输入结束，共 {} 帧", self.decoded);
        self.finished = true;
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::output::{GifVideoOutput, VideoEncoder};

  fn gif_bytes(frames: u8) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let mut output = GifVideoOutput::new(dir.path(), 8, 6, 10.0).unwrap();
    for i in 0..frames {
      let mut frame = RgbNhwcFrame::with_shape(6, 8);
      frame.as_mut().fill(i * 20);
      output.write_frame(&frame).unwrap();
    }
    output.finish().unwrap().data
  }

  #[test]
  fn frame_limit_is_enforced() {
    let options = VideoDecodeOptions {
      max_frames: 2,
      ..Default::default()
    };
    let input = VideoInput::open(VideoCodecKind::Gif, gif_bytes(3), &options).unwrap();
    let results: Vec<_> = input.collect();

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok() && results[1].is_ok());
    assert!(matches!(results[2], Err(DecodeError::TooManyFrames(2))));
  }

  #[test]
  fn reports_stream_info() {
    let input =
      VideoInput::open(VideoCodecKind::Gif, gif_bytes(2), &VideoDecodeOptions::default()).unwrap();
    let info = input.info();
    assert_eq!((info.width, info.height), (8, 6));
    assert!((info.fps - 10.0).abs() < 0.5);
  }

  /// 声明 65535x65535 画布、只含一个 1x1 帧的 GIF
  const OVERSIZED_CANVAS_GIF: [u8; 35] = [
    b'G', b'I', b'F', b'8', b'9', b'a', // 头部
    0xFF, 0xFF, 0xFF, 0xFF, 0x80, 0x00, 0x00, // 逻辑屏幕，带 2 色全局调色板
    0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, // 调色板
    0x2C, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, // 图像描述符
    0x02, 0x02, 0x44, 0x01, 0x00, // LZW 数据
    0x3B,
  ];

  #[test]
  fn oversized_canvas_is_rejected() {
    let result = VideoInput::open(
      VideoCodecKind::Gif,
      OVERSIZED_CANVAS_GIF.to_vec(),
      &VideoDecodeOptions::default(),
    );
    assert!(matches!(
      result,
      Err(DecodeError::Image(image::ImageError::Limits(_)))
    ));
  }

  #[test]
  fn gif_frame_rate_follows_first_frame_delay() {
    use image::{
      Delay, Frame, RgbaImage,
      codecs::gif::GifEncoder,
    };

    let mut bytes = Vec::new();
    {
      let mut encoder = GifEncoder::new(&mut bytes);
      for delay_ms in [40, 200, 500] {
        let frame = Frame::from_parts(
          RgbaImage::new(4, 4),
          0,
          0,
          Delay::from_numer_denom_ms(delay_ms, 1),
        );
        encoder.encode_frame(frame).unwrap();
      }
    }

    let input = VideoInput::open(VideoCodecKind::Gif, bytes, &VideoDecodeOptions::default()).unwrap();
    assert!((input.info().fps - 25.0).abs() < 0.5);
    assert_eq!(input.count(), 3);
  }

  #[test]
  fn garbage_is_rejected() {
    let result = VideoInput::open(
      VideoCodecKind::Gif,
      b"not a video".to_vec(),
      &VideoDecodeOptions::default(),
    );
    assert!(result.is_err());
  }
}
