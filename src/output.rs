// 该文件是 Tanjing （探镜） 项目的一部分。
// src/output.rs - 标注结果编码
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

use thiserror::Error;

use crate::{config::VideoCodecKind, frame::RgbNhwcFrame, input::VideoStreamInfo};

pub mod draw;

mod image_output;
pub use self::image_output::{encode_jpeg, save_image};

mod gif_output;
pub use self::gif_output::GifVideoOutput;

#[cfg(feature = "gstreamer_video")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_video")]
pub use self::gstreamer_video_output::{GStreamerVideoOutput, GStreamerVideoOutputError};

#[derive(Error, Debug)]
pub enum EncodeError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像编码错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("帧尺寸 {actual:?} 与输出尺寸 {expected:?} 不一致")]
  FrameSize {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("输出参数无效: {0}")]
  InvalidParameter(String),
  #[error("输出文件不完整: {0}")]
  Incomplete(String),
  #[error("不支持的输出格式: {0}")]
  Unsupported(String),
  #[cfg(feature = "gstreamer_video")]
  #[error("GStreamer 输出错误: {0}")]
  GStreamer(#[from] GStreamerVideoOutputError),
}

/// 编码完成的视频
#[derive(Debug, Clone)]
pub struct EncodedVideo {
  pub data: Vec<u8>,
  pub content_type: &'static str,
  pub frame_count: usize,
}

pub trait VideoEncoder {
  fn write_frame(&mut self, frame: &RgbNhwcFrame) -> Result<(), EncodeError>;

  /// 写入结尾并读回全部字节，`frame_count` 为容器中实际的帧数
  fn finish(self) -> Result<EncodedVideo, EncodeError>
  where
    Self: Sized;
}

pub enum VideoOutputWrapper {
  Gif(GifVideoOutput),
  #[cfg(feature = "gstreamer_video")]
  GStreamer(GStreamerVideoOutput),
}

impl VideoOutputWrapper {
  /// 按源视频的尺寸与帧率打开编码器，临时文件位于 `scratch_dir`
  pub fn open(
    codec: VideoCodecKind,
    scratch_dir: &Path,
    info: &VideoStreamInfo,
  ) -> Result<Self, EncodeError> {
    match codec {
      VideoCodecKind::Gif => Ok(VideoOutputWrapper::Gif(GifVideoOutput::new(
        scratch_dir,
        info.width,
        info.height,
        info.fps,
      )?)),
      #[cfg(feature = "gstreamer_video")]
      VideoCodecKind::Gstreamer => Ok(VideoOutputWrapper::GStreamer(GStreamerVideoOutput::new(
        scratch_dir,
        info.width,
        info.height,
        info.fps,
      )?)),
      #[cfg(not(feature = "gstreamer_video"))]
      VideoCodecKind::Gstreamer => Err(EncodeError::Unsupported(
        "未启用 GStreamer 支持".to_string(),
      )),
    }
  }
}

impl VideoEncoder for VideoOutputWrapper {
  fn write_frame(&mut self, frame: &RgbNhwcFrame) -> Result<(), EncodeError> {
    match self {
      VideoOutputWrapper::Gif(output) => output.write_frame(frame),
      #[cfg(feature = "gstreamer_video")]
      VideoOutputWrapper::GStreamer(output) => output.write_frame(frame),
    }
  }

  fn finish(self) -> Result<EncodedVideo, EncodeError> {
    match self {
      VideoOutputWrapper::Gif(output) => output.finish(),
      #[cfg(feature = "gstreamer_video")]
      VideoOutputWrapper::GStreamer(output) => output.finish(),
    }
  }
}

fn check_frame_size(frame: &RgbNhwcFrame, width: u32, height: u32) -> Result<(), EncodeError> {
  if frame.width() != width || frame.height() != height {
    return Err(EncodeError::FrameSize {
      expected: (width, height),
      actual: (frame.width(), frame.height()),
    });
  }
  Ok(())
}
