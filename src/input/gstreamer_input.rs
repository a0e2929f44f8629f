// 该文件是 Tanjing （探镜） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频解码
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

//! # GStreamer 视频解码
//!
//! 上传的视频字节先写入临时目录中的临时文件，再由
//! `filesrc ! decodebin ! videoconvert ! appsink` 管道逐帧解码为 RGB。
//!
//! 需要系统安装 GStreamer 开发库：
//!
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use std::{io::Write, time::Duration};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{DecodeError, VideoDecodeOptions, VideoStreamInfo};
use crate::frame::{RGB_CHANNELS, RgbNhwcFrame};

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 操作失败: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("状态切换失败: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("找不到管道元素: {0}")]
  ElementNotFound(&'static str),
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("不支持的像素格式: {0:?}")]
  UnsupportedFormat(gst_video::VideoFormat),
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
}

const GSTREAMER_INPUT_PIPELINE: &str = "filesrc name=src ! decodebin ! videoconvert ! \
   video/x-raw,format=RGB ! appsink name=sink sync=false max-buffers=4 drop=false";

pub struct GStreamerVideoInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  pending: Option<RgbNhwcFrame>,
  info: VideoStreamInfo,
  read_timeout: Duration,
  // 管道运行期间保持临时文件存在
  _source: NamedTempFile,
}

impl Drop for GStreamerVideoInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止 GStreamer 输入管道失败: {}", e);
    }
  }
}

impl GStreamerVideoInput {
  pub fn new(data: &[u8], options: &VideoDecodeOptions) -> Result<Self, DecodeError> {
    gst::init().map_err(GStreamerInputError::from)?;

    let mut source = tempfile::Builder::new()
      .prefix("tanjing-input-")
      .tempfile_in(&options.scratch_dir)?;
    source.write_all(data)?;
    source.flush()?;

    let location = source
      .path()
      .to_str()
      .ok_or_else(|| DecodeError::Unsupported("临时文件路径不是 UTF-8".to_string()))?
      .to_string();
    debug!("GStreamer 输入管道: {} (location={})", GSTREAMER_INPUT_PIPELINE, location);

    let pipeline = gst::parse::launch(GSTREAMER_INPUT_PIPELINE)
      .map_err(GStreamerInputError::from)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;
    pipeline
      .by_name("src")
      .ok_or(GStreamerInputError::ElementNotFound("src"))?
      .set_property("location", location.as_str());
    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::ElementNotFound("sink"))?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::ElementNotFound("sink"))?;

    pipeline
      .set_state(gst::State::Playing)
      .map_err(GStreamerInputError::from)?;

    let mut input = GStreamerVideoInput {
      pipeline,
      appsink,
      pending: None,
      info: VideoStreamInfo {
        width: 0,
        height: 0,
        fps: options.default_fps,
      },
      read_timeout: options.read_timeout,
      _source: source,
    };

    // 读取首帧以获得尺寸与帧率
    let sample = input.pull_sample()?.ok_or(DecodeError::EmptyVideo)?;
    let (frame, info) = convert_sample(&sample)?;
    let fps = info.fps();
    if fps.numer() > 0 && fps.denom() > 0 {
      input.info.fps = fps.numer() as f64 / fps.denom() as f64;
    } else {
      warn!("视频未声明帧率，使用默认帧率 {}", options.default_fps);
    }
    input.info.width = frame.width();
    input.info.height = frame.height();
    input.pending = Some(frame);

    info!(
      "GStreamer 输入就绪: {}x{} @ {:.2} fps",
      input.info.width, input.info.height, input.info.fps
    );
    Ok(input)
  }

  pub fn info(&self) -> VideoStreamInfo {
    self.info
  }

  /// 到达流末尾时返回 `Ok(None)`
  fn pull_sample(&self) -> Result<Option<gst::Sample>, DecodeError> {
    let timeout = gst::ClockTime::from_nseconds(self.read_timeout.as_nanos() as u64);
    if let Some(sample) = self.appsink.try_pull_sample(timeout) {
      return Ok(Some(sample));
    }

    self.check_bus()?;
    if self.appsink.is_eos() {
      return Ok(None);
    }
    error!("{:?} 内未收到视频帧", self.read_timeout);
    Err(DecodeError::Timeout(self.read_timeout))
  }

  fn check_bus(&self) -> Result<(), GStreamerInputError> {
    let Some(bus) = self.pipeline.bus() else {
      return Ok(());
    };
    if let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
      if let gst::MessageView::Error(err) = msg.view() {
        error!("GStreamer 解码错误: {} ({:?})", err.error(), err.debug());
        return Err(GStreamerInputError::PipelineError(err.error().to_string()));
      }
    }
    Ok(())
  }
}

impl Iterator for GStreamerVideoInput {
  type Item = Result<RgbNhwcFrame, DecodeError>;

  fn next(&mut self) -> Option<Self::Item> {
    if let Some(frame) = self.pending.take() {
      return Some(Ok(frame));
    }

    match self.pull_sample() {
      Ok(Some(sample)) => Some(convert_sample(&sample).map(|(frame, _)| frame)),
      Ok(None) => None,
      Err(e) => Some(Err(e)),
    }
  }
}

fn convert_sample(
  sample: &gst::Sample,
) -> Result<(RgbNhwcFrame, gst_video::VideoInfo), DecodeError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;
  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;
  let row = width * RGB_CHANNELS;

  let map = buffer
    .map_readable()
    .map_err(|e| GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e)))?;
  let data = map.as_slice();

  let expected = stride * (height.saturating_sub(1)) + row;
  if stride < row || data.len() < expected {
    return Err(
      GStreamerInputError::BufferSizeMismatch {
        expected,
        actual: data.len(),
      }
      .into(),
    );
  }

  let mut pixels = Vec::with_capacity(row * height);
  match video_info.format() {
    gst_video::VideoFormat::Rgb => {
      for h in 0..height {
        pixels.extend_from_slice(&data[h * stride..h * stride + row]);
      }
    }
    gst_video::VideoFormat::Bgr => {
      for h in 0..height {
        for px in data[h * stride..h * stride + row].chunks_exact(RGB_CHANNELS) {
          pixels.extend_from_slice(&[px[2], px[1], px[0]]);
        }
      }
    }
    other => return Err(GStreamerInputError::UnsupportedFormat(other).into()),
  }

  let frame = RgbNhwcFrame::from_raw(width as u32, height as u32, pixels)?;
  Ok((frame, video_info))
}
