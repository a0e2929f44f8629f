// 该文件是 Tanjing （探镜） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer MP4 输出
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

//! # GStreamer 视频输出
//!
//! 标注后的帧经 `appsrc` 送入 H.264 编码管道，封装为 MP4 写入临时文件，
//! 收到 EOS 后读回字节，并重新解码一遍统计实际写入的帧数。

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{EncodeError, EncodedVideo, VideoEncoder, check_frame_size};
use crate::{
  frame::{RGB_CHANNELS, RgbNhwcFrame},
  input::{GStreamerVideoInput, VideoDecodeOptions},
};

const MP4_CONTENT_TYPE: &str = "video/mp4";
const GSTREAMER_OUTPUT_PIPELINE: &str = "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! \
   x264enc speed-preset=fast ! h264parse ! mp4mux ! filesink name=sink";
// 等待 EOS 写完文件的时间上限
const GSTREAMER_EOS_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 操作失败: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("状态切换失败: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("找不到管道元素: {0}")]
  ElementNotFound(&'static str),
  #[error("推送缓冲区失败: {0:?}")]
  FlowError(gst::FlowError),
  #[error("管道错误: {0}")]
  PipelineError(String),
}

pub struct GStreamerVideoOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  width: u32,
  height: u32,
  fps: gst::Fraction,
  // caps 隐含的行跨度，RGB 每行按 4 字节对齐
  stride: usize,
  frame_count: u64,
  scratch_dir: PathBuf,
  target: NamedTempFile,
}

impl Drop for GStreamerVideoOutput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止 GStreamer 输出管道失败: {}", e);
    }
  }
}

impl GStreamerVideoOutput {
  pub fn new(scratch_dir: &Path, width: u32, height: u32, fps: f64) -> Result<Self, EncodeError> {
    if width == 0 || height == 0 || !fps.is_finite() || fps <= 0.0 {
      return Err(EncodeError::InvalidParameter(format!(
        "{}x{} @ {} fps",
        width, height, fps
      )));
    }
    gst::init().map_err(GStreamerVideoOutputError::from)?;

    let target = tempfile::Builder::new()
      .prefix("tanjing-output-")
      .suffix(".mp4")
      .tempfile_in(scratch_dir)?;
    let location = target
      .path()
      .to_str()
      .ok_or_else(|| EncodeError::InvalidParameter("临时文件路径不是 UTF-8".to_string()))?
      .to_string();

    let pipeline = gst::parse::launch(GSTREAMER_OUTPUT_PIPELINE)
      .map_err(GStreamerVideoOutputError::from)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerVideoOutputError::PipelineError("无法创建管道".to_string()))?;
    pipeline
      .by_name("sink")
      .ok_or(GStreamerVideoOutputError::ElementNotFound("sink"))?
      .set_property("location", location.as_str());
    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::ElementNotFound("src"))?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::ElementNotFound("src"))?;

    // 帧率以毫帧为单位表示，兼容 29.97 之类的非整数帧率
    let fps = gst::Fraction::new((fps * 1000.0).round() as i32, 1000);
    let video_info = gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, width, height)
      .fps(fps)
      .build()
      .map_err(GStreamerVideoOutputError::from)?;
    let stride = video_info.stride()[0] as usize;
    let caps = video_info
      .to_caps()
      .map_err(GStreamerVideoOutputError::from)?;
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline
      .set_state(gst::State::Playing)
      .map_err(GStreamerVideoOutputError::from)?;
    info!(
      "视频输出初始化: {}x{} @ {}/{} fps, 行跨度 {} -> {}",
      width,
      height,
      fps.numer(),
      fps.denom(),
      stride,
      location
    );

    Ok(GStreamerVideoOutput {
      pipeline,
      appsrc,
      width,
      height,
      fps,
      stride,
      frame_count: 0,
      scratch_dir: scratch_dir.to_path_buf(),
      target,
    })
  }

  fn timestamp(&self, frame: u64) -> gst::ClockTime {
    let nanos = frame * 1_000_000_000 * self.fps.denom() as u64 / self.fps.numer() as u64;
    gst::ClockTime::from_nseconds(nanos)
  }
}

impl VideoEncoder for GStreamerVideoOutput {
  fn write_frame(&mut self, frame: &RgbNhwcFrame) -> Result<(), EncodeError> {
    check_frame_size(frame, self.width, self.height)?;

    let mut buffer = gst::Buffer::from_slice(pack_rows(frame, self.stride));
    let pts = self.timestamp(self.frame_count);
    let next = self.timestamp(self.frame_count + 1);
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or_else(|| GStreamerVideoOutputError::PipelineError("缓冲区不可写".to_string()))?;
      buffer_ref.set_pts(pts);
      buffer_ref.set_duration(next - pts);
    }

    self
      .appsrc
      .push_buffer(buffer)
      .map_err(GStreamerVideoOutputError::FlowError)?;
    self.frame_count += 1;
    Ok(())
  }

  fn finish(self) -> Result<EncodedVideo, EncodeError> {
    self
      .appsrc
      .end_of_stream()
      .map_err(GStreamerVideoOutputError::FlowError)?;

    let bus = self
      .pipeline
      .bus()
      .ok_or_else(|| GStreamerVideoOutputError::PipelineError("管道没有总线".to_string()))?;
    let msg = bus.timed_pop_filtered(
      gst::ClockTime::from_seconds(GSTREAMER_EOS_TIMEOUT_SECS),
      &[gst::MessageType::Eos, gst::MessageType::Error],
    );
    match msg.as_ref().map(|msg| msg.view()) {
      Some(gst::MessageView::Eos(..)) => debug!("视频输出收到 EOS"),
      Some(gst::MessageView::Error(err)) => {
        return Err(
          GStreamerVideoOutputError::PipelineError(format!(
            "{} ({:?})",
            err.error(),
            err.debug()
          ))
          .into(),
        );
      }
      _ => {
        return Err(EncodeError::Incomplete(format!(
          "{} 秒内未完成编码",
          GSTREAMER_EOS_TIMEOUT_SECS
        )));
      }
    }
    self
      .pipeline
      .set_state(gst::State::Null)
      .map_err(GStreamerVideoOutputError::from)?;

    let data = std::fs::read(self.target.path())?;
    if data.is_empty() {
      return Err(EncodeError::Incomplete("MP4 文件为空".to_string()));
    }

    let options = VideoDecodeOptions {
      max_frames: usize::MAX,
      read_timeout: Duration::from_secs(GSTREAMER_EOS_TIMEOUT_SECS),
      default_fps: self.fps.numer() as f64 / self.fps.denom() as f64,
      scratch_dir: self.scratch_dir.clone(),
    };
    let encoded_frames = count_frames(&data, &options)?;
    if encoded_frames as u64 != self.frame_count {
      warn!(
        "写入 {} 帧, MP4 中解码出 {} 帧",
        self.frame_count, encoded_frames
      );
    }

    info!("MP4 编码完成: {} 帧, {} 字节", encoded_frames, data.len());
    Ok(EncodedVideo {
      data,
      content_type: MP4_CONTENT_TYPE,
      frame_count: encoded_frames,
    })
  }
}

/// 按行跨度复制像素，行尾补零
fn pack_rows(frame: &RgbNhwcFrame, stride: usize) -> Vec<u8> {
  let row = frame.width() as usize * RGB_CHANNELS;
  if stride == row {
    return frame.as_nhwc().to_vec();
  }

  let mut data = vec![0u8; stride * frame.height() as usize];
  for (dst, src) in data
    .chunks_exact_mut(stride)
    .zip(frame.as_nhwc().chunks_exact(row))
  {
    dst[..row].copy_from_slice(src);
  }
  data
}

/// 重新解码编码结果，返回其中的帧数
fn count_frames(data: &[u8], options: &VideoDecodeOptions) -> Result<usize, EncodeError> {
  let incomplete = |e| EncodeError::Incomplete(format!("无法重新解码 MP4: {}", e));

  let input = GStreamerVideoInput::new(data, options).map_err(incomplete)?;
  let mut count = 0;
  for frame in input {
    frame.map_err(incomplete)?;
    count += 1;
  }
  Ok(count)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn odd_width_rows_are_padded_to_caps_stride() {
    gst::init().unwrap();
    let info = gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, 854, 480)
      .build()
      .unwrap();
    let stride = info.stride()[0] as usize;
    assert_eq!(stride, 2564);

    let mut frame = RgbNhwcFrame::with_shape(480, 854);
    frame.as_mut().fill(7);
    let data = pack_rows(&frame, stride);
    assert_eq!(data.len(), info.size());
    for row in data.chunks_exact(stride) {
      assert!(row[..854 * RGB_CHANNELS].iter().all(|&v| v == 7));
      assert_eq!(&row[854 * RGB_CHANNELS..], &[0, 0]);
    }
  }

  #[test]
  fn aligned_rows_are_copied_as_is() {
    let mut frame = RgbNhwcFrame::with_shape(2, 4);
    frame.as_mut().copy_from_slice(&(0..24).collect::<Vec<u8>>());
    assert_eq!(pack_rows(&frame, 12), frame.as_nhwc());
  }

  #[test]
  fn garbage_output_has_no_countable_frames() {
    gst::init().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let options = VideoDecodeOptions {
      read_timeout: Duration::from_secs(5),
      scratch_dir: dir.path().to_path_buf(),
      ..Default::default()
    };
    let err = count_frames(b"not an mp4", &options).unwrap_err();
    assert!(matches!(err, EncodeError::Incomplete(_)));
  }
}
