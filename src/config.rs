// 该文件是 Tanjing （探镜） 项目的一部分。
// src/config.rs - 服务配置
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
  net::SocketAddr,
  path::{Path, PathBuf},
  time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{input::VideoDecodeOptions, model::ModelOptions};

const DEFAULT_MODEL_URL: &str = "yolov8:///app/models/yolov8n.onnx";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("配置文件格式错误: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("配置无效: {0}")]
  Invalid(String),
}

/// 视频编解码后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodecKind {
  /// GIF 动画（image crate）
  Gif,
  /// 任意 decodebin 支持的容器输入，H.264/MP4 输出
  Gstreamer,
}

impl Default for VideoCodecKind {
  fn default() -> Self {
    if cfg!(feature = "gstreamer_video") {
      VideoCodecKind::Gstreamer
    } else {
      VideoCodecKind::Gif
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
  pub codec: VideoCodecKind,
  /// 单个视频允许的最大帧数
  pub max_frames: usize,
  /// 每批并行检测的帧数
  pub parallel_frames: usize,
  /// 等待解码器产出下一帧的时间上限
  pub decode_timeout_secs: u64,
  /// 源视频未声明帧率时使用
  pub default_fps: f64,
}

impl Default for VideoConfig {
  fn default() -> Self {
    Self {
      codec: VideoCodecKind::default(),
      max_frames: 18000,
      parallel_frames: 4,
      decode_timeout_secs: 10,
      default_fps: 30.0,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub listen: SocketAddr,
  pub model: Url,
  pub confidence: f32,
  pub iou_threshold: f32,
  pub input_size: u32,
  pub max_upload_bytes: usize,
  pub request_timeout_secs: u64,
  /// 临时文件目录，缺省为系统临时目录
  pub scratch_dir: Option<PathBuf>,
  pub video: VideoConfig,
}

impl Default for ServerConfig {
  fn default() -> Self {
    let model = ModelOptions::default();
    Self {
      listen: SocketAddr::from(([0, 0, 0, 0], 8000)),
      model: Url::parse(DEFAULT_MODEL_URL).expect("内置模型地址有效"),
      confidence: model.confidence,
      iou_threshold: model.iou_threshold,
      input_size: model.input_size,
      max_upload_bytes: 256 * 1024 * 1024,
      request_timeout_secs: 300,
      scratch_dir: None,
      video: VideoConfig::default(),
    }
  }
}

impl ServerConfig {
  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Ok(toml::from_str(&content)?)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let invalid = |msg: String| Err(ConfigError::Invalid(msg));

    if !(0.0..=1.0).contains(&self.confidence) {
      return invalid(format!("confidence 必须在 0 到 1 之间: {}", self.confidence));
    }
    if !(0.0..=1.0).contains(&self.iou_threshold) {
      return invalid(format!(
        "iou_threshold 必须在 0 到 1 之间: {}",
        self.iou_threshold
      ));
    }
    if self.input_size == 0 || self.input_size % 32 != 0 {
      return invalid(format!("input_size 必须是 32 的正整数倍: {}", self.input_size));
    }
    if self.max_upload_bytes == 0 {
      return invalid("max_upload_bytes 不能为 0".to_string());
    }
    if self.request_timeout_secs == 0 {
      return invalid("request_timeout_secs 不能为 0".to_string());
    }
    if self.video.max_frames == 0 || self.video.parallel_frames == 0 {
      return invalid("video.max_frames 与 video.parallel_frames 不能为 0".to_string());
    }
    if self.video.decode_timeout_secs == 0 {
      return invalid("video.decode_timeout_secs 不能为 0".to_string());
    }
    if !self.video.default_fps.is_finite() || self.video.default_fps <= 0.0 {
      return invalid(format!("video.default_fps 无效: {}", self.video.default_fps));
    }
    if self.video.codec == VideoCodecKind::Gstreamer && !cfg!(feature = "gstreamer_video") {
      return invalid("当前构建未启用 gstreamer_video 特性".to_string());
    }
    if let Some(dir) = &self.scratch_dir
      && !dir.is_dir()
    {
      return invalid(format!("scratch_dir 不是目录: {}", dir.display()));
    }
    Ok(())
  }

  pub fn model_options(&self) -> ModelOptions {
    ModelOptions {
      confidence: self.confidence,
      iou_threshold: self.iou_threshold,
      input_size: self.input_size,
    }
  }

  pub fn scratch_dir(&self) -> PathBuf {
    self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }

  pub fn decode_options(&self) -> VideoDecodeOptions {
    VideoDecodeOptions {
      max_frames: self.video.max_frames,
      read_timeout: Duration::from_secs(self.video.decode_timeout_secs),
      default_fps: self.video.default_fps,
      scratch_dir: self.scratch_dir(),
    }
  }
}
