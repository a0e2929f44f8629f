// 该文件是 Tanjing （探镜） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use tracing::info;
use url::Url;

use crate::config::{ConfigError, ServerConfig, VideoCodecKind};

/// Tanjing 检测服务参数
///
/// 优先级：命令行 / 环境变量 > 配置文件 > 内置默认值
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// TOML 配置文件路径
  #[arg(long, env = "TANJING_CONFIG", value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 监听地址
  #[arg(long, env = "TANJING_LISTEN", value_name = "ADDR")]
  pub listen: Option<SocketAddr>,

  /// 模型地址，例如 yolov8:///app/models/yolov8n.onnx
  #[arg(long, env = "TANJING_MODEL", value_name = "URL")]
  pub model: Option<Url>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, env = "TANJING_CONFIDENCE", value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, env = "TANJING_IOU_THRESHOLD", value_name = "THRESHOLD")]
  pub iou_threshold: Option<f32>,

  /// 模型输入边长
  #[arg(long, env = "TANJING_INPUT_SIZE", value_name = "PIXELS")]
  pub input_size: Option<u32>,

  /// 上传文件大小上限（字节）
  #[arg(long, env = "TANJING_MAX_UPLOAD_BYTES", value_name = "BYTES")]
  pub max_upload_bytes: Option<usize>,

  /// 单个请求的处理时间上限（秒）
  #[arg(long, env = "TANJING_REQUEST_TIMEOUT_SECS", value_name = "SECS")]
  pub request_timeout_secs: Option<u64>,

  /// 临时文件目录
  #[arg(long, env = "TANJING_SCRATCH_DIR", value_name = "DIR")]
  pub scratch_dir: Option<PathBuf>,

  /// 视频编解码后端
  #[arg(long, env = "TANJING_VIDEO_CODEC", value_enum)]
  pub video_codec: Option<VideoCodecKind>,

  /// 单个视频的最大帧数
  #[arg(long, env = "TANJING_VIDEO_MAX_FRAMES", value_name = "COUNT")]
  pub video_max_frames: Option<usize>,

  /// 每批并行检测的帧数
  #[arg(long, env = "TANJING_VIDEO_PARALLEL_FRAMES", value_name = "COUNT")]
  pub video_parallel_frames: Option<usize>,
}

impl Args {
  /// 合并配置文件与命令行参数，并校验结果
  pub fn load_config(&self) -> Result<ServerConfig, ConfigError> {
    let mut config = match &self.config {
      Some(path) => {
        info!("读取配置文件: {}", path.display());
        ServerConfig::from_file(path)?
      }
      None => ServerConfig::default(),
    };

    if let Some(listen) = self.listen {
      config.listen = listen;
    }
    if let Some(model) = &self.model {
      config.model = model.clone();
    }
    if let Some(confidence) = self.confidence {
      config.confidence = confidence;
    }
    if let Some(iou_threshold) = self.iou_threshold {
      config.iou_threshold = iou_threshold;
    }
    if let Some(input_size) = self.input_size {
      config.input_size = input_size;
    }
    if let Some(max_upload_bytes) = self.max_upload_bytes {
      config.max_upload_bytes = max_upload_bytes;
    }
    if let Some(request_timeout_secs) = self.request_timeout_secs {
      config.request_timeout_secs = request_timeout_secs;
    }
    if let Some(scratch_dir) = &self.scratch_dir {
      config.scratch_dir = Some(scratch_dir.clone());
    }
    if let Some(codec) = self.video_codec {
      config.video.codec = codec;
    }
    if let Some(max_frames) = self.video_max_frames {
      config.video.max_frames = max_frames;
    }
    if let Some(parallel_frames) = self.video_parallel_frames {
      config.video.parallel_frames = parallel_frames;
    }

    config.validate()?;
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn command_line_overrides_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "confidence = 0.3\nrequest_timeout_secs = 60").unwrap();

    let args = Args::parse_from([
      "tanjing",
      "--config",
      file.path().to_str().unwrap(),
      "--confidence",
      "0.6",
      "--video-codec",
      "gif",
    ]);
    let config = args.load_config().unwrap();

    assert_eq!(config.confidence, 0.6);
    assert_eq!(config.request_timeout_secs, 60);
    assert_eq!(config.video.codec, VideoCodecKind::Gif);
  }

  #[test]
  fn invalid_override_is_rejected() {
    let args = Args {
      iou_threshold: Some(2.0),
      ..Default::default()
    };
    assert!(matches!(args.load_config(), Err(ConfigError::Invalid(_))));
  }
}
