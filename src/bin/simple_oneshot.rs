// 该文件是 Tanjing （探镜） 项目的一部分。
// src/bin/simple_oneshot.rs - 离线单文件检测
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

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use url::Url;

use tanjing::{
  config::VideoCodecKind,
  init_tracing,
  input::{VideoDecodeOptions, VideoInput, decode_image},
  model::{ModelOptions, load_model},
  output::{VideoOutputWrapper, draw::Draw, draw::label_text, save_image},
  task::{ContinuousTask, OneShotTask, Task},
};

const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "avi", "mkv", "mov", "webm"];

/// 不经过 HTTP，直接对单个图像或视频文件做检测并保存标注结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 yolov8:///app/models/yolov8n.onnx
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入文件
  #[arg(long, value_name = "SOURCE")]
  pub input: PathBuf,
  /// 输出文件
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,
  /// 按视频处理（常见视频扩展名会自动识别）
  #[arg(long)]
  pub video: bool,
  /// 视频编解码后端
  #[arg(long, value_enum, default_value_t = VideoCodecKind::default())]
  pub codec: VideoCodecKind,
  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub confidence: f32,
  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.7", value_name = "THRESHOLD")]
  pub iou_threshold: f32,
  /// 每批并行检测的帧数
  #[arg(long, default_value = "4", value_name = "COUNT")]
  pub parallel_frames: usize,
}

impl Args {
  fn is_video(&self) -> bool {
    self.video
      || self
        .input
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
  }
}

fn main() -> Result<()> {
  init_tracing();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入文件: {}", args.input.display());
  info!("输出文件: {}", args.output.display());

  let options = ModelOptions {
    confidence: args.confidence,
    iou_threshold: args.iou_threshold,
    ..Default::default()
  };
  let model = load_model(&args.model, &options)?;
  let draw = Draw::new().context("无法加载内嵌字体")?;
  let bytes = std::fs::read(&args.input)
    .with_context(|| format!("无法读取输入文件: {}", args.input.display()))?;

  if args.is_video() {
    let decode = VideoDecodeOptions::default();
    let input = VideoInput::open(args.codec, bytes, &decode)?;
    let output = VideoOutputWrapper::open(args.codec, &decode.scratch_dir, &input.info())?;
    let encoded = ContinuousTask::new(&draw)
      .with_parallel_frames(args.parallel_frames)
      .run_task(input, model.as_ref(), output)?;

    std::fs::write(&args.output, &encoded.data)
      .with_context(|| format!("无法写入输出文件: {}", args.output.display()))?;
    info!(
      "保存视频到文件: {} ({} 帧, {})",
      args.output.display(),
      encoded.frame_count,
      encoded.content_type
    );
  } else {
    let frame = decode_image(&bytes)?;
    let output = OneShotTask.run_task(frame, model.as_ref(), Some(&draw))?;
    for item in output.result.iter() {
      info!("  - {} at {:?}", label_text(item), item.bbox);
    }
    if let Some(annotated) = output.annotated {
      save_image(&annotated, &args.output)?;
    }
  }

  Ok(())
}
