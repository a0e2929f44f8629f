// 该文件是 Tanjing （探镜） 项目的一部分。
// src/bin/tanjing_client.rs - 检测服务命令行客户端
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

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use url::Url;

use tanjing::{
  client::{DetectionClient, render_detections},
  init_tracing,
  output::save_image,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
  /// 提交到 /predict/image/，在本地绘制检测框
  Image,
  /// 提交到 /predict/video/，保存服务返回的标注视频
  Video,
}

/// Tanjing 检测服务客户端
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 服务地址
  #[arg(
    long,
    env = "TANJING_SERVER",
    default_value = "http://127.0.0.1:8000/",
    value_name = "URL"
  )]
  pub server: Url,
  /// 提交方式
  #[arg(long, value_enum, default_value_t = Mode::Image)]
  pub mode: Mode,
  /// 输入文件
  #[arg(long, value_name = "SOURCE")]
  pub input: PathBuf,
  /// 输出文件
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,
  /// 请求超时（秒）
  #[arg(long, default_value = "300", value_name = "SECS")]
  pub timeout_secs: u64,
}

fn main() -> Result<()> {
  init_tracing();

  let args = Args::parse();
  let client = DetectionClient::new(args.server.clone(), Duration::from_secs(args.timeout_secs))?;

  match args.mode {
    Mode::Image => {
      let response = client.predict_image(&args.input)?;
      info!("检测到 {} 个物体", response.detections.len());
      for record in &response.detections {
        info!(
          "  - {} ({:.2}) [{:.1}, {:.1}, {:.1}, {:.1}]",
          record.class_id, record.confidence, record.x1, record.y1, record.x2, record.y2
        );
      }

      let bytes = std::fs::read(&args.input)
        .with_context(|| format!("无法读取输入文件: {}", args.input.display()))?;
      let annotated = render_detections(&bytes, &response)?;
      save_image(&annotated, &args.output)?;
    }
    Mode::Video => {
      let video = client.predict_video(&args.input)?;
      match video.frame_count {
        Some(count) => info!("收到标注视频: {} 帧, {}", count, video.content_type),
        None => warn!("响应中缺少帧数信息"),
      }
      std::fs::write(&args.output, &video.data)
        .with_context(|| format!("无法写入输出文件: {}", args.output.display()))?;
      info!("保存视频到文件: {}", args.output.display());
    }
  }

  Ok(())
}
