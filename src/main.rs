// 该文件是 Tanjing （探镜） 项目的一部分。
// src/main.rs - 检测服务入口
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

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use tanjing::{
  args::Args,
  init_tracing,
  model::load_model,
  output::draw::Draw,
  service::{AppState, router},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  init_tracing();

  let args = Args::parse();
  let config = args.load_config().context("配置无效")?;
  info!("Tanjing 探镜检测服务");
  info!("模型: {}", config.model);
  info!("视频后端: {:?}", config.video.codec);

  // 模型缺失时直接退出，不启动服务
  let detector = load_model(&config.model, &config.model_options()).map_err(|e| {
    error!("模型加载失败: {}", e);
    e
  })?;
  let draw = Draw::new().context("无法加载内嵌字体")?;

  let state = AppState::new(detector, Arc::new(draw), &config);
  let app = router(state);

  let listener = tokio::net::TcpListener::bind(config.listen)
    .await
    .with_context(|| format!("无法监听 {}", config.listen))?;
  info!("服务监听于 http://{}", config.listen);

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP 服务异常退出")?;

  info!("服务已退出");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    error!("无法监听中断信号: {}", e);
    std::future::pending::<()>().await;
  }
  info!("收到中断信号，准备退出...");
}
