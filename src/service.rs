// 该文件是 Tanjing （探镜） 项目的一部分。
// src/service.rs - HTTP 检测服务
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

//! # 检测服务
//!
//! | 路由 | 说明 |
//! | --- | --- |
//! | `POST /predict/image/` | multipart 字段 `file`，返回 `{"detections": [...]}` |
//! | `POST /predict/video/` | multipart 字段 `file`，返回标注后的视频 |
//! | `GET /` | 上传页面 |
//! | `POST /` | multipart 字段 `file`，返回标注后的 JPEG |
//! | `GET /health` | `{"status": "ok"}` |
//!
//! 所有错误都以 `{"error": "..."}` 返回，单个请求的失败不会影响服务进程。

use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::{
  Router,
  extract::DefaultBodyLimit,
  routing::{get, post},
};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::{
  config::{ServerConfig, VideoCodecKind},
  input::VideoDecodeOptions,
  model::SharedDetector,
  output::draw::Draw,
  task::{CancelFlag, TaskError},
};

mod error;
pub use self::error::{ErrorResponse, ServiceError};

mod handlers;
pub use self::handlers::{DetectionRecord, DetectionsResponse, FRAME_COUNT_HEADER};

/// 请求之间共享的只读状态
#[derive(Clone)]
pub struct AppState {
  pub detector: SharedDetector,
  pub draw: Arc<Draw<'static>>,
  pub codec: VideoCodecKind,
  pub parallel_frames: usize,
  pub decode: VideoDecodeOptions,
  pub scratch_dir: PathBuf,
  pub request_timeout: Duration,
  pub max_upload_bytes: usize,
}

impl AppState {
  pub fn new(detector: SharedDetector, draw: Arc<Draw<'static>>, config: &ServerConfig) -> Self {
    Self {
      detector,
      draw,
      codec: config.video.codec,
      parallel_frames: config.video.parallel_frames,
      decode: config.decode_options(),
      scratch_dir: config.scratch_dir(),
      request_timeout: config.request_timeout(),
      max_upload_bytes: config.max_upload_bytes,
    }
  }
}

pub fn router(state: AppState) -> Router {
  let max_upload_bytes = state.max_upload_bytes;

  Router::new()
    .route("/", get(handlers::index).post(handlers::annotate_image))
    .route("/health", get(handlers::health))
    .route("/predict/image/", post(handlers::predict_image))
    .route("/predict/video/", post(handlers::predict_video))
    .layer(DefaultBodyLimit::max(max_upload_bytes))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// 在阻塞线程池中执行任务，超时后设置取消标记并返回 504
async fn run_job<T, F>(timeout: Duration, cancel: CancelFlag, job: F) -> Result<T, ServiceError>
where
  T: Send + 'static,
  F: FnOnce() -> Result<T, TaskError> + Send + 'static,
{
  let handle = tokio::task::spawn_blocking(job);

  match tokio::time::timeout(timeout, handle).await {
    Ok(Ok(result)) => result.map_err(ServiceError::from),
    Ok(Err(e)) => {
      error!("处理任务异常退出: {}", e);
      Err(ServiceError::Internal("处理任务异常退出".to_string()))
    }
    Err(_) => {
      warn!("处理超时 ({:?})，取消任务", timeout);
      cancel.cancel();
      Err(ServiceError::Timeout(timeout))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn panic_in_job_becomes_internal_error() {
    let err = run_job::<(), _>(Duration::from_secs(5), CancelFlag::default(), || {
      panic!("boom")
    })
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::Internal(_)));
  }

  #[tokio::test]
  async fn slow_job_times_out_and_is_cancelled() {
    let cancel = CancelFlag::default();
    let observed = cancel.clone();
    let err = run_job(Duration::from_millis(20), cancel, move || {
      std::thread::sleep(Duration::from_millis(200));
      Ok(())
    })
    .await
    .unwrap_err();

    assert!(matches!(err, ServiceError::Timeout(_)));
    assert!(observed.is_cancelled());
  }
}
