// 该文件是 Tanjing （探镜） 项目的一部分。
// src/service/handlers.rs - 路由处理
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

use axum::{
  Json,
  extract::{
    Multipart, State,
    multipart::{MultipartError, MultipartRejection},
  },
  http::{HeaderName, HeaderValue, StatusCode, header},
  response::{Html, IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{AppState, ServiceError, run_job};
use crate::{
  input::{VideoInput, decode_image},
  model::{DetectItem, DetectResult},
  output::{VideoOutputWrapper, draw::Draw, encode_jpeg},
  task::{CancelFlag, ContinuousTask, OneShotTask, Task, detect_frame},
};

/// 视频响应中携带输出帧数的头部
pub const FRAME_COUNT_HEADER: &str = "x-frame-count";
const UPLOAD_FIELD: &str = "file";
static INDEX_PAGE: &str = include_str!("../../assets/index.html");

/// 单个检测结果的对外表示
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
  pub confidence: f32,
  #[serde(rename = "class")]
  pub class_id: u32,
}

impl From<&DetectItem> for DetectionRecord {
  fn from(item: &DetectItem) -> Self {
    Self {
      x1: item.bbox[0],
      y1: item.bbox[1],
      x2: item.bbox[2],
      y2: item.bbox[3],
      confidence: item.score,
      class_id: item.class_id,
    }
  }
}

impl From<&DetectionRecord> for DetectItem {
  fn from(record: &DetectionRecord) -> Self {
    Self {
      class_id: record.class_id,
      score: record.confidence,
      bbox: [record.x1, record.y1, record.x2, record.y2],
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionsResponse {
  pub detections: Vec<DetectionRecord>,
}

impl From<&DetectResult> for DetectionsResponse {
  fn from(result: &DetectResult) -> Self {
    Self {
      detections: result.iter().map(DetectionRecord::from).collect(),
    }
  }
}

fn multipart_error(e: MultipartError) -> ServiceError {
  if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
    ServiceError::PayloadTooLarge(e.body_text())
  } else {
    ServiceError::BadRequest(e.body_text())
  }
}

/// 读取 multipart 中的 `file` 字段，其余字段忽略
async fn read_upload(
  multipart: Result<Multipart, MultipartRejection>,
) -> Result<Vec<u8>, ServiceError> {
  let mut multipart = multipart.map_err(|e| ServiceError::BadRequest(e.body_text()))?;

  while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
    if field.name() != Some(UPLOAD_FIELD) {
      continue;
    }
    let file_name = field.file_name().unwrap_or("").to_string();
    let bytes = field.bytes().await.map_err(multipart_error)?;
    debug!("收到上传文件 '{}': {} 字节", file_name, bytes.len());
    return Ok(Vec::from(bytes));
  }

  Err(ServiceError::BadRequest(format!(
    "缺少 multipart 字段 '{}'",
    UPLOAD_FIELD
  )))
}

pub async fn predict_image(
  State(state): State<AppState>,
  multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DetectionsResponse>, ServiceError> {
  let bytes = read_upload(multipart).await?;
  let detector = state.detector.clone();

  let result = run_job(state.request_timeout, CancelFlag::default(), move || {
    let frame = decode_image(&bytes)?;
    let output = OneShotTask.run_task(frame, detector.as_ref(), None::<&Draw>)?;
    Ok(output.result)
  })
  .await?;

  info!("图像检测完成: {} 个物体", result.len());
  Ok(Json(DetectionsResponse::from(&result)))
}

pub async fn predict_video(
  State(state): State<AppState>,
  multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ServiceError> {
  let bytes = read_upload(multipart).await?;
  let cancel = CancelFlag::default();
  let job_cancel = cancel.clone();

  let encoded = run_job(state.request_timeout, cancel, move || {
    let input = VideoInput::open(state.codec, bytes, &state.decode)?;
    let output = VideoOutputWrapper::open(state.codec, &state.scratch_dir, &input.info())?;
    ContinuousTask::new(state.draw.as_ref())
      .with_parallel_frames(state.parallel_frames)
      .with_cancel_flag(job_cancel)
      .run_task(input, state.detector.as_ref(), output)
  })
  .await?;

  info!(
    "视频标注完成: {} 帧, {} 字节",
    encoded.frame_count,
    encoded.data.len()
  );
  let headers = [
    (
      header::CONTENT_TYPE,
      HeaderValue::from_static(encoded.content_type),
    ),
    (
      HeaderName::from_static(FRAME_COUNT_HEADER),
      HeaderValue::from(encoded.frame_count),
    ),
  ];
  Ok((headers, encoded.data).into_response())
}

pub async fn index() -> Html<&'static str> {
  Html(INDEX_PAGE)
}

pub async fn annotate_image(
  State(state): State<AppState>,
  multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ServiceError> {
  let bytes = read_upload(multipart).await?;

  let jpeg = run_job(state.request_timeout, CancelFlag::default(), move || {
    let frame = decode_image(&bytes)?;
    let result = detect_frame(state.detector.as_ref(), &frame)?;
    let annotated = state.draw.draw_detection(&frame, &result);
    Ok(encode_jpeg(&annotated)?)
  })
  .await?;

  Ok(([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response())
}

pub async fn health() -> Json<serde_json::Value> {
  Json(serde_json::json!({ "status": "ok" }))
}
