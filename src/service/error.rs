// 该文件是 Tanjing （探镜） 项目的一部分。
// src/service/error.rs - 服务错误与响应
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

use std::time::Duration;

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use crate::task::TaskError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
  pub error: String,
}

#[derive(Error, Debug)]
pub enum ServiceError {
  #[error("请求格式错误: {0}")]
  BadRequest(String),
  #[error("上传文件过大: {0}")]
  PayloadTooLarge(String),
  #[error("{0}")]
  Task(#[from] TaskError),
  #[error("处理超时 ({0:?})")]
  Timeout(Duration),
  #[error("内部错误: {0}")]
  Internal(String),
}

impl ServiceError {
  pub fn status(&self) -> StatusCode {
    match self {
      ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ServiceError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
      ServiceError::Task(_) | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
      ServiceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
    }
  }
}

impl IntoResponse for ServiceError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      error!("请求失败 ({}): {}", status, self);
    } else {
      warn!("请求被拒绝 ({}): {}", status, self);
    }

    let body = ErrorResponse {
      error: self.to_string(),
    };
    (status, Json(body)).into_response()
  }
}
