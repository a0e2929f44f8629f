// 该文件是 Tanjing （探镜） 项目的一部分。
// src/client.rs - 检测服务客户端
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

use std::{path::Path, time::Duration};

use reqwest::blocking::{Client, Response, multipart::Form};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  frame::RgbNhwcFrame,
  input::{DecodeError, decode_image},
  model::{DetectItem, DetectResult},
  output::draw::Draw,
  service::{DetectionsResponse, ErrorResponse, FRAME_COUNT_HEADER},
};

const CLIENT_BOX_COLOR: [u8; 3] = [255, 0, 0]; // 红色
const CLIENT_BOX_THICKNESS: u32 = 3;

#[derive(Error, Debug)]
pub enum ClientError {
  #[error("HTTP 错误: {0}")]
  Http(#[from] reqwest::Error),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("服务地址错误: {0}")]
  Url(#[from] url::ParseError),
  #[error("服务拒绝请求 ({status}): {message}")]
  Rejected { status: u16, message: String },
  #[error("本地图像解码失败: {0}")]
  Decode(#[from] DecodeError),
  #[error("字体加载失败: {0}")]
  Font(#[from] ab_glyph::InvalidFont),
}

/// 服务返回的标注视频
#[derive(Debug, Clone)]
pub struct AnnotatedVideo {
  pub data: Vec<u8>,
  pub content_type: String,
  pub frame_count: Option<usize>,
}

pub struct DetectionClient {
  base: Url,
  http: Client,
}

impl DetectionClient {
  pub fn new(base: Url, timeout: Duration) -> Result<Self, ClientError> {
    let http = Client::builder().timeout(timeout).build()?;
    Ok(Self { base, http })
  }

  pub fn predict_image(&self, path: &Path) -> Result<DetectionsResponse, ClientError> {
    let response = self.submit("predict/image/", path)?;
    Ok(response.json()?)
  }

  pub fn predict_video(&self, path: &Path) -> Result<AnnotatedVideo, ClientError> {
    let response = self.submit("predict/video/", path)?;
    let content_type = response
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .unwrap_or("application/octet-stream")
      .to_string();
    let frame_count = response
      .headers()
      .get(FRAME_COUNT_HEADER)
      .and_then(|v| v.to_str().ok())
      .and_then(|v| v.parse().ok());
    let data = response.bytes()?.to_vec();

    Ok(AnnotatedVideo {
      data,
      content_type,
      frame_count,
    })
  }

  fn submit(&self, route: &str, path: &Path) -> Result<Response, ClientError> {
    let url = self.base.join(route)?;
    info!("上传 {} 到 {}", path.display(), url);

    let form = Form::new().file("file", path)?;
    let response = self.http.post(url).multipart(form).send()?;
    let status = response.status();
    debug!("服务响应: {}", status);

    if status.is_success() {
      return Ok(response);
    }

    let body = response.text().unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
      .map(|e| e.error)
      .unwrap_or(body);
    Err(ClientError::Rejected {
      status: status.as_u16(),
      message,
    })
  }
}

/// 在原图上绘制服务返回的检测结果
pub fn render_detections(
  image_bytes: &[u8],
  response: &DetectionsResponse,
) -> Result<RgbNhwcFrame, ClientError> {
  let frame = decode_image(image_bytes)?;
  let result: DetectResult = response.detections.iter().map(DetectItem::from).collect();
  let draw = Draw::new()?
    .color(CLIENT_BOX_COLOR)
    .thickness(CLIENT_BOX_THICKNESS);
  Ok(draw.draw_detection(&frame, &result))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::service::DetectionRecord;
  use image::{ImageFormat, Rgb, RgbImage};

  #[test]
  fn renders_red_boxes() {
    let mut bytes = std::io::Cursor::new(Vec::new());
    RgbImage::new(50, 50)
      .write_to(&mut bytes, ImageFormat::Png)
      .unwrap();
    let response = DetectionsResponse {
      detections: vec![DetectionRecord {
        x1: 10.0,
        y1: 30.0,
        x2: 40.0,
        y2: 45.0,
        confidence: 0.9,
        class_id: 2,
      }],
    };

    let frame = render_detections(bytes.get_ref(), &response).unwrap();
    let image = frame.to_rgb_image();
    assert_eq!(image.get_pixel(12, 40), &Rgb(CLIENT_BOX_COLOR));
    assert_eq!(image.get_pixel(13, 40), &Rgb([0, 0, 0]));
  }

  #[test]
  fn unreachable_server_is_an_error() {
    let client = DetectionClient::new(
      Url::parse("http://127.0.0.1:9/").unwrap(),
      Duration::from_secs(2),
    )
    .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.png");
    std::fs::write(&path, b"x").unwrap();
    assert!(client.predict_image(&path).is_err());
  }
}
