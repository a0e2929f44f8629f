// 该文件是 Tanjing （探镜） 项目的一部分。
// tests/api.rs - HTTP 接口测试
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

use std::{io::Cursor, sync::Arc};

use axum::{
  Router,
  body::Body,
  http::{Request, Response, StatusCode, header},
};
use http_body_util::BodyExt;
use image::{AnimationDecoder, ImageFormat, RgbImage, codecs::gif::GifDecoder};
use tempfile::TempDir;
use tower::ServiceExt;

use tanjing::{
  config::{ServerConfig, VideoCodecKind},
  frame::RgbNhwcFrame,
  model::{DetectItem, DetectResult, Model, ModelError},
  output::{GifVideoOutput, VideoEncoder, draw::Draw},
  service::{AppState, DetectionsResponse, ErrorResponse, FRAME_COUNT_HEADER, router},
};

const BOUNDARY: &str = "tanjing-test-boundary";

/// 返回固定检测结果的检测器
struct FixedDetector(Vec<DetectItem>);

impl Model for FixedDetector {
  type Input = RgbNhwcFrame;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, _: &RgbNhwcFrame) -> Result<DetectResult, ModelError> {
    Ok(self.0.iter().copied().collect())
  }
}

struct TestApp {
  router: Router,
  scratch: TempDir,
}

fn app_with(items: Vec<DetectItem>, max_upload_bytes: usize) -> TestApp {
  let scratch = tempfile::tempdir().unwrap();
  let mut config = ServerConfig {
    scratch_dir: Some(scratch.path().to_path_buf()),
    max_upload_bytes,
    ..Default::default()
  };
  config.video.codec = VideoCodecKind::Gif;
  config.validate().unwrap();

  let state = AppState::new(
    Arc::new(FixedDetector(items)),
    Arc::new(Draw::new().unwrap()),
    &config,
  );
  TestApp {
    router: router(state),
    scratch,
  }
}

fn app() -> TestApp {
  app_with(Vec::new(), 16 * 1024 * 1024)
}

fn multipart(uri: &str, field: &str, bytes: &[u8]) -> Request<Body> {
  let mut body = format!(
    "--{BOUNDARY}\r\n\
     Content-Disposition: form-data; name=\"{field}\"; filename=\"upload.bin\"\r\n\
     Content-Type: application/octet-stream\r\n\r\n"
  )
  .into_bytes();
  body.extend_from_slice(bytes);
  body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

  Request::post(uri)
    .header(
      header::CONTENT_TYPE,
      format!("multipart/form-data; boundary={BOUNDARY}"),
    )
    .body(Body::from(body))
    .unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Response<Body>) {
  let response = router.clone().oneshot(request).await.unwrap();
  (response.status(), response)
}

async fn body_bytes(response: Response<Body>) -> Vec<u8> {
  response
    .into_body()
    .collect()
    .await
    .unwrap()
    .to_bytes()
    .to_vec()
}

async fn error_message(response: Response<Body>) -> String {
  let error: ErrorResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
  error.error
}

fn png(width: u32, height: u32) -> Vec<u8> {
  let mut bytes = Cursor::new(Vec::new());
  RgbImage::new(width, height)
    .write_to(&mut bytes, ImageFormat::Png)
    .unwrap();
  bytes.into_inner()
}

fn gif(shades: &[u8], scratch: &std::path::Path) -> Vec<u8> {
  let mut output = GifVideoOutput::new(scratch, 16, 16, 10.0).unwrap();
  for &shade in shades {
    let mut frame = RgbNhwcFrame::with_shape(16, 16);
    frame.as_mut().fill(shade);
    output.write_frame(&frame).unwrap();
  }
  output.finish().unwrap().data
}

fn scratch_is_empty(app: &TestApp) -> bool {
  std::fs::read_dir(app.scratch.path()).unwrap().next().is_none()
}

#[tokio::test]
async fn health_reports_ok() {
  let app = app();
  let (status, response) = send(
    &app.router,
    Request::get("/health").body(Body::empty()).unwrap(),
  )
  .await;

  assert_eq!(status, StatusCode::OK);
  let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
  assert_eq!(body, serde_json::json!({ "status": "ok" }));
}

#[tokio::test]
async fn index_serves_upload_form() {
  let app = app();
  let (status, response) = send(&app.router, Request::get("/").body(Body::empty()).unwrap()).await;

  assert_eq!(status, StatusCode::OK);
  let page = String::from_utf8(body_bytes(response).await).unwrap();
  assert!(page.contains("multipart/form-data"));
  assert!(page.contains("name=\"file\""));
}

#[tokio::test]
async fn blank_image_has_no_detections() {
  let app = app();
  let (status, response) = send(&app.router, multipart("/predict/image/", "file", &png(10, 10))).await;

  assert_eq!(status, StatusCode::OK);
  let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
  assert_eq!(body, serde_json::json!({ "detections": [] }));
}

#[tokio::test]
async fn detections_stay_inside_the_image() {
  let app = app_with(
    vec![
      DetectItem {
        class_id: 3,
        score: 0.8,
        bbox: [-5.0, 2.0, 500.0, 30.0],
      },
      DetectItem {
        class_id: 1,
        score: 0.6,
        bbox: [100.0, 100.0, 200.0, 200.0],
      },
    ],
    16 * 1024 * 1024,
  );
  let (status, response) = send(&app.router, multipart("/predict/image/", "file", &png(40, 20))).await;

  assert_eq!(status, StatusCode::OK);
  let body: DetectionsResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
  assert_eq!(body.detections.len(), 1);
  for d in &body.detections {
    assert!(0.0 <= d.x1 && d.x1 < d.x2 && d.x2 <= 40.0);
    assert!(0.0 <= d.y1 && d.y1 < d.y2 && d.y2 <= 20.0);
    assert!((0.0..=1.0).contains(&d.confidence));
  }
  assert_eq!(body.detections[0].class_id, 3);
}

#[tokio::test]
async fn corrupt_image_fails_without_poisoning_the_service() {
  let app = app();
  let mut truncated = png(10, 10);
  truncated.truncate(20);

  let (status, response) = send(&app.router, multipart("/predict/image/", "file", &truncated)).await;
  assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
  assert!(!error_message(response).await.is_empty());

  let (status, _) = send(&app.router, multipart("/predict/image/", "file", &png(10, 10))).await;
  assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn missing_file_field_is_a_bad_request() {
  let app = app();
  let (status, response) = send(&app.router, multipart("/predict/image/", "image", &png(10, 10))).await;

  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(error_message(response).await.contains("file"));
}

#[tokio::test]
async fn non_multipart_request_is_a_bad_request() {
  let app = app();
  let request = Request::post("/predict/image/")
    .header(header::CONTENT_TYPE, "application/json")
    .body(Body::from("{}"))
    .unwrap();
  let (status, response) = send(&app.router, request).await;

  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(!error_message(response).await.is_empty());
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
  let app = app_with(Vec::new(), 1024);
  let (status, response) = send(
    &app.router,
    multipart("/predict/image/", "file", &vec![0u8; 8 * 1024]),
  )
  .await;

  assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
  assert!(!error_message(response).await.is_empty());
}

#[tokio::test]
async fn video_keeps_frame_count_and_order() {
  let app = app();
  let shades = [0u8, 80, 160, 240];
  let upload = gif(&shades, app.scratch.path());

  let (status, response) = send(&app.router, multipart("/predict/video/", "file", &upload)).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(response.headers()[header::CONTENT_TYPE], "image/gif");
  assert_eq!(response.headers()[FRAME_COUNT_HEADER], "4");

  let data = body_bytes(response).await;
  let frames = GifDecoder::new(Cursor::new(data))
    .unwrap()
    .into_frames()
    .collect_frames()
    .unwrap();
  assert_eq!(frames.len(), shades.len());

  let firsts: Vec<u8> = frames.iter().map(|f| f.buffer().get_pixel(8, 8)[0]).collect();
  assert!(firsts.windows(2).all(|w| w[0] < w[1]), "{firsts:?}");
  assert!(scratch_is_empty(&app));
}

#[tokio::test]
async fn garbage_video_is_an_error() {
  let app = app();
  let (status, response) = send(
    &app.router,
    multipart("/predict/video/", "file", b"definitely not a video"),
  )
  .await;

  assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
  assert!(!error_message(response).await.is_empty());
  assert!(scratch_is_empty(&app));
}

#[tokio::test]
async fn oversized_gif_canvas_fails_without_killing_the_service() {
  // 声明 65535x65535 画布、只含一个 1x1 帧
  let hostile: [u8; 35] = [
    b'G', b'I', b'F', b'8', b'9', b'a', 0xFF, 0xFF, 0xFF, 0xFF, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xFF, 0xFF, 0xFF, 0x2C, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02,
    0x02, 0x44, 0x01, 0x00, 0x3B,
  ];
  let app = app();

  let (status, response) = send(&app.router, multipart("/predict/video/", "file", &hostile)).await;
  assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
  assert!(!error_message(response).await.is_empty());

  let upload = gif(&[10, 20], app.scratch.path());
  let (status, _) = send(&app.router, multipart("/predict/video/", "file", &upload)).await;
  assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn annotate_returns_jpeg() {
  let app = app_with(
    vec![DetectItem {
      class_id: 0,
      score: 0.9,
      bbox: [4.0, 4.0, 60.0, 60.0],
    }],
    16 * 1024 * 1024,
  );
  let (status, response) = send(&app.router, multipart("/", "file", &png(64, 64))).await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
  let data = body_bytes(response).await;
  let decoded = image::load_from_memory_with_format(&data, ImageFormat::Jpeg).unwrap();
  assert_eq!((decoded.width(), decoded.height()), (64, 64));
}
