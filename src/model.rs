// 该文件是 Tanjing （探镜） 项目的一部分。
// src/model.rs - 模型
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
use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::frame::RgbNhwcFrame;

pub mod nms;

#[cfg(feature = "model_yolov8")]
mod yolov8;
#[cfg(feature = "model_yolov8")]
pub use self::yolov8::{Yolov8, Yolov8Builder, Yolov8Error};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 服务内共享的检测器，初始化后只读，可被多个请求并发调用
pub type Detector =
  dyn Model<Input = RgbNhwcFrame, Output = DetectResult, Error = ModelError> + Send + Sync;
pub type SharedDetector = Arc<Detector>;

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型文件不存在: {}", .0.display())]
  Unavailable(PathBuf),
  #[error("模型加载错误: {0}")]
  Load(String),
  #[error("推理失败: {0}")]
  Inference(String),
  #[error("不支持的模型方案: {0}")]
  SchemeMismatch(String),
}

impl ModelError {
  pub fn is_unavailable(&self) -> bool {
    matches!(self, ModelError::Unavailable(_))
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，像素坐标
}

impl DetectItem {
  /// 将检测框裁剪到帧范围内，退化或非有限的结果返回 `None`
  pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
    if !self.score.is_finite() || self.bbox.iter().any(|v| !v.is_finite()) {
      return None;
    }

    let (w, h) = (width as f32, height as f32);
    let x_min = self.bbox[0].clamp(0.0, w);
    let y_min = self.bbox[1].clamp(0.0, h);
    let x_max = self.bbox[2].clamp(0.0, w);
    let y_max = self.bbox[3].clamp(0.0, h);

    if x_min >= x_max || y_min >= y_max {
      return None;
    }

    Some(Self {
      class_id: self.class_id,
      score: self.score.clamp(0.0, 1.0),
      bbox: [x_min, y_min, x_max, y_max],
    })
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, DetectItem> {
    self.items.iter()
  }

  /// 保证所有检测框都落在 `width x height` 的帧内
  pub fn sanitize(self, width: u32, height: u32) -> Self {
    self
      .items
      .iter()
      .filter_map(|item| item.clamp_to(width, height))
      .collect()
  }
}

impl FromIterator<DetectItem> for DetectResult {
  fn from_iter<I: IntoIterator<Item = DetectItem>>(iter: I) -> Self {
    Self {
      items: iter.into_iter().collect(),
    }
  }
}

/// 检测器参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelOptions {
  pub confidence: f32,
  pub iou_threshold: f32,
  pub input_size: u32,
}

impl Default for ModelOptions {
  fn default() -> Self {
    Self {
      confidence: 0.25,
      iou_threshold: 0.7,
      input_size: 640,
    }
  }
}

/// 按 URL 方案加载检测器，例如 `yolov8:///app/models/yolov8n.onnx`
pub fn load_model(url: &Url, options: &ModelOptions) -> Result<SharedDetector, ModelError> {
  info!("加载检测器: {}", url);

  #[cfg(feature = "model_yolov8")]
  {
    use crate::{FromUrl, FromUrlWithScheme};

    if url.scheme() == Yolov8Builder::SCHEME {
      let model = Yolov8Builder::from_url(url)?
        .confidence(options.confidence)
        .iou_threshold(options.iou_threshold)
        .input_size(options.input_size)
        .build()?;
      return Ok(Arc::new(model));
    }
  }

  let _ = options;
  Err(ModelError::SchemeMismatch(url.scheme().to_string()))
}
