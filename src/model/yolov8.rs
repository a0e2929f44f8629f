// 该文件是 Tanjing （探镜） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 ONNX 模型
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

use image::imageops::{self, FilterType};
use thiserror::Error;
use tracing::{debug, error, info};
use tract_onnx::prelude::*;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{RGB_CHANNELS, RgbNhwcFrame},
  model::{DetectItem, DetectResult, Model, ModelError, nms::non_max_suppression},
};

const YOLOV8_BOX_CHANNELS: usize = 4;
const YOLOV8_PAD_VALUE: f32 = 114.0 / 255.0;

#[derive(Error, Debug)]
pub enum Yolov8Error {
  #[error("模型文件不存在: {}", .0.display())]
  ModelUnavailable(PathBuf),
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型输出无效: {0}")]
  ModelInvalid(String),
  #[error("Tract 错误: {0:#}")]
  TractError(#[from] TractError),
}

impl From<Yolov8Error> for ModelError {
  fn from(err: Yolov8Error) -> Self {
    match err {
      Yolov8Error::ModelUnavailable(path) => ModelError::Unavailable(path),
      Yolov8Error::ModelInvalid(msg) => ModelError::Inference(msg),
      other => ModelError::Load(other.to_string()),
    }
  }
}

pub struct Yolov8Builder {
  model_path: PathBuf,
  confidence: f32,
  iou_threshold: f32,
  input_size: u32,
}

impl FromUrlWithScheme for Yolov8Builder {
  const SCHEME: &'static str = "yolov8";
}

impl FromUrl for Yolov8Builder {
  type Error = Yolov8Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(Yolov8Error::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }
    if url.path().is_empty() || url.path() == "/" {
      return Err(Yolov8Error::ModelPathError("缺少模型文件路径".to_string()));
    }

    Ok(Yolov8Builder {
      model_path: PathBuf::from(url.path()),
      confidence: 0.25,
      iou_threshold: 0.7,
      input_size: 640,
    })
  }
}

impl Yolov8Builder {
  pub fn confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence;
    self
  }

  pub fn iou_threshold(mut self, iou_threshold: f32) -> Self {
    self.iou_threshold = iou_threshold;
    self
  }

  pub fn input_size(mut self, input_size: u32) -> Self {
    self.input_size = input_size;
    self
  }

  pub fn build(self) -> Result<Yolov8, Yolov8Error> {
    if !self.model_path.is_file() {
      error!("模型文件不存在: {}", self.model_path.display());
      return Err(Yolov8Error::ModelUnavailable(self.model_path));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let model_size = std::fs::metadata(&self.model_path)?.len();
    debug!(
      "模型文件大小: {:.2} MB",
      model_size as f64 / (1024.0 * 1024.0)
    );

    let side = self.input_size as usize;
    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(f32::datum_type(), tvec!(1, RGB_CHANNELS, side, side)),
      )?
      .into_optimized()?
      .into_runnable()?;
    info!(
      "模型加载完成，输入尺寸 {}x{}，置信度阈值 {}，NMS 阈值 {}",
      side, side, self.confidence, self.iou_threshold
    );

    Ok(Yolov8 {
      plan,
      confidence: self.confidence,
      iou_threshold: self.iou_threshold,
      input_size: self.input_size,
    })
  }
}

pub struct Yolov8 {
  plan: TypedRunnableModel<TypedModel>,
  confidence: f32,
  iou_threshold: f32,
  input_size: u32,
}

/// 等比缩放并居中填充后的几何参数，用于把检测框映射回原图
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
  ratio: f32,
  pad_x: f32,
  pad_y: f32,
}

impl Letterbox {
  fn new(width: u32, height: u32, side: u32) -> (Self, u32, u32) {
    let ratio = (side as f32 / width as f32).min(side as f32 / height as f32);
    let new_w = ((width as f32 * ratio).round() as u32).clamp(1, side);
    let new_h = ((height as f32 * ratio).round() as u32).clamp(1, side);
    let letterbox = Letterbox {
      ratio,
      pad_x: ((side - new_w) / 2) as f32,
      pad_y: ((side - new_h) / 2) as f32,
    };
    (letterbox, new_w, new_h)
  }

  fn restore(&self, cx: f32, cy: f32, w: f32, h: f32) -> [f32; 4] {
    [
      (cx - w / 2.0 - self.pad_x) / self.ratio,
      (cy - h / 2.0 - self.pad_y) / self.ratio,
      (cx + w / 2.0 - self.pad_x) / self.ratio,
      (cy + h / 2.0 - self.pad_y) / self.ratio,
    ]
  }
}

impl Yolov8 {
  fn preprocess(&self, frame: &RgbNhwcFrame) -> (Tensor, Letterbox) {
    let side = self.input_size;
    let (letterbox, new_w, new_h) = Letterbox::new(frame.width(), frame.height(), side);
    let resized = imageops::resize(&frame.to_rgb_image(), new_w, new_h, FilterType::Triangle);

    let side = side as usize;
    let (pad_x, pad_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    let mut input =
      tract_ndarray::Array4::<f32>::from_elem((1, RGB_CHANNELS, side, side), YOLOV8_PAD_VALUE);
    for (x, y, pixel) in resized.enumerate_pixels() {
      for c in 0..RGB_CHANNELS {
        input[[0, c, y as usize + pad_y, x as usize + pad_x]] = pixel[c] as f32 / 255.0;
      }
    }

    (input.into_tensor(), letterbox)
  }
}

/// 解析 `[1, 4 + nc, anchors]` 输出（兼容转置的 `[1, anchors, 4 + nc]`）
fn decode_output(
  output: tract_ndarray::ArrayViewD<'_, f32>,
  letterbox: &Letterbox,
  confidence: f32,
  iou_threshold: f32,
) -> Result<Vec<DetectItem>, Yolov8Error> {
  let output = output
    .into_dimensionality::<tract_ndarray::Ix3>()
    .map_err(|e| Yolov8Error::ModelInvalid(format!("输出维度错误: {}", e)))?;
  let (batch, dim1, dim2) = output.dim();
  if batch != 1 {
    return Err(Yolov8Error::ModelInvalid(format!("批大小应为 1, 实际为 {}", batch)));
  }

  let transposed = dim1 > dim2;
  let (channels, anchors) = if transposed { (dim2, dim1) } else { (dim1, dim2) };
  if channels <= YOLOV8_BOX_CHANNELS {
    return Err(Yolov8Error::ModelInvalid(format!(
      "输出通道数 {} 不足以包含类别分数",
      channels
    )));
  }
  let value = |c: usize, a: usize| {
    if transposed {
      output[[0, a, c]]
    } else {
      output[[0, c, a]]
    }
  };

  let mut items = Vec::new();
  for a in 0..anchors {
    let (class_id, score) = (YOLOV8_BOX_CHANNELS..channels)
      .map(|c| (c - YOLOV8_BOX_CHANNELS, value(c, a)))
      .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

    if score < confidence {
      continue;
    }

    items.push(DetectItem {
      class_id: class_id as u32,
      score,
      bbox: letterbox.restore(value(0, a), value(1, a), value(2, a), value(3, a)),
    });
  }

  non_max_suppression(&mut items, iou_threshold);
  Ok(items)
}

impl Model for Yolov8 {
  type Input = RgbNhwcFrame;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let (tensor, letterbox) = self.preprocess(input);

    debug!("执行模型推理");
    let outputs = self
      .plan
      .run(tvec!(tensor.into()))
      .map_err(|e| ModelError::Inference(format!("{:#}", e)))?;
    let output = outputs
      .first()
      .ok_or_else(|| ModelError::Inference("模型没有输出".to_string()))?;
    let view = output
      .to_array_view::<f32>()
      .map_err(|e| ModelError::Inference(format!("模型输出不是 f32 张量: {:#}", e)))?;

    let items = decode_output(view, &letterbox, self.confidence, self.iou_threshold)?;
    debug!("检测到 {} 个物体", items.len());

    Ok(
      items
        .into_iter()
        .collect::<DetectResult>()
        .sanitize(input.width(), input.height()),
    )
  }
}
