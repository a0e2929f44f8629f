// 该文件是 Tanjing （探镜） 项目的一部分。
// src/task.rs - 检测任务
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

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Instant,
};

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  frame::RgbNhwcFrame,
  input::DecodeError,
  model::{DetectResult, Model, ModelError},
  output::{EncodeError, EncodedVideo, VideoEncoder, draw::Draw},
};

pub trait Task<I, M: ?Sized, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: &M, output: O) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("解码失败: {0}")]
  Decode(#[from] DecodeError),
  #[error("检测失败: {0}")]
  Model(#[from] ModelError),
  #[error("编码失败: {0}")]
  Encode(#[from] EncodeError),
  #[error("任务已取消")]
  Cancelled,
  #[error("输出帧数 {actual} 与输入帧数 {expected} 不一致")]
  FrameCountMismatch { expected: usize, actual: usize },
}

/// 请求级的取消标记，超时后由服务端设置，处理循环在帧之间检查
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
  pub fn cancel(&self) {
    self.0.store(true, Ordering::Relaxed);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::Relaxed)
  }

  fn check(&self) -> Result<(), TaskError> {
    if self.is_cancelled() {
      return Err(TaskError::Cancelled);
    }
    Ok(())
  }
}

/// 单帧检测，结果裁剪到帧范围内
pub fn detect_frame<M>(model: &M, frame: &RgbNhwcFrame) -> Result<DetectResult, ModelError>
where
  M: Model<Input = RgbNhwcFrame, Output = DetectResult, Error = ModelError> + ?Sized,
{
  Ok(model.infer(frame)?.sanitize(frame.width(), frame.height()))
}

pub struct OneShotOutput {
  pub result: DetectResult,
  pub annotated: Option<RgbNhwcFrame>,
}

/// 单张图像检测，给定绘制上下文时同时产出标注图
pub struct OneShotTask;

impl<'a, 'f, M> Task<RgbNhwcFrame, M, Option<&'a Draw<'f>>> for OneShotTask
where
  M: Model<Input = RgbNhwcFrame, Output = DetectResult, Error = ModelError> + ?Sized,
{
  type Output = OneShotOutput;
  type Error = TaskError;

  fn run_task(
    self,
    frame: RgbNhwcFrame,
    model: &M,
    draw: Option<&'a Draw<'f>>,
  ) -> Result<Self::Output, Self::Error> {
    debug!("开始单帧检测: {}x{}", frame.width(), frame.height());
    let now = Instant::now();
    let result = detect_frame(model, &frame)?;
    info!("推理完成，检测到 {} 个物体，耗时: {:.2?}", result.len(), now.elapsed());

    let annotated = draw.map(|draw| draw.draw_detection(&frame, &result));
    Ok(OneShotOutput { result, annotated })
  }
}

/// 逐帧检测并标注视频，按批并行推理，输出顺序与输入一致
pub struct ContinuousTask<'a, 'f> {
  draw: &'a Draw<'f>,
  parallel_frames: usize,
  cancel: CancelFlag,
}

impl<'a, 'f> ContinuousTask<'a, 'f> {
  pub fn new(draw: &'a Draw<'f>) -> Self {
    Self {
      draw,
      parallel_frames: 1,
      cancel: CancelFlag::default(),
    }
  }

  pub fn with_parallel_frames(mut self, parallel_frames: usize) -> Self {
    self.parallel_frames = parallel_frames.max(1);
    self
  }

  pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
    self.cancel = cancel;
    self
  }
}

impl<'a, 'f, I, M, O> Task<I, M, O> for ContinuousTask<'a, 'f>
where
  I: Iterator<Item = Result<RgbNhwcFrame, DecodeError>>,
  M: Model<Input = RgbNhwcFrame, Output = DetectResult, Error = ModelError> + Sync + ?Sized,
  O: VideoEncoder,
{
  type Output = EncodedVideo;
  type Error = TaskError;

  fn run_task(self, mut input: I, model: &M, mut output: O) -> Result<Self::Output, Self::Error> {
    info!("开始视频任务，每批 {} 帧", self.parallel_frames);
    let started = Instant::now();
    let mut decoded = 0usize;
    let mut batch = Vec::with_capacity(self.parallel_frames);

    loop {
      self.cancel.check()?;

      batch.clear();
      for frame in input.by_ref().take(self.parallel_frames) {
        batch.push(frame?);
      }
      if batch.is_empty() {
        break;
      }

      let now = Instant::now();
      let annotated = batch
        .par_iter()
        .map(|frame| -> Result<RgbNhwcFrame, TaskError> {
          self.cancel.check()?;
          let result = detect_frame(model, frame)?;
          Ok(self.draw.draw_detection(frame, &result))
        })
        .collect::<Result<Vec<_>, TaskError>>()?;

      for frame in &annotated {
        output.write_frame(frame)?;
      }
      decoded += batch.len();
      debug!("已处理 {} 帧，本批耗时: {:.2?}", decoded, now.elapsed());
    }

    if decoded == 0 {
      warn!("视频中没有帧");
      return Err(DecodeError::EmptyVideo.into());
    }

    let encoded = output.finish()?;
    if encoded.frame_count != decoded {
      return Err(TaskError::FrameCountMismatch {
        expected: decoded,
        actual: encoded.frame_count,
      });
    }

    info!(
      "视频任务完成: {} 帧，耗时: {:.2?}",
      decoded,
      started.elapsed()
    );
    Ok(encoded)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;
  use std::sync::atomic::AtomicUsize;

  /// 把帧的首个像素值编码进置信度，便于检查顺序
  struct ShadeDetector {
    calls: AtomicUsize,
  }

  impl Model for ShadeDetector {
    type Input = RgbNhwcFrame;
    type Output = DetectResult;
    type Error = ModelError;

    fn infer(&self, input: &RgbNhwcFrame) -> Result<DetectResult, ModelError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(DetectResult::from_iter([DetectItem {
        class_id: 0,
        score: input.as_nhwc()[0] as f32 / 255.0,
        bbox: [-10.0, 1.0, 1000.0, 3.0],
      }]))
    }
  }

  struct FailingDetector;

  impl Model for FailingDetector {
    type Input = RgbNhwcFrame;
    type Output = DetectResult;
    type Error = ModelError;

    fn infer(&self, _: &RgbNhwcFrame) -> Result<DetectResult, ModelError> {
      Err(ModelError::Inference("boom".to_string()))
    }
  }

  /// 只记录写入帧的编码器
  #[derive(Default)]
  struct CollectEncoder {
    frames: Vec<RgbNhwcFrame>,
    drop_last: bool,
  }

  impl VideoEncoder for CollectEncoder {
    fn write_frame(&mut self, frame: &RgbNhwcFrame) -> Result<(), EncodeError> {
      self.frames.push(frame.clone());
      Ok(())
    }

    fn finish(self) -> Result<EncodedVideo, EncodeError> {
      let frame_count = self.frames.len() - usize::from(self.drop_last);
      Ok(EncodedVideo {
        data: self.frames.iter().map(|f| f.as_nhwc()[0]).collect(),
        content_type: "application/octet-stream",
        frame_count,
      })
    }
  }

  fn shaded_frames(count: u8) -> Vec<Result<RgbNhwcFrame, DecodeError>> {
    (0..count)
      .map(|i| {
        let mut frame = RgbNhwcFrame::with_shape(20, 20);
        frame.as_mut().fill(i * 10);
        Ok(frame)
      })
      .collect()
  }

  #[test]
  fn detections_are_clamped_to_frame() {
    let model = ShadeDetector {
      calls: AtomicUsize::new(0),
    };
    let result = detect_frame(&model, &RgbNhwcFrame::with_shape(10, 20)).unwrap();
    assert_eq!(result.items[0].bbox, [0.0, 1.0, 20.0, 3.0]);
  }

  #[test]
  fn one_shot_without_draw_returns_only_detections() {
    let model = ShadeDetector {
      calls: AtomicUsize::new(0),
    };
    let output = OneShotTask
      .run_task(RgbNhwcFrame::with_shape(4, 4), &model, None::<&Draw>)
      .unwrap();
    assert_eq!(output.result.len(), 1);
    assert!(output.annotated.is_none());
  }

  #[test]
  fn video_preserves_count_and_order() {
    let draw = Draw::new().unwrap();
    let model = ShadeDetector {
      calls: AtomicUsize::new(0),
    };
    let encoded = ContinuousTask::new(&draw)
      .with_parallel_frames(3)
      .run_task(
        shaded_frames(7).into_iter(),
        &model,
        CollectEncoder::default(),
      )
      .unwrap();

    assert_eq!(encoded.frame_count, 7);
    assert_eq!(model.calls.load(Ordering::SeqCst), 7);
    // 检测框从第 1 行开始，左上角像素保留原值
    let expected: Vec<u8> = (0..7).map(|i| i * 10).collect();
    assert_eq!(encoded.data, expected);
  }

  #[test]
  fn empty_video_is_a_decode_error() {
    let draw = Draw::new().unwrap();
    let model = ShadeDetector {
      calls: AtomicUsize::new(0),
    };
    let err = ContinuousTask::new(&draw)
      .run_task(
        std::iter::empty(),
        &model,
        CollectEncoder::default(),
      )
      .unwrap_err();
    assert!(matches!(err, TaskError::Decode(DecodeError::EmptyVideo)));
  }

  #[test]
  fn detector_failure_aborts_video() {
    let draw = Draw::new().unwrap();
    let err = ContinuousTask::new(&draw)
      .run_task(
        shaded_frames(3).into_iter(),
        &FailingDetector,
        CollectEncoder::default(),
      )
      .unwrap_err();
    assert!(matches!(err, TaskError::Model(_)));
  }

  #[test]
  fn cancelled_task_stops_before_processing() {
    let draw = Draw::new().unwrap();
    let model = ShadeDetector {
      calls: AtomicUsize::new(0),
    };
    let cancel = CancelFlag::default();
    cancel.cancel();
    let err = ContinuousTask::new(&draw)
      .with_cancel_flag(cancel)
      .run_task(
        shaded_frames(3).into_iter(),
        &model,
        CollectEncoder::default(),
      )
      .unwrap_err();
    assert!(matches!(err, TaskError::Cancelled));
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn frame_count_mismatch_is_reported() {
    let draw = Draw::new().unwrap();
    let model = ShadeDetector {
      calls: AtomicUsize::new(0),
    };
    let err = ContinuousTask::new(&draw)
      .run_task(
        shaded_frames(2).into_iter(),
        &model,
        CollectEncoder {
          drop_last: true,
          ..Default::default()
        },
      )
      .unwrap_err();
    assert!(matches!(
      err,
      TaskError::FrameCountMismatch {
        expected: 2,
        actual: 1
      }
    ));
  }

  #[test]
  fn decode_error_mid_stream_fails_the_task() {
    let draw = Draw::new().unwrap();
    let model = ShadeDetector {
      calls: AtomicUsize::new(0),
    };
    let mut frames = shaded_frames(2);
    frames.push(Err(DecodeError::Timeout(std::time::Duration::from_secs(1))));
    let err = ContinuousTask::new(&draw)
      .run_task(frames.into_iter(), &model, CollectEncoder::default())
      .unwrap_err();
    assert!(matches!(err, TaskError::Decode(DecodeError::Timeout(_))));
  }
}
