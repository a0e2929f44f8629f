// 该文件是 Tanjing （探镜） 项目的一部分。
// src/output/draw.rs - 绘制检测框与标签
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

use ab_glyph::{FontRef, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};

use crate::{
  frame::RgbNhwcFrame,
  model::{DetectItem, DetectResult},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_TEXT_HORIZONTAL_PADDING: i32 = 2;
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const BOX_THICKNESS: u32 = 2;
const TEXT_COLOR: [u8; 3] = [0, 0, 0];

static EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/font.ttf");

/// 检测结果的标签文本，如 `3 (0.87)`
pub fn label_text(item: &DetectItem) -> String {
  format!("{} ({:.2})", item.class_id, item.score)
}

/// 绘制上下文，加载后只读，可在线程间共享
pub struct Draw<'a> {
  font: FontRef<'a>,
  font_size: f32,
  color: [u8; 3],
  thickness: u32,
}

impl Draw<'static> {
  /// 使用内嵌字体，绿色 2 像素边框
  pub fn new() -> Result<Self, InvalidFont> {
    Draw::with_font(EMBEDDED_FONT)
  }
}

impl<'a> Draw<'a> {
  pub fn with_font(font_data: &'a [u8]) -> Result<Self, InvalidFont> {
    let font = FontRef::try_from_slice(font_data)?;
    Ok(Self {
      font,
      font_size: LABEL_FONT_SIZE,
      color: BOX_COLOR,
      thickness: BOX_THICKNESS,
    })
  }

  pub fn color(mut self, color: [u8; 3]) -> Self {
    self.color = color;
    self
  }

  pub fn thickness(mut self, thickness: u32) -> Self {
    self.thickness = thickness.max(1);
    self
  }

  /// 在帧的副本上绘制检测结果，原帧不变
  pub fn draw_detection(&self, frame: &RgbNhwcFrame, result: &DetectResult) -> RgbNhwcFrame {
    let mut image = frame.to_rgb_image();
    self.draw_on_image(&mut image, result);
    RgbNhwcFrame::from(image)
  }

  pub fn draw_on_image(&self, image: &mut RgbImage, result: &DetectResult) {
    for item in result.iter() {
      self.draw_bbox_with_label(image, item);
    }
  }

  // bbox 为像素坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label(&self, image: &mut RgbImage, item: &DetectItem) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (item.bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (item.bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (item.bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (item.bbox[3].ceil() as i32).clamp(0, h - 1);
    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = Rgb(self.color);
    for t in 0..self.thickness as i32 {
      let (box_w, box_h) = (x_max - x_min + 1 - 2 * t, y_max - y_min + 1 - 2 * t);
      if box_w <= 0 || box_h <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(box_w as u32, box_h as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let label = label_text(item);
    let scale = PxScale::from(self.font_size);
    let (text_w, text_h) = text_size(scale, &self.font, &label);
    let label_w = text_w as i32 + 2 * LABEL_TEXT_HORIZONTAL_PADDING;
    let label_h = text_h as i32 + 2 * LABEL_TEXT_VERTICAL_PADDING;

    // 标签放在边框上方，空间不足时放到框内顶部
    let label_x = x_min;
    let label_y = if y_min >= label_h { y_min - label_h } else { y_min };
    let label_w = label_w.min(w - label_x);
    let label_h = label_h.min(h - label_y);
    if label_w <= 0 || label_h <= 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_w as u32, label_h as u32);
    draw_filled_rect_mut(image, rect, color);
    draw_text_mut(
      image,
      Rgb(TEXT_COLOR),
      label_x + LABEL_TEXT_HORIZONTAL_PADDING,
      label_y + LABEL_TEXT_VERTICAL_PADDING,
      scale,
      &self.font,
      &label,
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn result(items: &[DetectItem]) -> DetectResult {
    items.iter().copied().collect()
  }

  #[test]
  fn label_format() {
    let item = DetectItem {
      class_id: 7,
      score: 0.8765,
      bbox: [0.0; 4],
    };
    assert_eq!(label_text(&item), "7 (0.88)");
  }

  #[test]
  fn draws_on_a_copy() {
    let draw = Draw::new().unwrap();
    let frame = RgbNhwcFrame::with_shape(64, 64);
    let item = DetectItem {
      class_id: 0,
      score: 0.5,
      bbox: [30.0, 30.0, 50.0, 50.0],
    };

    let annotated = draw.draw_detection(&frame, &result(&[item]));

    assert!(frame.as_nhwc().iter().all(|&v| v == 0));
    let image = annotated.to_rgb_image();
    // 左上角边框像素为绿色
    assert_eq!(image.get_pixel(30, 40), &Rgb(BOX_COLOR));
    assert_eq!(image.get_pixel(31, 40), &Rgb(BOX_COLOR));
    // 框内不被填充
    assert_eq!(image.get_pixel(40, 45), &Rgb([0, 0, 0]));
  }

  #[test]
  fn empty_result_leaves_frame_unchanged() {
    let draw = Draw::new().unwrap();
    let mut frame = RgbNhwcFrame::with_shape(8, 8);
    frame.as_mut().fill(77);
    assert_eq!(draw.draw_detection(&frame, &DetectResult::default()), frame);
  }

  #[test]
  fn custom_color_and_thickness() {
    let draw = Draw::new().unwrap().color([255, 0, 0]).thickness(3);
    let mut image = RgbImage::new(40, 40);
    let item = DetectItem {
      class_id: 1,
      score: 0.9,
      bbox: [5.0, 30.0, 35.0, 39.0],
    };
    draw.draw_on_image(&mut image, &result(&[item]));
    assert_eq!(image.get_pixel(7, 35), &Rgb([255, 0, 0]));
    assert_eq!(image.get_pixel(8, 35), &Rgb([0, 0, 0]));
  }
}
