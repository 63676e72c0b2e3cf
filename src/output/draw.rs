// 该文件是 Huaban （滑板巡查） 项目的一部分。
// src/output/draw.rs - 判定结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::{association::AssociationVerdict, model::BoundingBox};

pub const ALERT_COLOR: [u8; 3] = [255, 0, 0]; // 红色：骑行
pub const NEUTRAL_COLOR: [u8; 3] = [0, 255, 0]; // 绿色：手持

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 22.0;
const LABEL_GAP: i32 = 10;
const BOX_THICKNESS: i32 = 3;

// 内置字体，`--font` 可覆盖
static EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("字体文件读取失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 把每块滑板的判定画到帧上：边框加标签，颜色只取决于是否骑行
///
/// 坐标截断为整数并限制在画面内，限制后退化为空的框直接跳过。
/// 默认使用内置字体绘制标签。
pub struct FrameAnnotator {
  font: Option<FontArc>,
  font_size: f32,
  thickness: i32,
}

impl Default for FrameAnnotator {
  fn default() -> Self {
    let font = match FontArc::try_from_slice(EMBEDDED_FONT) {
      Ok(font) => Some(font),
      Err(e) => {
        warn!("内置字体无效，标签将不会绘制: {}", e);
        None
      }
    };
    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      thickness: BOX_THICKNESS,
    }
  }
}

impl FrameAnnotator {
  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  pub fn from_font_file<P: AsRef<Path>>(path: P) -> Result<Self, DrawError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data)?;
    info!("已加载标签字体: {}", path.display());
    Ok(Self::default().with_font(font))
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn annotate(
    &self,
    image: &mut RgbImage,
    skateboards: &[BoundingBox],
    verdicts: &[AssociationVerdict],
  ) {
    for (skate, verdict) in skateboards.iter().zip(verdicts) {
      let color = if verdict.riding {
        ALERT_COLOR
      } else {
        NEUTRAL_COLOR
      };
      self.draw_bbox_with_label(image, skate, verdict.label(), Rgb(color));
    }
  }

  fn draw_bbox_with_label(
    &self,
    image: &mut RgbImage,
    bbox: &BoundingBox,
    label: &str,
    color: Rgb<u8>,
  ) {
    if image.width() == 0 || image.height() == 0 {
      return;
    }
    let (max_x, max_y) = (image.width() as i32 - 1, image.height() as i32 - 1);

    let x_min = (bbox.x1 as i32).clamp(0, max_x);
    let y_min = (bbox.y1 as i32).clamp(0, max_y);
    let x_max = (bbox.x2 as i32).clamp(0, max_x);
    let y_max = (bbox.y2 as i32).clamp(0, max_y);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 边框向内加粗
    for t in 0..self.thickness {
      let (left, top, right, bottom) = (x_min + t, y_min + t, x_max - t, y_max - t);
      if left > right || top > bottom {
        break;
      }
      let rect =
        Rect::at(left, top).of_size((right - left + 1) as u32, (bottom - top + 1) as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    if let Some(font) = &self.font {
      // 标签基线在框左上角上方
      let label_y = (y_min - LABEL_GAP - self.font_size as i32).max(0);
      draw_text_mut(
        image,
        color,
        x_min,
        label_y,
        PxScale::from(self.font_size),
        font,
        label,
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::ClassTag;

  fn skate(coords: [f32; 4]) -> BoundingBox {
    BoundingBox::new(coords, ClassTag::Skateboard, 0.8)
  }

  fn blank() -> RgbImage {
    RgbImage::from_pixel(100, 80, Rgb([10, 10, 10]))
  }

  #[test]
  fn colours_follow_the_verdict() {
    let mut image = RgbImage::from_pixel(120, 120, Rgb([10, 10, 10]));
    let annotator = FrameAnnotator::default();
    annotator.annotate(
      &mut image,
      &[skate([10.0, 60.0, 40.0, 80.0]), skate([50.0, 70.0, 90.0, 100.0])],
      &[
        AssociationVerdict::ridden_by(0),
        AssociationVerdict::carried(),
      ],
    );

    assert_eq!(image.get_pixel(10, 60).0, ALERT_COLOR);
    assert_eq!(image.get_pixel(40, 80).0, ALERT_COLOR);
    assert_eq!(image.get_pixel(12, 70).0, ALERT_COLOR);
    assert_eq!(image.get_pixel(50, 85).0, NEUTRAL_COLOR);
    assert_eq!(image.get_pixel(90, 100).0, NEUTRAL_COLOR);
    // 边框内部与框下方保持原样
    assert_eq!(image.get_pixel(25, 70).0, [10, 10, 10]);
    assert_eq!(image.get_pixel(45, 110).0, [10, 10, 10]);
  }

  /// 统计框上方标签区域内被改动的像素
  fn label_pixels(image: &RgbImage, below_y: u32) -> Vec<[u8; 3]> {
    image
      .enumerate_pixels()
      .filter(|(_, y, p)| *y < below_y && p.0 != [0, 0, 0])
      .map(|(_, _, p)| p.0)
      .collect()
  }

  #[test]
  fn default_annotator_labels_every_verdict() {
    let annotator = FrameAnnotator::default();
    assert!(annotator.has_font());

    let mut ridden = RgbImage::new(200, 200);
    annotator.annotate(
      &mut ridden,
      &[skate([50.0, 100.0, 150.0, 130.0])],
      &[AssociationVerdict::ridden_by(0)],
    );
    let pixels = label_pixels(&ridden, 100);
    assert!(!pixels.is_empty());
    assert!(pixels.iter().all(|p| p[1] == 0 && p[2] == 0 && p[0] > 0));

    let mut carried = RgbImage::new(200, 200);
    annotator.annotate(
      &mut carried,
      &[skate([50.0, 100.0, 150.0, 130.0])],
      &[AssociationVerdict::carried()],
    );
    let pixels = label_pixels(&carried, 100);
    assert!(!pixels.is_empty());
    assert!(pixels.iter().all(|p| p[0] == 0 && p[2] == 0 && p[1] > 0));
  }

  #[test]
  fn label_sits_just_above_the_box() {
    let mut image = RgbImage::new(200, 200);
    FrameAnnotator::default().annotate(
      &mut image,
      &[skate([50.0, 100.0, 150.0, 130.0])],
      &[AssociationVerdict::ridden_by(0)],
    );
    let top = (100 - LABEL_GAP - LABEL_FONT_SIZE as i32) as u32;
    let rows: Vec<u32> = image
      .enumerate_pixels()
      .filter(|(_, y, p)| *y < 100 && p.0 != [0, 0, 0])
      .map(|(_, y, _)| y)
      .collect();
    assert!(rows.iter().all(|&y| y >= top));
    let columns: Vec<u32> = image
      .enumerate_pixels()
      .filter(|(_, y, p)| *y < 100 && p.0 != [0, 0, 0])
      .map(|(x, _, _)| x)
      .collect();
    assert!(columns.iter().all(|&x| x >= 50));
  }

  #[test]
  fn nothing_is_drawn_without_skateboards() {
    let mut image = blank();
    FrameAnnotator::default().annotate(&mut image, &[], &[]);
    assert_eq!(image, blank());
  }

  #[test]
  fn boxes_outside_the_frame_are_clamped() {
    let mut image = blank();
    FrameAnnotator::default().annotate(
      &mut image,
      &[skate([-20.0, 60.0, 30.0, 120.0])],
      &[AssociationVerdict::carried()],
    );
    assert_eq!(image.get_pixel(0, 70).0, NEUTRAL_COLOR);
    assert_eq!(image.get_pixel(15, 79).0, NEUTRAL_COLOR);
  }

  #[test]
  fn collapsed_boxes_are_skipped() {
    let mut image = blank();
    FrameAnnotator::default().annotate(
      &mut image,
      &[skate([150.0, 10.0, 180.0, 20.0]), skate([5.0, 5.0, 5.5, 30.0])],
      &[
        AssociationVerdict::ridden_by(0),
        AssociationVerdict::ridden_by(1),
      ],
    );
    assert_eq!(image, blank());
  }

  #[test]
  fn missing_font_file_is_reported() {
    assert!(matches!(
      FrameAnnotator::from_font_file("/nonexistent/font.ttf"),
      Err(DrawError::IoError(_))
    ));
  }
}
