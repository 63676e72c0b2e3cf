// 该文件是 Huaban （滑板巡查） 项目的一部分。
// src/model.rs - 检测模型与检测结果定义
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

use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::VideoFrame};

const COCO_PERSON_ID: u32 = 0;
const COCO_SKATEBOARD_ID: u32 = 36;

/// 检测类别
///
/// 模型自己的类别编号只在适配层里出现，核心逻辑只认这个枚举。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassTag {
  Person,
  Skateboard,
  Other,
}

impl ClassTag {
  pub fn from_coco_id(id: u32) -> Self {
    match id {
      COCO_PERSON_ID => ClassTag::Person,
      COCO_SKATEBOARD_ID => ClassTag::Skateboard,
      _ => ClassTag::Other,
    }
  }

  pub fn from_label(label: &str) -> Self {
    match label.trim().to_ascii_lowercase().as_str() {
      "person" => ClassTag::Person,
      "skateboard" => ClassTag::Skateboard,
      _ => ClassTag::Other,
    }
  }

  pub fn to_label_str(&self) -> &'static str {
    match self {
      ClassTag::Person => "person",
      ClassTag::Skateboard => "skateboard",
      ClassTag::Other => "other",
    }
  }
}

/// 像素坐标下的检测框，原点在左上角
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
  pub class: ClassTag,
  pub confidence: f32,
  /// 跨帧跟踪编号，由检测器提供，可能缺失
  pub track_id: Option<u64>,
}

impl BoundingBox {
  pub fn new(bbox: [f32; 4], class: ClassTag, confidence: f32) -> Self {
    Self {
      x1: bbox[0],
      y1: bbox[1],
      x2: bbox[2],
      y2: bbox[3],
      class,
      confidence,
      track_id: None,
    }
  }

  pub fn with_track_id(mut self, track_id: Option<u64>) -> Self {
    self.track_id = track_id;
    self
  }

  pub fn center(&self) -> (f32, f32) {
    ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
  }

  pub fn height(&self) -> f32 {
    self.y2 - self.y1
  }

  /// 坐标非有限、上下颠倒或完全落在画面外时视为畸形
  fn is_malformed(&self, width: u32, height: u32) -> bool {
    let coords = [self.x1, self.y1, self.x2, self.y2];
    if coords.iter().any(|c| !c.is_finite()) {
      return true;
    }
    if self.x1 > self.x2 || self.y1 > self.y2 {
      return true;
    }
    let (w, h) = (width as f32, height as f32);
    self.x2 < 0.0 || self.y2 < 0.0 || self.x1 > w || self.y1 > h
  }
}

/// 一帧的检测结果，按类别拆分，保持检测器输出顺序
#[derive(Debug, Clone, Default)]
pub struct FrameDetections {
  pub persons: Vec<BoundingBox>,
  pub skateboards: Vec<BoundingBox>,
}

impl FrameDetections {
  /// 拆分检测结果，丢弃其他类别和畸形框
  pub fn partition<I>(detections: I, width: u32, height: u32) -> Self
  where
    I: IntoIterator<Item = BoundingBox>,
  {
    let mut result = FrameDetections::default();
    for bbox in detections {
      if bbox.class == ClassTag::Other {
        continue;
      }
      if bbox.is_malformed(width, height) {
        warn!(
          "跳过畸形检测框: {} ({}, {}, {}, {})",
          bbox.class.to_label_str(),
          bbox.x1,
          bbox.y1,
          bbox.x2,
          bbox.y2
        );
        continue;
      }
      match bbox.class {
        ClassTag::Person => result.persons.push(bbox),
        ClassTag::Skateboard => result.skateboards.push(bbox),
        ClassTag::Other => {}
      }
    }
    result
  }
}

pub const DEFAULT_CONFIDENCE: f32 = 0.45;
pub const DEFAULT_IMAGE_SIZE: u32 = 640;

/// 检测调用参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
  /// 置信度阈值，低于该值的检测被丢弃
  pub confidence: f32,
  /// 推理分辨率（长边）
  pub image_size: u32,
  /// 请求检测器跨帧保持跟踪编号
  pub persist_tracks: bool,
}

impl Default for DetectParams {
  fn default() -> Self {
    Self {
      confidence: DEFAULT_CONFIDENCE,
      image_size: DEFAULT_IMAGE_SIZE,
      persist_tracks: true,
    }
  }
}

/// 外部检测器
///
/// 进程内只加载一次，在多个会话之间复用；`reset` 在每个会话开始时调用，
/// 清掉跟踪之类的跨帧状态。
pub trait Detector {
  type Error: std::error::Error + Send + Sync + 'static;

  fn detect(
    &mut self,
    frame: &VideoFrame,
    params: &DetectParams,
  ) -> Result<Vec<BoundingBox>, Self::Error>;

  fn reset(&mut self) {}
}

impl<D: Detector + ?Sized> Detector for &mut D {
  type Error = D::Error;

  fn detect(
    &mut self,
    frame: &VideoFrame,
    params: &DetectParams,
  ) -> Result<Vec<BoundingBox>, Self::Error> {
    (**self).detect(frame, params)
  }

  fn reset(&mut self) {
    (**self).reset()
  }
}

mod replay;
pub use self::replay::{ReplayDetector, ReplayError};

#[cfg(feature = "model_yolo26")]
mod yolo26;
#[cfg(feature = "model_yolo26")]
pub use self::yolo26::{Yolo26, Yolo26Builder, Yolo26Error};

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("回放检测器错误: {0}")]
  ReplayError(#[from] ReplayError),
  #[cfg(feature = "model_yolo26")]
  #[error("YOLO26 模型错误: {0}")]
  Yolo26Error(#[from] Yolo26Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 按 URL 方案选择的检测器
pub enum ModelWrapper {
  Replay(ReplayDetector),
  #[cfg(feature = "model_yolo26")]
  Yolo26(Yolo26),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() == ReplayDetector::SCHEME {
      return Ok(ModelWrapper::Replay(ReplayDetector::from_url(url)?));
    }
    #[cfg(feature = "model_yolo26")]
    {
      if url.scheme() == Yolo26Builder::SCHEME {
        let model = Yolo26Builder::from_url(url)?.build()?;
        return Ok(ModelWrapper::Yolo26(model));
      }
    }
    Err(ModelError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Detector for ModelWrapper {
  type Error = ModelError;

  fn detect(
    &mut self,
    frame: &VideoFrame,
    params: &DetectParams,
  ) -> Result<Vec<BoundingBox>, Self::Error> {
    match self {
      ModelWrapper::Replay(model) => model.detect(frame, params).map_err(ModelError::from),
      #[cfg(feature = "model_yolo26")]
      ModelWrapper::Yolo26(model) => model.detect(frame, params).map_err(ModelError::from),
    }
  }

  fn reset(&mut self) {
    match self {
      ModelWrapper::Replay(model) => model.reset(),
      #[cfg(feature = "model_yolo26")]
      ModelWrapper::Yolo26(model) => model.reset(),
    }
  }
}
