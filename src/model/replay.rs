// 该文件是 Huaban （滑板巡查） 项目的一部分。
// src/model/replay.rs - 检测结果回放
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

//! 回放外部检测器预先算好的结果。
//!
//! 文件每行对应一帧，内容是一个 JSON 数组：
//!
//! ```text
//! [{"class": 0, "bbox": [0, 0, 100, 200], "score": 0.91, "track_id": 1},
//!  {"class": "skateboard", "bbox": [30, 185, 70, 205], "score": 0.66}]
//! ```
//!
//! `class` 可以是 COCO 类别编号，也可以是类别名称。

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::VideoFrame,
  model::{BoundingBox, ClassTag, DetectParams, Detector},
  url_file_path,
};

#[derive(Error, Debug)]
pub enum ReplayError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("第 {line} 行解析失败: {source}")]
  ParseError {
    line: usize,
    source: serde_json::Error,
  },
  #[error("回放数据只有 {available} 帧，无法提供第 {requested} 帧")]
  Exhausted { available: usize, requested: usize },
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawClass {
  Id(u32),
  Name(String),
}

impl RawClass {
  fn to_tag(&self) -> ClassTag {
    match self {
      RawClass::Id(id) => ClassTag::from_coco_id(*id),
      RawClass::Name(name) => ClassTag::from_label(name),
    }
  }
}

#[derive(Debug, Deserialize)]
struct RawDetection {
  class: RawClass,
  bbox: [f32; 4],
  score: f32,
  #[serde(default)]
  track_id: Option<u64>,
}

pub struct ReplayDetector {
  frames: Vec<Vec<BoundingBox>>,
  cursor: usize,
}

impl FromUrlWithScheme for ReplayDetector {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayDetector {
  type Error = ReplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    Self::open(url_file_path(url))
  }
}

impl ReplayDetector {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ReplayError> {
    let path = path.as_ref();
    info!("加载回放检测结果: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    let detector = Self::parse(&content)?;
    info!("回放数据共 {} 帧", detector.frames.len());
    Ok(detector)
  }

  pub fn parse(content: &str) -> Result<Self, ReplayError> {
    let mut frames = Vec::new();
    for (idx, line) in content.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() {
        continue;
      }
      let raw: Vec<RawDetection> =
        serde_json::from_str(line).map_err(|source| ReplayError::ParseError {
          line: idx + 1,
          source,
        })?;
      let boxes = raw
        .into_iter()
        .map(|det| {
          BoundingBox::new(det.bbox, det.class.to_tag(), det.score).with_track_id(det.track_id)
        })
        .collect();
      frames.push(boxes);
    }
    Ok(Self { frames, cursor: 0 })
  }

  pub fn len(&self) -> usize {
    self.frames.len()
  }

  pub fn is_empty(&self) -> bool {
    self.frames.is_empty()
  }
}

impl Detector for ReplayDetector {
  type Error = ReplayError;

  fn detect(
    &mut self,
    frame: &VideoFrame,
    params: &DetectParams,
  ) -> Result<Vec<BoundingBox>, Self::Error> {
    let boxes = self
      .frames
      .get(self.cursor)
      .ok_or(ReplayError::Exhausted {
        available: self.frames.len(),
        requested: self.cursor,
      })?;
    self.cursor += 1;

    let kept: Vec<BoundingBox> = boxes
      .iter()
      .filter(|b| b.confidence > params.confidence)
      .map(|b| {
        let mut b = b.clone();
        if !params.persist_tracks {
          b.track_id = None;
        }
        b
      })
      .collect();
    debug!(
      "帧 {}: 回放 {} 个检测，保留 {} 个",
      frame.index,
      boxes.len(),
      kept.len()
    );
    Ok(kept)
  }

  fn reset(&mut self) {
    self.cursor = 0;
  }
}

#[cfg(test)]
mod tests {
  use image::RgbImage;

  use super::*;

  fn frame(index: u64) -> VideoFrame {
    VideoFrame::new(RgbImage::new(8, 8), index, 30.0)
  }

  const SAMPLE: &str = r#"[{"class": 0, "bbox": [0, 0, 100, 200], "score": 0.9, "track_id": 4}, {"class": "skateboard", "bbox": [30, 185, 70, 205], "score": 0.3}]

[{"class": 36, "bbox": [1, 2, 3, 4], "score": 0.8}]
"#;

  #[test]
  fn parses_ids_and_names_and_skips_blank_lines() {
    let detector = ReplayDetector::parse(SAMPLE).unwrap();
    assert_eq!(detector.len(), 2);
    assert_eq!(detector.frames[0][0].class, ClassTag::Person);
    assert_eq!(detector.frames[0][0].track_id, Some(4));
    assert_eq!(detector.frames[0][1].class, ClassTag::Skateboard);
    assert_eq!(detector.frames[1][0].class, ClassTag::Skateboard);
  }

  #[test]
  fn applies_confidence_threshold() {
    let mut detector = ReplayDetector::parse(SAMPLE).unwrap();
    let boxes = detector.detect(&frame(0), &DetectParams::default()).unwrap();
    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0].class, ClassTag::Person);
  }

  #[test]
  fn score_equal_to_threshold_is_dropped() {
    let line = r#"[{"class": 0, "bbox": [0, 0, 10, 10], "score": 0.45}, {"class": 0, "bbox": [0, 0, 10, 10], "score": 0.46}]"#;
    let mut detector = ReplayDetector::parse(line).unwrap();
    let boxes = detector.detect(&frame(0), &DetectParams::default()).unwrap();
    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0].confidence, 0.46);
  }

  #[test]
  fn running_past_the_end_is_an_error_until_reset() {
    let mut detector = ReplayDetector::parse(SAMPLE).unwrap();
    let params = DetectParams::default();
    detector.detect(&frame(0), &params).unwrap();
    detector.detect(&frame(1), &params).unwrap();
    assert!(matches!(
      detector.detect(&frame(2), &params),
      Err(ReplayError::Exhausted {
        available: 2,
        requested: 2
      })
    ));
    detector.reset();
    assert_eq!(detector.detect(&frame(0), &params).unwrap().len(), 1);
  }

  #[test]
  fn reports_bad_line_number() {
    let err = ReplayDetector::parse("[]\n{not json}").err().unwrap();
    assert!(matches!(err, ReplayError::ParseError { line: 2, .. }));
  }
}
