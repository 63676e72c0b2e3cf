// 该文件是 Huaban （滑板巡查） 项目的一部分。
// src/aggregate.rs - 会话级违规汇总
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

use crate::{association::AssociationVerdict, frame::VideoFrame};

/// 一帧处理完成后的结果
#[derive(Debug, Clone)]
pub struct FrameOutcome {
  /// 已绘制判定结果的帧
  pub frame: VideoFrame,
  pub verdicts: Vec<AssociationVerdict>,
  pub any_violation: bool,
}

impl FrameOutcome {
  pub fn new(frame: VideoFrame, verdicts: Vec<AssociationVerdict>) -> Self {
    let any_violation = verdicts.iter().any(|v| v.riding);
    Self {
      frame,
      verdicts,
      any_violation,
    }
  }
}

/// 一次会话的最终结论
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionResult {
  pub violation_detected: bool,
  pub frame_count: u64,
}

/// 按帧顺序累积违规结论，每个解码出的帧恰好调用一次 `observe`
#[derive(Debug, Default)]
pub struct ViolationAggregator {
  result: SessionResult,
  violation_frames: u64,
}

impl ViolationAggregator {
  pub fn observe(&mut self, outcome: &FrameOutcome) {
    self.result.frame_count += 1;
    if outcome.any_violation {
      self.result.violation_detected = true;
      self.violation_frames += 1;
    }
  }

  pub fn frame_count(&self) -> u64 {
    self.result.frame_count
  }

  /// 出现违规的帧数
  pub fn violation_frames(&self) -> u64 {
    self.violation_frames
  }

  pub fn finalize(self) -> SessionResult {
    self.result
  }
}

#[cfg(test)]
mod tests {
  use image::RgbImage;

  use super::*;

  fn outcome(verdicts: Vec<AssociationVerdict>) -> FrameOutcome {
    FrameOutcome::new(VideoFrame::new(RgbImage::new(2, 2), 0, 30.0), verdicts)
  }

  #[test]
  fn empty_session_is_clean() {
    let result = ViolationAggregator::default().finalize();
    assert_eq!(result, SessionResult::default());
    assert!(!result.violation_detected);
    assert_eq!(result.frame_count, 0);
  }

  #[test]
  fn any_ridden_skateboard_marks_the_frame() {
    assert!(!outcome(vec![]).any_violation);
    assert!(!outcome(vec![AssociationVerdict::carried()]).any_violation);
    assert!(
      outcome(vec![
        AssociationVerdict::carried(),
        AssociationVerdict::ridden_by(2)
      ])
      .any_violation
    );
  }

  #[test]
  fn counts_every_frame_and_ors_violations() {
    let mut aggregator = ViolationAggregator::default();
    aggregator.observe(&outcome(vec![AssociationVerdict::carried()]));
    aggregator.observe(&outcome(vec![AssociationVerdict::ridden_by(0)]));
    aggregator.observe(&outcome(vec![]));
    assert_eq!(aggregator.violation_frames(), 1);

    let result = aggregator.finalize();
    assert!(result.violation_detected);
    assert_eq!(result.frame_count, 3);
  }

  #[test]
  fn carried_only_session_has_no_violation() {
    let mut aggregator = ViolationAggregator::default();
    for _ in 0..5 {
      aggregator.observe(&outcome(vec![AssociationVerdict::carried()]));
    }
    let result = aggregator.finalize();
    assert!(!result.violation_detected);
    assert_eq!(result.frame_count, 5);
  }
}
