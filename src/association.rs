// 该文件是 Huaban （滑板巡查） 项目的一部分。
// src/association.rs - 滑板与行人的关联判定
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

//! 判断一帧中的每块滑板是被骑着还是被拿着。
//!
//! 匹配是贪心的：按检测器输出顺序遍历滑板，每块滑板取第一个尚未占用且
//! 满足几何条件的行人。因此检测顺序决定了平局时的归属。

use crate::model::BoundingBox;

/// 滑板中心可以高出行人脚底的比例（行人框高度的 25%）
const FEET_BAND_ABOVE: f32 = 0.25;
/// 滑板中心可以低于行人脚底的比例（行人框高度的 15%）
const FEET_BAND_BELOW: f32 = 0.15;

pub const VIOLATION_LABEL: &str = "VIOLATION";
pub const CARRYING_LABEL: &str = "CARRYING";

/// 单块滑板的判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociationVerdict {
  pub riding: bool,
  /// 匹配到的行人在本帧 persons 中的下标
  pub person: Option<usize>,
}

impl AssociationVerdict {
  pub fn carried() -> Self {
    Self {
      riding: false,
      person: None,
    }
  }

  pub fn ridden_by(person: usize) -> Self {
    Self {
      riding: true,
      person: Some(person),
    }
  }

  pub fn label(&self) -> &'static str {
    if self.riding {
      VIOLATION_LABEL
    } else {
      CARRYING_LABEL
    }
  }
}

/// 滑板中心是否落在行人脚下的区域内，边界上的值不算
pub fn is_riding(skate: &BoundingBox, person: &BoundingBox) -> bool {
  let (cx, cy) = skate.center();

  let in_width = person.x1 < cx && cx < person.x2;

  let h = person.height();
  let band_top = person.y2 - h * FEET_BAND_ABOVE;
  let band_bottom = person.y2 + h * FEET_BAND_BELOW;
  let in_height = band_top < cy && cy < band_bottom;

  in_width && in_height
}

/// 为每块滑板给出判定，顺序与 `skateboards` 一致
///
/// 每个行人在一帧内最多匹配一块滑板。
pub fn match_skateboards(
  skateboards: &[BoundingBox],
  persons: &[BoundingBox],
) -> Vec<AssociationVerdict> {
  let mut used = vec![false; persons.len()];

  skateboards
    .iter()
    .map(|skate| {
      let found = persons
        .iter()
        .enumerate()
        .find(|(idx, person)| !used[*idx] && is_riding(skate, person))
        .map(|(idx, _)| idx);

      match found {
        Some(idx) => {
          used[idx] = true;
          AssociationVerdict::ridden_by(idx)
        }
        None => AssociationVerdict::carried(),
      }
    })
    .collect()
}
