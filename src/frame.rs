// 该文件是 Huaban （滑板巡查） 项目的一部分。
// src/frame.rs - 视频帧定义
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

use image::RgbImage;

const RGB_CHANNELS: usize = 3;

/// 解码后的一帧 RGB 图像
#[derive(Debug, Clone)]
pub struct VideoFrame {
  /// RGB 图像数据（HWC 排列）
  pub image: RgbImage,
  /// 帧索引，从 0 开始
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl VideoFrame {
  pub fn new(image: RgbImage, index: u64, fps: f64) -> Self {
    let timestamp_ms = if fps > 0.0 {
      (index as f64 * 1000.0 / fps) as u64
    } else {
      0
    };
    Self {
      image,
      index,
      timestamp_ms,
    }
  }

  /// 由紧密排列的 RGB24 数据构造帧，长度不符时返回 None
  pub fn from_rgb24(width: u32, height: u32, data: Vec<u8>, index: u64, fps: f64) -> Option<Self> {
    if data.len() != frame_size(width, height) {
      return None;
    }
    RgbImage::from_raw(width, height, data).map(|image| Self::new(image, index, fps))
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn as_rgb24(&self) -> &[u8] {
    self.image.as_raw()
  }
}

/// 一帧 RGB24 数据的字节数
pub fn frame_size(width: u32, height: u32) -> usize {
  RGB_CHANNELS * width as usize * height as usize
}
