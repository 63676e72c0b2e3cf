// 该文件是 Huaban （滑板巡查） 项目的一部分。
// src/output.rs - 输出定义
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

use image::RgbImage;
use thiserror::Error;

use crate::input::VideoBackend;

pub mod draw;

mod ffmpeg_output;
pub use self::ffmpeg_output::FfmpegOutput;

#[cfg(feature = "gstreamer_backend")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_backend")]
pub use self::gstreamer_video_output::{GStreamerVideoOutput, GStreamerVideoOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("视频编码错误: {0}")]
  EncodingError(String),
  #[error("帧尺寸不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  FrameSizeMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[cfg(feature = "gstreamer_backend")]
  #[error("GStreamer 视频输出错误: {0}")]
  GStreamerVideoOutputError(#[from] GStreamerVideoOutputError),
}

/// 编码器：按收到的顺序写入已绘制的帧
///
/// `finish` 正常结束并封装文件；`abort` 放弃输出并删除不完整的文件。
pub trait OutputSink {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError>;

  fn finish(&mut self) -> Result<(), OutputError>;

  fn abort(&mut self);
}

impl<S: OutputSink + ?Sized> OutputSink for &mut S {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    (**self).write_frame(image)
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    (**self).finish()
  }

  fn abort(&mut self) {
    (**self).abort()
  }
}

pub enum OutputWrapper {
  Ffmpeg(FfmpegOutput),
  #[cfg(feature = "gstreamer_backend")]
  GStreamer(GStreamerVideoOutput),
}

impl OutputWrapper {
  pub fn create<P: AsRef<Path>>(
    backend: VideoBackend,
    path: P,
    width: u32,
    height: u32,
    fps: f64,
  ) -> Result<Self, OutputError> {
    match backend {
      VideoBackend::Ffmpeg => Ok(OutputWrapper::Ffmpeg(FfmpegOutput::create(
        path, width, height, fps,
      )?)),
      #[cfg(feature = "gstreamer_backend")]
      VideoBackend::GStreamer => Ok(OutputWrapper::GStreamer(GStreamerVideoOutput::create(
        path, width, height, fps,
      )?)),
    }
  }
}

impl OutputSink for OutputWrapper {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    match self {
      OutputWrapper::Ffmpeg(output) => output.write_frame(image),
      #[cfg(feature = "gstreamer_backend")]
      OutputWrapper::GStreamer(output) => output.write_frame(image),
    }
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    match self {
      OutputWrapper::Ffmpeg(output) => output.finish(),
      #[cfg(feature = "gstreamer_backend")]
      OutputWrapper::GStreamer(output) => output.finish(),
    }
  }

  fn abort(&mut self) {
    match self {
      OutputWrapper::Ffmpeg(output) => output.abort(),
      #[cfg(feature = "gstreamer_backend")]
      OutputWrapper::GStreamer(output) => output.abort(),
    }
  }
}

/// 删除不完整的输出文件，文件不存在不算错误
pub(crate) fn remove_partial(path: &Path) {
  match std::fs::remove_file(path) {
    Ok(()) => tracing::info!("已删除不完整的输出: {}", path.display()),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
    Err(e) => tracing::warn!("删除输出文件 {} 失败: {}", path.display(), e),
  }
}
