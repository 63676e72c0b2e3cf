// 该文件是 Huaban （滑板巡查） 项目的一部分。
// src/input.rs - 视频输入
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

use std::{fmt, path::Path, str::FromStr};

use thiserror::Error;

use crate::frame::VideoFrame;

/// 视频未报告帧率（或报告为 0）时使用的帧率
pub const FALLBACK_FPS: f64 = 30.0;

pub fn normalize_fps(fps: f64) -> f64 {
  if fps.is_finite() && fps > 0.0 {
    fps
  } else {
    FALLBACK_FPS
  }
}

mod ffmpeg_input;
pub use self::ffmpeg_input::FfmpegInput;

#[cfg(feature = "gstreamer_backend")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_backend")]
pub use self::gstreamer_input::{GStreamerInput, GStreamerInputError};

/// 视频编解码后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoBackend {
  #[default]
  Ffmpeg,
  #[cfg(feature = "gstreamer_backend")]
  GStreamer,
}

impl FromStr for VideoBackend {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "ffmpeg" => Ok(VideoBackend::Ffmpeg),
      #[cfg(feature = "gstreamer_backend")]
      "gstreamer" | "gst" => Ok(VideoBackend::GStreamer),
      other => Err(format!("不支持的视频后端: {}", other)),
    }
  }
}

impl fmt::Display for VideoBackend {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      VideoBackend::Ffmpeg => write!(f, "ffmpeg"),
      #[cfg(feature = "gstreamer_backend")]
      VideoBackend::GStreamer => write!(f, "gstreamer"),
    }
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无法读取视频信息: {0}")]
  ProbeError(String),
  #[error("视频解码失败: {0}")]
  DecodeError(String),
  #[cfg(feature = "gstreamer_backend")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
}

/// 按时间顺序产出帧的解码器，迭代结束即视频读完
pub trait InputSource: Iterator<Item = Result<VideoFrame, InputError>> {
  fn width(&self) -> u32;

  fn height(&self) -> u32;

  /// 帧率，已处理过 0 帧率的情况
  fn fps(&self) -> f64;
}

pub enum InputWrapper {
  Ffmpeg(FfmpegInput),
  #[cfg(feature = "gstreamer_backend")]
  GStreamer(GStreamerInput),
}

impl InputWrapper {
  pub fn open<P: AsRef<Path>>(backend: VideoBackend, path: P) -> Result<Self, InputError> {
    match backend {
      VideoBackend::Ffmpeg => Ok(InputWrapper::Ffmpeg(FfmpegInput::open(path)?)),
      #[cfg(feature = "gstreamer_backend")]
      VideoBackend::GStreamer => Ok(InputWrapper::GStreamer(GStreamerInput::open(path)?)),
    }
  }
}

impl Iterator for InputWrapper {
  type Item = Result<VideoFrame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::Ffmpeg(input) => input.next(),
      #[cfg(feature = "gstreamer_backend")]
      InputWrapper::GStreamer(input) => input.next(),
    }
  }
}

impl InputSource for InputWrapper {
  fn width(&self) -> u32 {
    match self {
      InputWrapper::Ffmpeg(input) => input.width(),
      #[cfg(feature = "gstreamer_backend")]
      InputWrapper::GStreamer(input) => input.width(),
    }
  }

  fn height(&self) -> u32 {
    match self {
      InputWrapper::Ffmpeg(input) => input.height(),
      #[cfg(feature = "gstreamer_backend")]
      InputWrapper::GStreamer(input) => input.height(),
    }
  }

  fn fps(&self) -> f64 {
    match self {
      InputWrapper::Ffmpeg(input) => input.fps(),
      #[cfg(feature = "gstreamer_backend")]
      InputWrapper::GStreamer(input) => input.fps(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_fps_falls_back_to_thirty() {
    assert_eq!(normalize_fps(0.0), 30.0);
    assert_eq!(normalize_fps(f64::NAN), 30.0);
    assert_eq!(normalize_fps(25.0), 25.0);
  }

  #[test]
  fn backend_names_parse() {
    assert_eq!("ffmpeg".parse::<VideoBackend>(), Ok(VideoBackend::Ffmpeg));
    assert!("opencv".parse::<VideoBackend>().is_err());
    assert_eq!(VideoBackend::default().to_string(), "ffmpeg");
  }
}
