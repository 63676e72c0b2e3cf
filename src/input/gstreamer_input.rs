// 该文件是 Huaban （滑板巡查） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频文件输入
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

//! # GStreamer 视频输入模块
//!
//! 用 `filesrc ! decodebin ! videoconvert ! appsink` 管道逐帧解码视频文件。
//! 与摄像头输入不同，这里的 appsink 不丢帧，保证每一帧都按顺序交给检测流程。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! 在 `Cargo.toml` 中启用 `gstreamer_backend` 特性。

use std::{path::Path, time::Instant};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  frame::{VideoFrame, frame_size},
  input::{InputError, InputSource, normalize_fps},
};

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

/// 单次等待样本的时长，超时后检查一次总线
const POLL_INTERVAL_MS: u64 = 100;
/// 预卷最长等待时间
const PREROLL_TIMEOUT_SECS: u64 = 30;

/// 取出总线上的错误消息；收到错误后 appsink 既没有样本也没有 EOS
fn bus_error(bus: &gst::Bus) -> Option<GStreamerInputError> {
  let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
  match msg.view() {
    gst::MessageView::Error(err) => {
      let detail = match err.debug() {
        Some(debug) => format!("{} ({})", err.error(), debug),
        None => err.error().to_string(),
      };
      Some(GStreamerInputError::PipelineError(detail))
    }
    _ => None,
  }
}

/// GStreamer 视频文件输入
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  bus: gst::Bus,
  width: u32,
  height: u32,
  fps: f64,
  frame_index: u64,
  finished: bool,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl GStreamerInput {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GStreamerInputError> {
    gst::init()?;

    let location = path.as_ref().to_string_lossy();
    let description = format!(
      "filesrc location=\"{}\" ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
       appsink name=sink sync=false max-buffers=4 drop=false",
      location.replace('"', "\\\"")
    );
    info!("GStreamer pipeline description: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkNotFound)?;

    let bus = pipeline
      .bus()
      .ok_or_else(|| GStreamerInputError::PipelineError("Pipeline has no bus".to_string()))?;

    // 预卷一帧以获得尺寸与帧率，预卷的样本之后仍会由 pull_sample 返回
    pipeline.set_state(gst::State::Paused)?;
    let preroll = match Self::wait_preroll(&appsink, &bus) {
      Ok(sample) => sample,
      Err(e) => {
        let _ = pipeline.set_state(gst::State::Null);
        return Err(e);
      }
    };
    let video_info = sample_video_info(&preroll)?;
    let fps = video_info.fps();
    let fps = if fps.denom() == 0 {
      0.0
    } else {
      fps.numer() as f64 / fps.denom() as f64
    };

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput {
      pipeline,
      appsink,
      bus,
      width: video_info.width(),
      height: video_info.height(),
      fps: normalize_fps(fps),
      frame_index: 0,
      finished: false,
    })
  }

  fn wait_preroll(
    appsink: &gst_app::AppSink,
    bus: &gst::Bus,
  ) -> Result<gst::Sample, GStreamerInputError> {
    let started = Instant::now();
    loop {
      if let Some(sample) =
        appsink.try_pull_preroll(gst::ClockTime::from_mseconds(POLL_INTERVAL_MS))
      {
        return Ok(sample);
      }
      if let Some(e) = bus_error(bus) {
        return Err(e);
      }
      if appsink.is_eos() {
        return Err(GStreamerInputError::PipelineError(
          "Stream ended before the first frame".to_string(),
        ));
      }
      if started.elapsed().as_secs() >= PREROLL_TIMEOUT_SECS {
        return Err(GStreamerInputError::PipelineError(
          "Timed out waiting for the first frame".to_string(),
        ));
      }
    }
  }

  fn pull_frame(&mut self) -> Result<Option<VideoFrame>, GStreamerInputError> {
    let sample = loop {
      if let Some(sample) = self
        .appsink
        .try_pull_sample(gst::ClockTime::from_mseconds(POLL_INTERVAL_MS))
      {
        break sample;
      }
      if let Some(e) = bus_error(&self.bus) {
        return Err(e);
      }
      if self.appsink.is_eos() {
        debug!("GStreamer input reached end of stream");
        return Ok(None);
      }
    };

    let data = convert_sample_to_rgb24(&sample)?;
    let frame = VideoFrame::from_rgb24(self.width, self.height, data, self.frame_index, self.fps)
      .ok_or(GStreamerInputError::BufferSizeMismatch {
        expected: frame_size(self.width, self.height),
        actual: 0,
      })?;
    self.frame_index += 1;
    Ok(Some(frame))
  }
}

impl Iterator for GStreamerInput {
  type Item = Result<VideoFrame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }
    match self.pull_frame() {
      Ok(Some(frame)) => Some(Ok(frame)),
      Ok(None) => {
        self.finished = true;
        None
      }
      Err(e) => {
        self.finished = true;
        Some(Err(e.into()))
      }
    }
  }
}

impl InputSource for GStreamerInput {
  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> f64 {
    self.fps
  }
}

fn sample_video_info(sample: &gst::Sample) -> Result<gst_video::VideoInfo, GStreamerInputError> {
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;
  gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)
}

/// 把样本拷贝成紧密排列的 RGB24，去掉行对齐填充
fn convert_sample_to_rgb24(sample: &gst::Sample) -> Result<Vec<u8>, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let video_info = sample_video_info(sample)?;

  if video_info.format() != gst_video::VideoFormat::Rgb {
    return Err(GStreamerInputError::UnsupportedFormat);
  }

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;
  if width == 0 || height == 0 {
    return Err(GStreamerInputError::VideoInfoError);
  }

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let row = width * 3;
  let expected = stride * (height - 1) + row;
  if data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let mut out = Vec::with_capacity(row * height);
  for y in 0..height {
    let start = y * stride;
    out.extend_from_slice(&data[start..start + row]);
  }
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bus_errors_surface_as_pipeline_errors() {
    gst::init().unwrap();
    let bus = gst::Bus::new();
    assert!(bus_error(&bus).is_none());

    bus
      .post(gst::message::Error::new(gst::CoreError::Failed, "decoder exploded"))
      .unwrap();
    match bus_error(&bus) {
      Some(GStreamerInputError::PipelineError(msg)) => assert!(msg.contains("decoder exploded")),
      other => panic!("unexpected: {:?}", other),
    }
    assert!(bus_error(&bus).is_none());
  }

  #[test]
  fn non_video_file_fails_instead_of_hanging() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.mp4");
    std::fs::write(&path, b"plain text, not a container").unwrap();
    assert!(GStreamerInput::open(&path).is_err());
  }
}
