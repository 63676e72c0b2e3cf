// 该文件是 Huaban （滑板巡查） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件输出
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

//! # GStreamer 视频文件输出模块
//!
//! 通过 `appsrc ! videoconvert ! x264enc ! mp4mux ! filesink` 把帧编码为 MP4。
//! 结束时发送 EOS 并等待管道处理完毕，确保文件尾写完整。

use std::path::{Path, PathBuf};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::output::{OutputError, OutputSink, remove_partial};

/// GStreamer 视频输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsrc 元素
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

/// GStreamer 视频文件输出
pub struct GStreamerVideoOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  path: PathBuf,
  width: u32,
  height: u32,
  fps: gst::Fraction,
  frame_count: u64,
  closed: bool,
}

impl GStreamerVideoOutput {
  pub fn create<P: AsRef<Path>>(
    path: P,
    width: u32,
    height: u32,
    fps: f64,
  ) -> Result<Self, GStreamerVideoOutputError> {
    gst::init()?;

    let path = path.as_ref().to_path_buf();
    let description = format!(
      "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! \
       x264enc speed-preset=fast ! h264parse ! mp4mux ! filesink location=\"{}\"",
      path.to_string_lossy().replace('"', "\\\"")
    );
    info!("Creating video output pipeline: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcNotFound)?;

    // 帧率保留三位小数
    let fps = gst::Fraction::new((fps * 1000.0).round() as i32, 1000);
    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", width as i32)
      .field("height", height as i32)
      .field("framerate", fps)
      .build();

    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;

    info!(
      "Video output initialized: {}x{} @ {} fps -> {}",
      width,
      height,
      fps,
      path.display()
    );

    Ok(GStreamerVideoOutput {
      pipeline,
      appsrc,
      path,
      width,
      height,
      fps,
      frame_count: 0,
      closed: false,
    })
  }

  fn frame_duration_ns(&self) -> u64 {
    let numer = self.fps.numer().max(1) as u64;
    let denom = self.fps.denom().max(1) as u64;
    1_000_000_000 * denom / numer
  }

  fn push_frame(&mut self, data: &[u8]) -> Result<(), GStreamerVideoOutputError> {
    let duration = self.frame_duration_ns();
    let mut buffer = gst::Buffer::from_mut_slice(data.to_vec());
    {
      let buffer_ref = buffer.make_mut();
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(self.frame_count * duration));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(duration));
    }

    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;
    self.frame_count += 1;
    Ok(())
  }

  /// 发送 EOS 并等待管道写完文件
  fn close(&mut self) -> Result<(), GStreamerVideoOutputError> {
    self.appsrc.end_of_stream().map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to send EOS: {:?}", e))
    })?;

    let bus = self
      .pipeline
      .bus()
      .ok_or_else(|| GStreamerVideoOutputError::PipelineError("Pipeline has no bus".to_string()))?;

    let result = match bus.timed_pop_filtered(
      gst::ClockTime::NONE,
      &[gst::MessageType::Eos, gst::MessageType::Error],
    ) {
      Some(msg) => match msg.view() {
        gst::MessageView::Error(err) => Err(GStreamerVideoOutputError::PipelineError(
          err.error().to_string(),
        )),
        _ => Ok(()),
      },
      None => Ok(()),
    };

    self.pipeline.set_state(gst::State::Null)?;
    result
  }
}

impl OutputSink for GStreamerVideoOutput {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    if image.dimensions() != (self.width, self.height) {
      return Err(OutputError::FrameSizeMismatch {
        expected: (self.width, self.height),
        actual: image.dimensions(),
      });
    }
    self.push_frame(image.as_raw())?;
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    if self.closed {
      return Ok(());
    }
    self.closed = true;
    match self.close() {
      Ok(()) => {
        info!(
          "Video output closed. Total frames written: {}",
          self.frame_count
        );
        Ok(())
      }
      Err(e) => {
        error!("Failed to finalize video output: {}", e);
        remove_partial(&self.path);
        Err(e.into())
      }
    }
  }

  fn abort(&mut self) {
    if self.closed {
      return;
    }
    self.closed = true;
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer video output pipeline: {}", e);
    }
    remove_partial(&self.path);
  }
}

impl Drop for GStreamerVideoOutput {
  fn drop(&mut self) {
    self.abort();
  }
}
