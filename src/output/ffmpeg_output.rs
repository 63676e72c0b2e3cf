// 该文件是 Huaban （滑板巡查） 项目的一部分。
// src/output/ffmpeg_output.rs - 基于 ffmpeg 子进程的视频编码
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

//! 把 RGB24 原始帧通过标准输入交给 `ffmpeg`，编码为 MPEG-4 中间文件。
//! 中间文件随后由转码阶段转成浏览器可播放的格式。

use std::{
  io::Write,
  path::{Path, PathBuf},
  process::{Child, ChildStdin, Command, Stdio},
};

use image::RgbImage;
use tracing::{debug, error, info};

use crate::{
  output::{OutputError, OutputSink, remove_partial},
  subprocess::StderrDrain,
};

/// ffmpeg 子进程视频输出
pub struct FfmpegOutput {
  child: Option<Child>,
  stdin: Option<ChildStdin>,
  stderr: StderrDrain,
  path: PathBuf,
  width: u32,
  height: u32,
  frame_count: u64,
}

impl FfmpegOutput {
  pub fn create<P: AsRef<Path>>(
    path: P,
    width: u32,
    height: u32,
    fps: f64,
  ) -> Result<Self, OutputError> {
    let path = path.as_ref().to_path_buf();

    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let mut child = Command::new("ffmpeg")
      .args(["-y", "-v", "error"])
      .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
      .arg("-s")
      .arg(format!("{}x{}", width, height))
      .arg("-r")
      .arg(fps.to_string())
      .args(["-i", "-", "-an", "-c:v", "mpeg4", "-q:v", "5"])
      .arg(&path)
      .stdin(Stdio::piped())
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| OutputError::EncodingError(format!("无法执行 ffmpeg (请确保已安装): {}", e)))?;

    let stdin = child.stdin.take();
    if stdin.is_none() {
      let _ = child.kill();
      let _ = child.wait();
      return Err(OutputError::EncodingError(
        "无法获取 ffmpeg 输入管道".to_string(),
      ));
    }
    let stderr = StderrDrain::spawn(&mut child);

    info!(
      "视频输出已创建: {}x{} @ {:.2} fps -> {}",
      width,
      height,
      fps,
      path.display()
    );

    Ok(Self {
      child: Some(child),
      stdin,
      stderr,
      path,
      width,
      height,
      frame_count: 0,
    })
  }

  pub fn frame_count(&self) -> u64 {
    self.frame_count
  }

  /// 结束编码进程并取出它的标准错误
  fn stop_child(&mut self) -> String {
    drop(self.stdin.take());
    if let Some(mut child) = self.child.take() {
      let _ = child.kill();
      let _ = child.wait();
    }
    self.stderr.collect()
  }
}

impl OutputSink for FfmpegOutput {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    if image.dimensions() != (self.width, self.height) {
      return Err(OutputError::FrameSizeMismatch {
        expected: (self.width, self.height),
        actual: image.dimensions(),
      });
    }

    let stdin = self
      .stdin
      .as_mut()
      .ok_or_else(|| OutputError::EncodingError("编码器已关闭".to_string()))?;

    if let Err(e) = stdin.write_all(image.as_raw()) {
      let stderr = self.stop_child();
      error!("写入 ffmpeg 失败: {} {}", e, stderr);
      return Err(OutputError::EncodingError(format!("{}: {}", e, stderr)));
    }

    self.frame_count += 1;
    debug!("已写入第 {} 帧", self.frame_count);
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    // 关闭标准输入，ffmpeg 随之收尾
    drop(self.stdin.take());
    let Some(mut child) = self.child.take() else {
      return Ok(());
    };

    let status = child.wait()?;
    if status.success() {
      info!(
        "视频编码完成: {} 帧 -> {}",
        self.frame_count,
        self.path.display()
      );
      return Ok(());
    }

    let stderr = self.stderr.collect();
    error!("ffmpeg 错误: {}", stderr);
    remove_partial(&self.path);
    Err(OutputError::EncodingError(format!(
      "ffmpeg 退出状态 {}: {}",
      status, stderr
    )))
  }

  fn abort(&mut self) {
    let stderr = self.stop_child();
    if !stderr.is_empty() {
      debug!("ffmpeg 编码进程输出: {}", stderr);
    }
    remove_partial(&self.path);
  }
}

impl Drop for FfmpegOutput {
  fn drop(&mut self) {
    // 未 finish 的输出一律视为放弃
    if self.child.is_some() {
      self.abort();
    }
  }
}
