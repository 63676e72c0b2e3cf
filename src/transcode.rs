// 该文件是 Huaban （滑板巡查） 项目的一部分。
// src/transcode.rs - 转码为浏览器可播放的视频
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

//! # 转码模块
//!
//! 把检测阶段写出的中间文件转成 H.264 / yuv420p / faststart 的 MP4，
//! 方便浏览器直接播放。
//!
//! 无论成功与否中间文件都会被删除；失败时不完整的目标文件也会被删除。
//! 此模块需要系统安装 ffmpeg 命令行工具。

use std::{
  ffi::OsString,
  path::Path,
  process::{Command, Stdio},
};

use thiserror::Error;
use tracing::{error, info};

use crate::output::remove_partial;

#[derive(Error, Debug)]
pub enum TranscodeError {
  #[error("无法执行 {program:?} (请确保已安装): {source}")]
  SpawnError {
    program: OsString,
    #[source]
    source: std::io::Error,
  },
  #[error("转码失败 ({status}): {stderr}")]
  Failed { status: String, stderr: String },
  #[error("转码结束但未生成输出文件: {0}")]
  MissingOutput(String),
}

/// ffmpeg 转码器
#[derive(Debug, Clone)]
pub struct Transcoder {
  program: OsString,
}

impl Default for Transcoder {
  fn default() -> Self {
    Self {
      program: OsString::from("ffmpeg"),
    }
  }
}

impl Transcoder {
  /// 使用指定的 ffmpeg 可执行文件
  pub fn with_program<S: Into<OsString>>(program: S) -> Self {
    Self {
      program: program.into(),
    }
  }

  pub fn transcode(&self, raw: &Path, web: &Path) -> Result<(), TranscodeError> {
    info!("开始转码: {} -> {}", raw.display(), web.display());
    let result = self.run(raw, web);
    remove_partial(raw);
    if result.is_err() {
      remove_partial(web);
    }
    result
  }

  fn run(&self, raw: &Path, web: &Path) -> Result<(), TranscodeError> {
    let output = Command::new(&self.program)
      .arg("-y")
      .arg("-i")
      .arg(raw)
      .args(["-vcodec", "libx264"])
      .args(["-preset", "ultrafast"])
      .args(["-crf", "28"])
      .args(["-pix_fmt", "yuv420p"])
      .args(["-movflags", "+faststart"])
      .arg(web)
      .stdin(Stdio::null())
      .output()
      .map_err(|source| TranscodeError::SpawnError {
        program: self.program.clone(),
        source,
      })?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
      error!("ffmpeg 错误: {}", stderr);
      return Err(TranscodeError::Failed {
        status: output.status.to_string(),
        stderr,
      });
    }

    if !web.is_file() {
      return Err(TranscodeError::MissingOutput(web.display().to_string()));
    }

    info!("转码完成: {}", web.display());
    Ok(())
  }
}
