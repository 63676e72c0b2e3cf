// 该文件是 Huaban （滑板巡查） 项目的一部分。
// src/input/ffmpeg_input.rs - 基于 ffmpeg 子进程的视频解码
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

//! 用 `ffprobe` 读取视频尺寸与帧率，再让 `ffmpeg` 把视频解码成 RGB24
//! 原始数据写到标准输出，逐帧读取。需要系统安装 ffmpeg 命令行工具。

use std::{
  ffi::OsString,
  io::{ErrorKind, Read},
  path::Path,
  process::{Child, ChildStdout, Command, Stdio},
};

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::{
  frame::{VideoFrame, frame_size},
  input::{InputError, InputSource, normalize_fps},
  subprocess::StderrDrain,
};

#[derive(Debug, Deserialize)]
struct ProbeOutput {
  #[serde(default)]
  streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
  width: u32,
  height: u32,
  #[serde(default)]
  avg_frame_rate: Option<String>,
  #[serde(default)]
  r_frame_rate: Option<String>,
}

/// 解析 ffprobe 的 "30000/1001" 形式帧率，无法解析或分母为 0 时返回 0
fn parse_rate(rate: &str) -> f64 {
  match rate.split_once('/') {
    Some((num, den)) => {
      let num = num.trim().parse::<f64>().unwrap_or(0.0);
      let den = den.trim().parse::<f64>().unwrap_or(0.0);
      if den == 0.0 { 0.0 } else { num / den }
    }
    None => rate.trim().parse::<f64>().unwrap_or(0.0),
  }
}

/// 从 ffprobe 的 JSON 输出里取出 (宽, 高, 帧率)
fn parse_probe(json: &str) -> Result<(u32, u32, f64), InputError> {
  let probe: ProbeOutput =
    serde_json::from_str(json).map_err(|e| InputError::ProbeError(e.to_string()))?;
  let stream = probe
    .streams
    .into_iter()
    .next()
    .ok_or_else(|| InputError::ProbeError("找不到视频流".to_string()))?;

  if stream.width == 0 || stream.height == 0 {
    return Err(InputError::ProbeError(format!(
      "视频尺寸无效: {}x{}",
      stream.width, stream.height
    )));
  }

  let fps = [stream.avg_frame_rate, stream.r_frame_rate]
    .iter()
    .flatten()
    .map(|rate| parse_rate(rate))
    .find(|fps| *fps > 0.0)
    .unwrap_or(0.0);

  Ok((stream.width, stream.height, normalize_fps(fps)))
}

fn probe(path: &Path) -> Result<(u32, u32, f64), InputError> {
  let output = Command::new("ffprobe")
    .args(["-v", "error", "-select_streams", "v:0"])
    .args(["-show_entries", "stream=width,height,avg_frame_rate,r_frame_rate"])
    .args(["-of", "json"])
    .arg(path)
    .output()
    .map_err(|e| InputError::ProbeError(format!("无法执行 ffprobe (请确保已安装): {}", e)))?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    error!("ffprobe 错误: {}", stderr);
    return Err(InputError::ProbeError(stderr.trim().to_string()));
  }

  parse_probe(&String::from_utf8_lossy(&output.stdout))
}

/// 解码参数；关闭自动旋转，输出帧尺寸与 ffprobe 报告的存储尺寸一致
fn decoder_args(path: &Path) -> Vec<OsString> {
  let mut args: Vec<OsString> = ["-v", "error", "-nostdin", "-noautorotate", "-i"]
    .into_iter()
    .map(OsString::from)
    .collect();
  args.push(path.as_os_str().to_os_string());
  args.extend(
    ["-an", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"]
      .into_iter()
      .map(OsString::from),
  );
  args
}

/// ffmpeg 子进程视频输入
pub struct FfmpegInput {
  child: Child,
  stdout: ChildStdout,
  stderr: StderrDrain,
  width: u32,
  height: u32,
  fps: f64,
  frame_index: u64,
  finished: bool,
}

impl FfmpegInput {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, InputError> {
    let path = path.as_ref();
    let (width, height, fps) = probe(path)?;

    let mut child = Command::new("ffmpeg")
      .args(decoder_args(path))
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| InputError::DecodeError(format!("无法执行 ffmpeg (请确保已安装): {}", e)))?;

    let Some(stdout) = child.stdout.take() else {
      let _ = child.kill();
      let _ = child.wait();
      return Err(InputError::DecodeError("无法获取 ffmpeg 输出管道".to_string()));
    };
    let stderr = StderrDrain::spawn(&mut child);

    info!(
      "视频输入已打开: {} ({}x{} @ {:.2} fps)",
      path.display(),
      width,
      height,
      fps
    );

    Ok(Self {
      child,
      stdout,
      stderr,
      width,
      height,
      fps,
      frame_index: 0,
      finished: false,
    })
  }

  /// 读满一帧；遇到流结束返回 None
  fn read_frame(&mut self) -> Result<Option<Vec<u8>>, InputError> {
    let size = frame_size(self.width, self.height);
    let mut buf = vec![0u8; size];
    let mut filled = 0;

    while filled < size {
      match self.stdout.read(&mut buf[filled..]) {
        Ok(0) => break,
        Ok(n) => filled += n,
        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
        Err(e) => return Err(e.into()),
      }
    }

    if filled == size {
      return Ok(Some(buf));
    }

    self.wait_child()?;
    if filled > 0 {
      warn!("丢弃末尾不完整的帧: {} / {} 字节", filled, size);
    }
    Ok(None)
  }

  fn wait_child(&mut self) -> Result<(), InputError> {
    let status = self.child.wait()?;
    if status.success() {
      debug!("ffmpeg 解码进程正常退出");
      return Ok(());
    }

    let stderr = self.stderr.collect();
    error!("ffmpeg 解码失败: {}", stderr);
    Err(InputError::DecodeError(format!(
      "ffmpeg 退出状态 {}: {}",
      status, stderr
    )))
  }
}

impl Iterator for FfmpegInput {
  type Item = Result<VideoFrame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    match self.read_frame() {
      Ok(Some(data)) => {
        let index = self.frame_index;
        self.frame_index += 1;
        match VideoFrame::from_rgb24(self.width, self.height, data, index, self.fps) {
          Some(frame) => Some(Ok(frame)),
          None => {
            self.finished = true;
            Some(Err(InputError::DecodeError(format!(
              "第 {} 帧数据长度不匹配",
              index
            ))))
          }
        }
      }
      Ok(None) => {
        self.finished = true;
        None
      }
      Err(e) => {
        self.finished = true;
        Some(Err(e))
      }
    }
  }
}

impl InputSource for FfmpegInput {
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

impl Drop for FfmpegInput {
  fn drop(&mut self) {
    // 进程仍在运行（提前中止或读取出错）时结束它
    if let Ok(None) = self.child.try_wait() {
      if let Err(e) = self.child.kill() {
        debug!("结束 ffmpeg 解码进程失败: {}", e);
      }
      let _ = self.child.wait();
    }
  }
}
