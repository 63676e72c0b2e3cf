// 该文件是 Huaban （滑板巡查） 项目的一部分。
// src/session.rs - 单个视频的完整处理会话
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

//! # 会话模块
//!
//! 解码、检测、绘制、编码、转码、写历史，串成一次会话。
//! 只有全部成功才写入历史记录；任何失败都会清理本次会话产生的文件。

use std::{
  path::{Path, PathBuf},
  sync::atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  aggregate::SessionResult,
  history::{HistoryError, HistoryRecord, JsonHistory},
  input::{InputError, InputSource, InputWrapper, VideoBackend},
  model::{DetectParams, Detector},
  output::{OutputError, OutputWrapper, draw::FrameAnnotator, remove_partial},
  task::{CancelToken, Task, TaskError, ViolationScanTask},
  transcode::{TranscodeError, Transcoder},
};

static SESSION_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error(transparent)]
  Input(#[from] InputError),
  #[error(transparent)]
  Output(#[from] OutputError),
  #[error(transparent)]
  Task(#[from] TaskError),
  #[error(transparent)]
  Transcode(#[from] TranscodeError),
  #[error("写入历史记录失败: {0}")]
  History(#[from] HistoryError),
}

#[derive(Debug, Clone)]
pub struct ProcessConfig {
  /// 结果视频所在目录
  pub results_dir: PathBuf,
  pub backend: VideoBackend,
  pub params: DetectParams,
  /// 处理结束后删除源视频
  pub discard_input: bool,
  pub transcoder: Transcoder,
}

impl ProcessConfig {
  pub fn new<P: AsRef<Path>>(results_dir: P) -> Self {
    Self {
      results_dir: results_dir.as_ref().to_path_buf(),
      backend: VideoBackend::default(),
      params: DetectParams::default(),
      discard_input: false,
      transcoder: Transcoder::default(),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
  pub result: SessionResult,
  /// 可直接播放的结果视频
  pub video_path: PathBuf,
}

/// 本次会话使用的文件名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
  pub raw: PathBuf,
  pub web: PathBuf,
}

impl SessionPaths {
  pub fn new(results_dir: &Path, source: &Path, now: DateTime<Local>) -> Self {
    let stem = source
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .filter(|s| !s.is_empty())
      .unwrap_or_else(|| "video".to_string());
    let seq = SESSION_SEQ.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    let raw = results_dir.join(format!(
      "{}_{}_{}_{}_raw.mp4",
      stem,
      now.format("%Y%m%d%H%M%S%3f"),
      pid,
      seq
    ));
    let web = results_dir.join(format!(
      "web_{}_{}_{}_{}.mp4",
      now.format("%H%M%S"),
      pid,
      seq,
      stem
    ));
    Self { raw, web }
  }
}

fn source_filename(path: &Path) -> String {
  path
    .file_name()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_else(|| path.display().to_string())
}

/// 处理一个视频文件
pub fn process_video<D: Detector>(
  detector: &mut D,
  source: &Path,
  config: &ProcessConfig,
  annotator: &FrameAnnotator,
  history: &JsonHistory,
  cancel: &CancelToken,
) -> Result<SessionReport, SessionError> {
  info!("开始处理视频: {}", source.display());
  let paths = SessionPaths::new(&config.results_dir, source, Local::now());

  let result = run_session(detector, source, config, annotator, history, cancel, &paths);

  if let Err(e) = &result {
    error!("处理 {} 失败: {}", source.display(), e);
    remove_partial(&paths.raw);
    // 转码失败时转码器已清理 web；只有转码之后的失败才需要删掉本次的结果
    if matches!(e, SessionError::History(_)) {
      remove_partial(&paths.web);
    }
  }
  if config.discard_input
    && let Err(e) = std::fs::remove_file(source)
  {
    warn!("删除源视频 {} 失败: {}", source.display(), e);
  }
  result
}

fn run_session<D: Detector>(
  detector: &mut D,
  source: &Path,
  config: &ProcessConfig,
  annotator: &FrameAnnotator,
  history: &JsonHistory,
  cancel: &CancelToken,
  paths: &SessionPaths,
) -> Result<SessionReport, SessionError> {
  std::fs::create_dir_all(&config.results_dir)?;

  let input = InputWrapper::open(config.backend, source)?;
  info!(
    "视频已打开: {}x{} @ {:.2} fps",
    input.width(),
    input.height(),
    input.fps()
  );
  let output = OutputWrapper::create(
    config.backend,
    &paths.raw,
    input.width(),
    input.height(),
    input.fps(),
  )?;

  let result = ViolationScanTask::new(annotator)
    .with_params(config.params)
    .with_cancel_token(cancel.clone())
    .run_task(input, detector, output)?;

  config.transcoder.transcode(&paths.raw, &paths.web)?;

  history.append(HistoryRecord::new(source_filename(source), &result))?;

  info!(
    "会话完成: {} -> {} (违规: {}, 帧数: {})",
    source.display(),
    paths.web.display(),
    result.violation_detected,
    result.frame_count
  );
  Ok(SessionReport {
    result,
    video_path: paths.web.clone(),
  })
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;
  use crate::model::ReplayDetector;

  #[test]
  fn paths_follow_naming_scheme() {
    let now = Local.with_ymd_and_hms(2026, 10, 19, 14, 3, 9).unwrap();
    let paths = SessionPaths::new(Path::new("/results"), Path::new("/tmp/park.mov"), now);

    let raw = paths.raw.file_name().unwrap().to_string_lossy().into_owned();
    assert!(raw.starts_with("park_20261019140309000_"));
    assert!(raw.ends_with("_raw.mp4"));
    let web = paths.web.file_name().unwrap().to_string_lossy().into_owned();
    assert!(web.starts_with(&format!("web_140309_{}_", std::process::id())));
    assert!(web.ends_with("_park.mp4"));
    assert_eq!(paths.web.parent(), Some(Path::new("/results")));
  }

  #[test]
  fn concurrent_sessions_get_distinct_files() {
    let now = Local::now();
    let a = SessionPaths::new(Path::new("r"), Path::new("clip.mp4"), now);
    let b = SessionPaths::new(Path::new("r"), Path::new("clip.mp4"), now);
    assert_ne!(a.raw, b.raw);
    assert_ne!(a.web, b.web);
  }

  #[test]
  fn failed_session_keeps_earlier_results() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("results");
    std::fs::create_dir_all(&results).unwrap();
    let now = Local::now();
    let earlier = [
      results.join(format!("web_{}_clip.mp4", now.format("%H%M%S"))),
      SessionPaths::new(&results, Path::new("clip.mp4"), now).web,
    ];
    for path in &earlier {
      std::fs::write(path, b"finished").unwrap();
    }

    let other = dir.path().join("other");
    std::fs::create_dir_all(&other).unwrap();
    let source = other.join("clip.mp4");
    std::fs::write(&source, b"definitely not a video").unwrap();
    let history = JsonHistory::new(dir.path().join("history.json"));
    let mut detector = ReplayDetector::parse("").unwrap();

    let outcome = process_video(
      &mut detector,
      &source,
      &ProcessConfig::new(&results),
      &FrameAnnotator::default(),
      &history,
      &CancelToken::default(),
    );

    assert!(outcome.is_err());
    assert!(source.exists());
    for path in &earlier {
      assert!(path.exists(), "{} was removed", path.display());
    }
  }

  #[test]
  fn failed_session_cleans_up_and_skips_history() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("broken.mp4");
    std::fs::write(&source, b"definitely not a video").unwrap();
    let results = dir.path().join("results");
    let history = JsonHistory::new(dir.path().join("history.json"));

    let mut config = ProcessConfig::new(&results);
    config.discard_input = true;
    let mut detector = ReplayDetector::parse("").unwrap();

    let outcome = process_video(
      &mut detector,
      &source,
      &config,
      &FrameAnnotator::default(),
      &history,
      &CancelToken::default(),
    );

    assert!(outcome.is_err());
    assert!(!source.exists());
    assert!(history.all().unwrap().is_empty());
    let leftovers = std::fs::read_dir(&results)
      .map(|entries| entries.count())
      .unwrap_or(0);
    assert_eq!(leftovers, 0);
  }
}
