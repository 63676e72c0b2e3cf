// 该文件是 Huaban （滑板巡查） 项目的一部分。
// src/task.rs - 逐帧检测任务
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

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Instant,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  aggregate::{FrameOutcome, SessionResult, ViolationAggregator},
  association::match_skateboards,
  input::{InputError, InputSource},
  model::{DetectParams, Detector, FrameDetections},
  output::{OutputError, OutputSink, draw::FrameAnnotator},
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: &mut M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 会话取消标记，可在其他线程（如 Ctrl-C 处理函数）中触发
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("视频解码失败: {0}")]
  Input(#[from] InputError),
  #[error("检测器调用失败: {0}")]
  Detector(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("视频编码失败: {0}")]
  Output(#[from] OutputError),
  #[error("任务已取消")]
  Cancelled,
}

/// 逐帧扫描滑板骑行违规
///
/// 每帧依次：取帧、检测、按类别拆分、关联、绘制、写入编码器、汇总。
/// 任何错误都会中止任务并丢弃编码器的输出，不产生部分结果。
pub struct ViolationScanTask<'a> {
  params: DetectParams,
  annotator: &'a FrameAnnotator,
  cancel: CancelToken,
}

impl<'a> ViolationScanTask<'a> {
  pub fn new(annotator: &'a FrameAnnotator) -> Self {
    Self {
      params: DetectParams::default(),
      annotator,
      cancel: CancelToken::default(),
    }
  }

  pub fn with_params(mut self, params: DetectParams) -> Self {
    self.params = params;
    self
  }

  pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  fn check_cancelled(&self) -> Result<(), TaskError> {
    if self.cancel.is_cancelled() {
      warn!("收到取消请求，中止任务");
      return Err(TaskError::Cancelled);
    }
    Ok(())
  }

  fn scan<I, M, O>(
    &self,
    input: I,
    model: &mut M,
    output: &mut O,
  ) -> Result<SessionResult, TaskError>
  where
    I: InputSource,
    M: Detector,
    O: OutputSink,
  {
    let (width, height) = (input.width(), input.height());
    let mut aggregator = ViolationAggregator::default();
    let started = Instant::now();

    for frame in input {
      self.check_cancelled()?;
      let mut frame = frame?;

      let now = Instant::now();
      let detections = model
        .detect(&frame, &self.params)
        .map_err(|e| TaskError::Detector(Box::new(e)))?;
      let elapsed_detect = now.elapsed();
      self.check_cancelled()?;

      let FrameDetections {
        persons,
        skateboards,
      } = FrameDetections::partition(detections, width, height);
      let verdicts = match_skateboards(&skateboards, &persons);
      self
        .annotator
        .annotate(&mut frame.image, &skateboards, &verdicts);

      let outcome = FrameOutcome::new(frame, verdicts);
      output.write_frame(&outcome.frame.image)?;
      aggregator.observe(&outcome);

      debug!(
        "帧 {}: {} 人, {} 块滑板, 违规: {}, 推理耗时 {:.2?}",
        outcome.frame.index,
        persons.len(),
        skateboards.len(),
        outcome.any_violation,
        elapsed_detect
      );
    }

    info!(
      "共处理 {} 帧，其中 {} 帧存在违规，耗时 {:.2?}",
      aggregator.frame_count(),
      aggregator.violation_frames(),
      started.elapsed()
    );
    Ok(aggregator.finalize())
  }
}

impl<I, M, O> Task<I, M, O> for ViolationScanTask<'_>
where
  I: InputSource,
  M: Detector,
  O: OutputSink,
{
  type Output = SessionResult;
  type Error = TaskError;

  fn run_task(self, input: I, model: &mut M, mut output: O) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    model.reset();

    let result = self
      .scan(input, model, &mut output)
      .and_then(|result| output.finish().map(|_| result).map_err(TaskError::from));

    match result {
      Ok(result) => {
        info!(
          "任务完成: 违规 = {}, 帧数 = {}",
          result.violation_detected, result.frame_count
        );
        Ok(result)
      }
      Err(e) => {
        error!("任务失败: {}", e);
        output.abort();
        Err(e)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{fmt, vec::IntoIter};

  use image::RgbImage;

  use super::*;
  use crate::{
    frame::VideoFrame,
    model::{BoundingBox, ClassTag},
  };

  struct VecInput {
    frames: IntoIter<Result<VideoFrame, InputError>>,
  }

  impl VecInput {
    fn blank(count: u64) -> Self {
      let frames: Vec<_> = (0..count)
        .map(|i| Ok(VideoFrame::new(RgbImage::new(64, 64), i, 30.0)))
        .collect();
      Self {
        frames: frames.into_iter(),
      }
    }
  }

  impl Iterator for VecInput {
    type Item = Result<VideoFrame, InputError>;

    fn next(&mut self) -> Option<Self::Item> {
      self.frames.next()
    }
  }

  impl InputSource for VecInput {
    fn width(&self) -> u32 {
      64
    }

    fn height(&self) -> u32 {
      64
    }

    fn fps(&self) -> f64 {
      30.0
    }
  }

  #[derive(Debug)]
  struct Broken;

  impl fmt::Display for Broken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "broken")
    }
  }

  impl std::error::Error for Broken {}

  #[derive(Default)]
  struct Scripted {
    frames: Vec<Vec<BoundingBox>>,
    calls: usize,
    resets: usize,
    fail_at: Option<usize>,
  }

  impl Detector for Scripted {
    type Error = Broken;

    fn detect(
      &mut self,
      _frame: &VideoFrame,
      _params: &DetectParams,
    ) -> Result<Vec<BoundingBox>, Self::Error> {
      let call = self.calls;
      self.calls += 1;
      if self.fail_at == Some(call) {
        return Err(Broken);
      }
      Ok(self.frames.get(call).cloned().unwrap_or_default())
    }

    fn reset(&mut self) {
      self.resets += 1;
    }
  }

  #[derive(Default)]
  struct Recorder {
    written: usize,
    finished: bool,
    aborted: bool,
  }

  impl OutputSink for Recorder {
    fn write_frame(&mut self, _image: &RgbImage) -> Result<(), OutputError> {
      self.written += 1;
      Ok(())
    }

    fn finish(&mut self) -> Result<(), OutputError> {
      self.finished = true;
      Ok(())
    }

    fn abort(&mut self) {
      self.aborted = true;
    }
  }

  fn riding_frame() -> Vec<BoundingBox> {
    vec![
      BoundingBox::new([10.0, 0.0, 40.0, 50.0], ClassTag::Person, 0.9),
      BoundingBox::new([20.0, 45.0, 30.0, 52.0], ClassTag::Skateboard, 0.9),
    ]
  }

  #[test]
  fn reports_violation_and_frame_count() {
    let annotator = FrameAnnotator::default();
    let mut detector = Scripted {
      frames: vec![vec![], riding_frame(), vec![]],
      ..Default::default()
    };
    let mut sink = Recorder::default();

    let result = ViolationScanTask::new(&annotator)
      .run_task(VecInput::blank(3), &mut detector, &mut sink)
      .unwrap();

    assert!(result.violation_detected);
    assert_eq!(result.frame_count, 3);
    assert_eq!(sink.written, 3);
    assert!(sink.finished);
    assert!(!sink.aborted);
    assert_eq!(detector.resets, 1);
  }

  #[test]
  fn detector_failure_aborts_output() {
    let annotator = FrameAnnotator::default();
    let mut detector = Scripted {
      fail_at: Some(1),
      ..Default::default()
    };
    let mut sink = Recorder::default();

    let err = ViolationScanTask::new(&annotator)
      .run_task(VecInput::blank(3), &mut detector, &mut sink)
      .unwrap_err();

    assert!(matches!(err, TaskError::Detector(_)));
    assert_eq!(sink.written, 1);
    assert!(sink.aborted);
    assert!(!sink.finished);
  }

  #[test]
  fn decode_error_mid_stream_aborts_output() {
    let annotator = FrameAnnotator::default();
    let mut detector = Scripted::default();
    let mut sink = Recorder::default();
    let input = VecInput {
      frames: vec![
        Ok(VideoFrame::new(RgbImage::new(64, 64), 0, 30.0)),
        Err(InputError::DecodeError("truncated".to_string())),
      ]
      .into_iter(),
    };

    let err = ViolationScanTask::new(&annotator)
      .run_task(input, &mut detector, &mut sink)
      .unwrap_err();

    assert!(matches!(err, TaskError::Input(_)));
    assert!(sink.aborted);
  }

  #[test]
  fn cancelled_token_stops_before_first_frame() {
    let annotator = FrameAnnotator::default();
    let mut detector = Scripted::default();
    let mut sink = Recorder::default();
    let cancel = CancelToken::default();
    cancel.cancel();

    let err = ViolationScanTask::new(&annotator)
      .with_cancel_token(cancel.clone())
      .run_task(VecInput::blank(3), &mut detector, &mut sink)
      .unwrap_err();

    assert!(matches!(err, TaskError::Cancelled));
    assert_eq!(detector.calls, 0);
    assert!(sink.aborted);
    assert!(cancel.is_cancelled());
  }

  #[test]
  fn empty_video_finishes_clean() {
    let annotator = FrameAnnotator::default();
    let mut detector = Scripted::default();
    let mut sink = Recorder::default();

    let result = ViolationScanTask::new(&annotator)
      .run_task(VecInput::blank(0), &mut detector, &mut sink)
      .unwrap();

    assert_eq!(result, SessionResult::default());
    assert!(sink.finished);
  }
}
