// 该文件是 Huaban （滑板巡查） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::{Result, bail};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use huaban::{
  FromUrl,
  history::JsonHistory,
  model::ModelWrapper,
  output::draw::FrameAnnotator,
  session::{ProcessConfig, SessionError, process_video},
  task::{CancelToken, TaskError},
};

use args::{Args, Command, ProcessArgs};

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();
  let history = JsonHistory::new(&args.history);

  match args.command {
    Command::Process(process) => run_process(process, &history),
    Command::History => list_history(&history),
    Command::Export { output } => {
      if history.export_csv(&output)? {
        println!("{}", output.display());
      } else {
        warn!("历史记录为空，未生成报告");
      }
      Ok(())
    }
  }
}

fn run_process(args: ProcessArgs, history: &JsonHistory) -> Result<()> {
  info!("模型: {}", args.model);
  info!("编解码后端: {}", args.backend);
  info!("结果目录: {}", args.results_dir.display());

  let annotator = match &args.font {
    Some(font) => FrameAnnotator::from_font_file(font)?,
    None => FrameAnnotator::default(),
  };

  info!("正在加载模型...");
  let mut model = ModelWrapper::from_url(&args.model)?;
  info!("模型加载完成");

  let cancel = CancelToken::default();
  {
    let cancel = cancel.clone();
    ctrlc::set_handler(move || {
      info!("收到 Ctrl-C，正在停止...");
      cancel.cancel();
    })?;
  }

  let mut config = ProcessConfig::new(&args.results_dir);
  config.backend = args.backend;
  config.discard_input = args.discard_input;

  let mut failed = 0usize;
  for input in &args.inputs {
    if cancel.is_cancelled() {
      break;
    }
    match process_video(&mut model, input, &config, &annotator, history, &cancel) {
      Ok(report) => {
        let verdict = if report.result.violation_detected {
          "违规"
        } else {
          "正常"
        };
        println!(
          "{}\t{}\t{} 帧\t{}",
          input.display(),
          verdict,
          report.result.frame_count,
          report.video_path.display()
        );
      }
      Err(SessionError::Task(TaskError::Cancelled)) => {
        warn!("已取消: {}", input.display());
        break;
      }
      Err(e) => {
        error!("{}: {}", input.display(), e);
        failed += 1;
      }
    }
  }

  if cancel.is_cancelled() {
    bail!("处理已被用户取消");
  }
  if failed > 0 {
    bail!("{} 个视频处理失败", failed);
  }
  Ok(())
}

fn list_history(history: &JsonHistory) -> Result<()> {
  let records = history.all()?;
  if records.is_empty() {
    info!("历史记录为空");
    return Ok(());
  }
  for record in records {
    println!(
      "{}\t{}\t{}\t{}",
      record.timestamp,
      record.source_filename,
      if record.violation { "违规" } else { "正常" },
      record.frame_count
    );
  }
  Ok(())
}
