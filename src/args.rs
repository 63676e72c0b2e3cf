// 该文件是 Huaban （滑板巡查） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use url::Url;

use huaban::input::VideoBackend;

/// Huaban 滑板骑行检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 历史记录文件
  #[arg(long, default_value = "history.json", value_name = "FILE", global = true)]
  pub history: PathBuf,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 处理一个或多个视频文件
  Process(ProcessArgs),
  /// 列出历史记录
  History,
  /// 把历史记录导出为 CSV
  Export {
    #[arg(long, default_value = "report_skate.csv", value_name = "FILE")]
    output: PathBuf,
  },
}

#[derive(ClapArgs, Debug)]
pub struct ProcessArgs {
  /// 检测模型
  /// 支持格式:
  /// - 回放: replay:///path/to/detections.jsonl
  /// - RKNN: yolo26:///path/to/model.rknn （需要 model_yolo26 特性）
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 视频编解码后端
  #[arg(long, default_value = "ffmpeg", value_name = "BACKEND")]
  pub backend: VideoBackend,

  /// 结果视频目录
  #[arg(long, default_value = "results", value_name = "DIR")]
  pub results_dir: PathBuf,

  /// 标签字体文件（TTF/OTF），不指定时使用内置字体
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 处理结束后删除源视频
  #[arg(long)]
  pub discard_input: bool,

  /// 待处理的视频文件
  #[arg(required = true, value_name = "VIDEO")]
  pub inputs: Vec<PathBuf>,
}
