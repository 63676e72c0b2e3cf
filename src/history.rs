// 该文件是 Huaban （滑板巡查） 项目的一部分。
// src/history.rs - 处理历史记录
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

//! # 历史记录模块
//!
//! 每个成功的会话追加一条记录到 JSON 文件（格式化的数组）。
//! 文件损坏时追加操作会以新数组覆盖它并给出警告。

use std::{
  fs,
  io::Write,
  path::{Path, PathBuf},
};

use chrono::Local;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::aggregate::SessionResult;

pub const TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M";

const CSV_HEADER: &str = "timestamp,source_filename,violation,frame_count";

#[derive(Error, Debug)]
pub enum HistoryError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("历史记录格式错误: {0}")]
  ParseError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
  pub timestamp: String,
  pub source_filename: String,
  pub violation: bool,
  pub frame_count: u64,
}

impl HistoryRecord {
  /// 以当前本地时间生成记录
  pub fn new(source_filename: impl Into<String>, result: &SessionResult) -> Self {
    Self {
      timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
      source_filename: source_filename.into(),
      violation: result.violation_detected,
      frame_count: result.frame_count,
    }
  }

  fn csv_row(&self) -> String {
    format!(
      "{},{},{},{}",
      csv_field(&self.timestamp),
      csv_field(&self.source_filename),
      self.violation,
      self.frame_count
    )
  }
}

fn csv_field(value: &str) -> String {
  if value.contains([',', '"', '\n', '\r']) {
    format!("\"{}\"", value.replace('"', "\"\""))
  } else {
    value.to_string()
  }
}

/// JSON 文件形式的历史记录
#[derive(Debug, Clone)]
pub struct JsonHistory {
  path: PathBuf,
}

impl JsonHistory {
  pub fn new<P: AsRef<Path>>(path: P) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// 读取全部记录，文件不存在时返回空列表
  pub fn all(&self) -> Result<Vec<HistoryRecord>, HistoryError> {
    let content = match fs::read_to_string(&self.path) {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(e.into()),
    };
    if content.trim().is_empty() {
      return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&content)?)
  }

  pub fn append(&self, record: HistoryRecord) -> Result<(), HistoryError> {
    let mut records = match self.all() {
      Ok(records) => records,
      Err(HistoryError::ParseError(e)) => {
        warn!(
          "历史记录文件 {} 已损坏，将被覆盖: {}",
          self.path.display(),
          e
        );
        Vec::new()
      }
      Err(e) => return Err(e),
    };
    records.push(record);
    self.store(&records)
  }

  fn store(&self, records: &[HistoryRecord]) -> Result<(), HistoryError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      fs::create_dir_all(parent)?;
    }
    // 先写临时文件再改名，避免中途失败留下半个文件
    let tmp = self.path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(records)?;
    fs::write(&tmp, json)?;
    fs::rename(&tmp, &self.path)?;
    Ok(())
  }

  /// 导出为 CSV，历史为空时不写文件并返回 `false`
  pub fn export_csv<P: AsRef<Path>>(&self, path: P) -> Result<bool, HistoryError> {
    let records = self.all()?;
    if records.is_empty() {
      info!("历史记录为空，跳过导出");
      return Ok(false);
    }

    let path = path.as_ref();
    let mut file = fs::File::create(path)?;
    writeln!(file, "{}", CSV_HEADER)?;
    for record in &records {
      writeln!(file, "{}", record.csv_row())?;
    }
    info!("已导出 {} 条记录到 {}", records.len(), path.display());
    Ok(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(name: &str, violation: bool, frames: u64) -> HistoryRecord {
    HistoryRecord {
      timestamp: "19.10.2026 14:03".to_string(),
      source_filename: name.to_string(),
      violation,
      frame_count: frames,
    }
  }

  #[test]
  fn missing_file_reads_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    let history = JsonHistory::new(dir.path().join("history.json"));
    assert!(history.all().unwrap().is_empty());
  }

  #[test]
  fn append_keeps_order() {
    let dir = tempfile::tempdir().unwrap();
    let history = JsonHistory::new(dir.path().join("history.json"));
    history.append(record("a.mp4", true, 10)).unwrap();
    history.append(record("b.mp4", false, 20)).unwrap();

    let records = history.all().unwrap();
    assert_eq!(records, vec![record("a.mp4", true, 10), record("b.mp4", false, 20)]);
  }

  #[test]
  fn corrupt_file_is_replaced_on_append() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");
    fs::write(&path, "{ not json").unwrap();
    let history = JsonHistory::new(&path);

    assert!(matches!(history.all(), Err(HistoryError::ParseError(_))));
    history.append(record("c.mp4", false, 1)).unwrap();
    assert_eq!(history.all().unwrap(), vec![record("c.mp4", false, 1)]);
  }

  #[test]
  fn new_record_uses_day_first_timestamp() {
    let result = SessionResult {
      violation_detected: true,
      frame_count: 42,
    };
    let record = HistoryRecord::new("clip.mp4", &result);
    assert!(record.violation);
    assert_eq!(record.frame_count, 42);
    assert!(chrono::NaiveDateTime::parse_from_str(&record.timestamp, TIMESTAMP_FORMAT).is_ok());
  }

  #[test]
  fn export_empty_history_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let history = JsonHistory::new(dir.path().join("history.json"));
    let report = dir.path().join("report.csv");
    assert!(!history.export_csv(&report).unwrap());
    assert!(!report.exists());
  }

  #[test]
  fn export_escapes_fields() {
    let dir = tempfile::tempdir().unwrap();
    let history = JsonHistory::new(dir.path().join("history.json"));
    history.append(record("plain.mp4", true, 3)).unwrap();
    history.append(record("a,\"b\".mp4", false, 4)).unwrap();
    let report = dir.path().join("report.csv");

    assert!(history.export_csv(&report).unwrap());
    let csv = fs::read_to_string(&report).unwrap();
    let lines: Vec<_> = csv.lines().collect();
    assert_eq!(lines[0], CSV_HEADER);
    assert_eq!(lines[1], "19.10.2026 14:03,plain.mp4,true,3");
    assert_eq!(lines[2], "19.10.2026 14:03,\"a,\"\"b\"\".mp4\",false,4");
  }
}
