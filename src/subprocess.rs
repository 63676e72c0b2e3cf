// 该文件是 Huaban （滑板巡查） 项目的一部分。
// src/subprocess.rs - 外部进程的标准错误收集
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
  io::{ErrorKind, Read},
  process::Child,
  thread::{self, JoinHandle},
};

use tracing::debug;

/// 只保留标准错误最后这么多字节
const STDERR_TAIL: usize = 16 * 1024;

/// 在后台线程持续读取子进程的标准错误
///
/// 管道写满后子进程会阻塞，所以必须边运行边读。
pub(crate) struct StderrDrain {
  handle: Option<JoinHandle<String>>,
}

impl StderrDrain {
  pub(crate) fn spawn(child: &mut Child) -> Self {
    let handle = child.stderr.take().map(|mut pipe| {
      thread::spawn(move || {
        let mut tail = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
          match pipe.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
              tail.extend_from_slice(&buf[..n]);
              if tail.len() > STDERR_TAIL {
                let excess = tail.len() - STDERR_TAIL;
                tail.drain(..excess);
              }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
              debug!("读取子进程标准错误失败: {}", e);
              break;
            }
          }
        }
        String::from_utf8_lossy(&tail).trim().to_string()
      })
    });
    Self { handle }
  }

  /// 取出收集到的内容，需在子进程退出后调用
  pub(crate) fn collect(&mut self) -> String {
    self
      .handle
      .take()
      .and_then(|handle| handle.join().ok())
      .unwrap_or_default()
  }
}

#[cfg(all(test, unix))]
mod tests {
  use std::process::{Command, Stdio};

  use super::*;

  #[test]
  fn noisy_child_does_not_block_on_stderr() {
    // 先写 256 KiB 到标准错误，超过管道容量
    let mut child = Command::new("sh")
      .args(["-c", "head -c 262144 /dev/zero | tr '\\0' e >&2; echo done"])
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .unwrap();
    let mut drain = StderrDrain::spawn(&mut child);

    let mut stdout = String::new();
    child
      .stdout
      .take()
      .unwrap()
      .read_to_string(&mut stdout)
      .unwrap();
    assert!(child.wait().unwrap().success());
    assert_eq!(stdout.trim(), "done");

    let stderr = drain.collect();
    assert_eq!(stderr.len(), STDERR_TAIL);
    assert!(stderr.chars().all(|c| c == 'e'));
  }

  #[test]
  fn collect_without_pipe_is_empty() {
    let mut child = Command::new("true").spawn().unwrap();
    let mut drain = StderrDrain::spawn(&mut child);
    child.wait().unwrap();
    assert!(drain.collect().is_empty());
  }
}
