// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Log tailing through a `tail -F` helper subprocess.
//!
//! Lines already buffered when a line completes are delivered together as one
//! batch, so a burst of output becomes one broadcast instead of hundreds.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::TailError;

/// Program used to follow log files.
pub const TAIL_PROGRAM: &str = "tail";

/// Maximum lines folded into one batch.
const MAX_BATCH_LINES: usize = 512;

/// Running log tail. Dropping it kills the helper process.
pub struct LogTail {
    batches: mpsc::Receiver<Vec<String>>,
    task: Option<JoinHandle<()>>,
}

impl LogTail {
    /// Spawn `tail -n <lines> -F` over the given files.
    pub fn spawn(files: &[PathBuf], lines: usize) -> Result<Self, TailError> {
        Self::spawn_program(TAIL_PROGRAM, files, lines)
    }

    pub fn spawn_program(
        program: &str,
        files: &[PathBuf],
        lines: usize,
    ) -> Result<Self, TailError> {
        if files.is_empty() {
            return Err(TailError::Spawn {
                reason: "no log files given".to_string(),
            });
        }

        let mut child = Command::new(program)
            .arg("-q")
            .arg("-n")
            .arg(lines.to_string())
            .arg("-F")
            .args(files)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TailError::Spawn {
                reason: format!("{}: {}", program, e),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| TailError::Spawn {
            reason: "helper stdout not captured".to_string(),
        })?;

        tracing::debug!(
            program = program,
            pid = child.id(),
            files = files.len(),
            "Spawned log tail"
        );

        let (tx, batches) = mpsc::channel(64);
        let task = tokio::spawn(async move {
            // Owning the child here ties its lifetime to the task.
            let _child = child;
            let mut reader = BufReader::new(stdout);
            let mut line = Vec::new();
            loop {
                let mut batch = Vec::new();
                loop {
                    line.clear();
                    match reader.read_until(b'\n', &mut line).await {
                        Ok(0) => {
                            if !batch.is_empty() {
                                let _ = tx.send(batch).await;
                            }
                            return;
                        }
                        Ok(_) => batch.push(decode_line(&line)),
                        Err(e) => {
                            tracing::warn!(error = %e, "Log tail read failed");
                            if !batch.is_empty() {
                                let _ = tx.send(batch).await;
                            }
                            return;
                        }
                    }
                    if batch.len() >= MAX_BATCH_LINES || !reader.buffer().contains(&b'\n') {
                        break;
                    }
                }
                if tx.send(batch).await.is_err() {
                    return;
                }
            }
        });

        Ok(Self {
            batches,
            task: Some(task),
        })
    }

    /// Build a tail fed by an arbitrary batch source.
    pub fn from_receiver(batches: mpsc::Receiver<Vec<String>>) -> Self {
        Self {
            batches,
            task: None,
        }
    }

    /// Next batch of lines; `None` once the helper exited.
    pub async fn next_batch(&mut self) -> Option<Vec<String>> {
        self.batches.recv().await
    }
}

impl Drop for LogTail {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Decode one raw line, replacing invalid UTF-8 and trimming the line end.
fn decode_line(raw: &[u8]) -> String {
    trim_line_end(&String::from_utf8_lossy(raw)).to_string()
}

/// Strip trailing CR/LF/TAB characters.
pub fn trim_line_end(line: &str) -> &str {
    line.trim_end_matches(&['\r', '\n', '\t'][..])
}
