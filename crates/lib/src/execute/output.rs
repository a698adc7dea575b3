//! Live output streaming from a build process.
//!
//! Reader tasks forward each line of stdout and stderr over an mpsc channel
//! to one writer task. The writer is the only owner of the log file, echoes
//! lines to the terminal when asked, and keeps a bounded tail for reports.

use std::collections::VecDeque;
use std::io::Write as _;
use std::path::PathBuf;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
  Stdout,
  Stderr,
}

#[derive(Debug, Clone)]
pub struct OutputLine {
  pub stream: Stream,
  pub line: String,
}

/// Forward every line of `reader` to `tx`. Invalid UTF-8 is replaced rather
/// than ending the stream, so the pipe is always drained.
pub fn spawn_reader<R>(reader: R, stream: Stream, tx: mpsc::Sender<OutputLine>) -> JoinHandle<()>
where
  R: AsyncRead + Unpin + Send + 'static,
{
  tokio::spawn(async move {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
      buf.clear();
      match reader.read_until(b'\n', &mut buf).await {
        Ok(0) | Err(_) => break,
        Ok(_) => {
          let line = String::from_utf8_lossy(&buf).trim_end_matches(['\n', '\r']).to_string();
          if tx.send(OutputLine { stream, line }).await.is_err() {
            break;
          }
        }
      }
    }
  })
}

/// Handle to the writer task.
pub struct LogWriter {
  handle: JoinHandle<std::io::Result<Vec<String>>>,
}

impl LogWriter {
  /// Start the writer. It runs until every sender of `rx` is dropped.
  pub fn spawn(
    path: PathBuf,
    recipe: String,
    echo: bool,
    tail_lines: usize,
    mut rx: mpsc::Receiver<OutputLine>,
  ) -> Self {
    let handle = tokio::spawn(async move {
      let file = File::create(&path).await?;
      let mut log = BufWriter::new(file);
      let mut tail: VecDeque<String> = VecDeque::with_capacity(tail_lines);

      while let Some(OutputLine { stream, line }) = rx.recv().await {
        log.write_all(line.as_bytes()).await?;
        log.write_all(b"\n").await?;

        if echo {
          // Terminal echo failures must not fail the build
          let _ = match stream {
            Stream::Stdout => writeln!(std::io::stdout(), "[{recipe}] {line}"),
            Stream::Stderr => writeln!(std::io::stderr(), "[{recipe}] {line}"),
          };
        }

        if tail_lines > 0 {
          if tail.len() == tail_lines {
            tail.pop_front();
          }
          tail.push_back(line);
        }
      }

      log.flush().await?;
      Ok(tail.into())
    });

    Self { handle }
  }

  /// Wait for the writer to drain and return the captured tail.
  pub async fn finish(self) -> std::io::Result<Vec<String>> {
    self.handle.await.map_err(std::io::Error::other)?
  }
}
