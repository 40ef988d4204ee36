//! Pseudo-terminal shell session
//!
//! One interactive shell per supervisor, spawned on a PTY with fixed
//! geometry. All output is fanned out in order to the log sink and the
//! viewer channel by a single reader thread; all input goes through a
//! single writer task, so dispatched commands never interleave.

use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, PtySize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::error::{Result, SupervisorError};
use crate::viewer::ViewerFrame;

/// Fixed terminal geometry for the shell session
pub const PTY_ROWS: u16 = 30;
pub const PTY_COLS: u16 = 120;

/// A live shell session on a PTY
pub struct PtyShell {
    writer_tx: mpsc::Sender<Vec<u8>>,
    killer: StdMutex<Option<Box<dyn ChildKiller + Send + Sync>>>,
    alive: Arc<AtomicBool>,
}

impl PtyShell {
    /// Spawn a fresh interactive shell.
    ///
    /// The log file at `log_path` is truncated: a new session always starts
    /// with an empty sink, with no carry-over from its predecessor.
    pub fn spawn(
        shell: &str,
        env: Vec<(String, String)>,
        log_path: &Path,
        frames: broadcast::Sender<ViewerFrame>,
    ) -> Result<Self> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log = std::fs::File::create(log_path)?;

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: PTY_ROWS,
                cols: PTY_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SupervisorError::spawn_failed(format!("openpty: {}", e)))?;

        let mut cmd = CommandBuilder::new(shell);
        cmd.env("TERM", "xterm-256color");
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SupervisorError::spawn_failed(format!("{}: {}", shell, e)))?;
        let killer = child.clone_killer();

        info!(shell, rows = PTY_ROWS, cols = PTY_COLS, "Shell spawned");

        let alive = Arc::new(AtomicBool::new(true));

        // Reader thread: PTY output -> log sink + viewer frames, in order
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SupervisorError::spawn_failed(format!("clone reader: {}", e)))?;
        let reader_alive = Arc::clone(&alive);
        let reader_frames = frames.clone();
        std::thread::spawn(move || {
            let mut log = log;
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Err(e) = log.write_all(&buf[..n]) {
                            warn!("Log sink write failed: {}", e);
                        }
                        let data = String::from_utf8_lossy(&buf[..n]).to_string();
                        let _ = reader_frames.send(ViewerFrame::Output { data });
                    }
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            reader_alive.store(false, Ordering::Release);
            debug!("PTY reader finished");
            let _ = reader_frames.send(ViewerFrame::Log {
                line: "shell session ended".to_string(),
            });
        });

        // Writer task: the only path to PTY stdin
        let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(128);
        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| SupervisorError::spawn_failed(format!("take writer: {}", e)))?;
        tokio::task::spawn_blocking(move || {
            while let Some(bytes) = writer_rx.blocking_recv() {
                if writer.write_all(&bytes).is_err() {
                    break;
                }
                let _ = writer.flush();
            }
        });

        // Reap the child so it never lingers as a zombie
        std::thread::spawn(move || {
            let _ = child.wait();
        });

        Ok(Self {
            writer_tx,
            killer: StdMutex::new(Some(killer)),
            alive,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Queue raw bytes for the shell's stdin
    pub async fn write_bytes(&self, bytes: Vec<u8>) -> Result<()> {
        self.writer_tx
            .send(bytes)
            .await
            .map_err(|_| SupervisorError::ShellNotRunning)
    }

    /// Queue a command line followed by a newline
    pub async fn write_line(&self, line: &str) -> Result<()> {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        self.write_bytes(bytes).await
    }

    /// Kill the shell process. Idempotent.
    pub fn kill(&self) {
        if let Ok(mut guard) = self.killer.lock() {
            if let Some(mut killer) = guard.take() {
                let _ = killer.kill();
                info!("Shell killed");
            }
        }
    }
}

impl Drop for PtyShell {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spawn_quiet_shell(
        log_path: &Path,
        frames: broadcast::Sender<ViewerFrame>,
    ) -> Option<PtyShell> {
        // `cat` sits quietly on the PTY until written to; if the
        // environment has no PTY support there is nothing to test here.
        PtyShell::spawn("cat", Vec::new(), log_path, frames).ok()
    }

    #[tokio::test]
    async fn test_log_starts_empty() {
        let temp = TempDir::new().unwrap();
        let log_path = temp.path().join("output.log");
        std::fs::write(&log_path, "stale bytes from a previous run").unwrap();

        let (frames, _rx) = broadcast::channel(64);
        let Some(shell) = spawn_quiet_shell(&log_path, frames) else {
            return;
        };

        assert_eq!(std::fs::metadata(&log_path).unwrap().len(), 0);
        shell.kill();
    }

    #[tokio::test]
    async fn test_output_reaches_log_and_viewers() {
        let temp = TempDir::new().unwrap();
        let log_path = temp.path().join("output.log");

        let (frames, mut rx) = broadcast::channel(64);
        let Some(shell) = spawn_quiet_shell(&log_path, frames) else {
            return;
        };

        shell.write_line("hello pty").await.unwrap();

        // PTY echo plus cat's copy arrive asynchronously
        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("no viewer frame")
            .unwrap();
        match frame {
            ViewerFrame::Output { data } => assert!(data.contains("hello")),
            other => panic!("expected output frame, got {:?}", other),
        }

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(std::fs::metadata(&log_path).unwrap().len() > 0);
        shell.kill();
    }

    #[tokio::test]
    async fn test_respawn_truncates_log() {
        let temp = TempDir::new().unwrap();
        let log_path = temp.path().join("output.log");

        let (frames, mut rx) = broadcast::channel(256);
        let Some(first) = spawn_quiet_shell(&log_path, frames.clone()) else {
            return;
        };
        first.write_line("carry-over?").await.unwrap();
        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv()).await;
        first.kill();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let Some(second) = spawn_quiet_shell(&log_path, frames) else {
            return;
        };
        assert_eq!(std::fs::metadata(&log_path).unwrap().len(), 0);
        second.kill();
    }
}
