//! Maintainer lookups through `nix eval`.

use super::memo::Maintainer;
use super::resolver::{EvalError, Evaluator};
use crate::context::Context;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::trace;

/// Default per-call timeout for `nix eval`.
pub const DEFAULT_EVAL_TIMEOUT: Duration = Duration::from_secs(300);

/// Runs `nix eval --json -f <release file> <attr>.meta.maintainers` against a nixpkgs checkout.
#[derive(Debug, Clone)]
pub struct NixEvaluator {
    nix_bin: PathBuf,
    nixpkgs_dir: PathBuf,
    timeout: Duration,
}

impl NixEvaluator {
    pub fn new<P: AsRef<Path>>(nixpkgs_dir: P) -> Self {
        Self {
            nix_bin: PathBuf::from("nix"),
            nixpkgs_dir: nixpkgs_dir.as_ref().to_path_buf(),
            timeout: DEFAULT_EVAL_TIMEOUT,
        }
    }

    /// Use a different `nix` executable.
    pub fn with_nix_bin(mut self, nix_bin: impl Into<PathBuf>) -> Self {
        self.nix_bin = nix_bin.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, context: Context, attr_path: &str) -> Command {
        let mut cmd = Command::new(&self.nix_bin);
        cmd.args(["eval", "--json", "-f"])
            .arg(context.expression_file(&self.nixpkgs_dir))
            .arg(format!("{attr_path}.meta.maintainers"))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl Evaluator for NixEvaluator {
    fn maintainers(&self, context: Context, attr_path: &str) -> Result<Vec<Maintainer>, EvalError> {
        let started = Instant::now();
        let mut child = self
            .command(context, attr_path)
            .spawn()
            .map_err(|source| EvalError::Spawn {
                program: self.nix_bin.display().to_string(),
                source,
            })?;

        // Drain both pipes while waiting so a chatty evaluation cannot fill them and stall.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match wait_with_timeout(&mut child, self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                abandon(&mut child);
                return Err(EvalError::Timeout(self.timeout));
            }
            Err(e) => {
                abandon(&mut child);
                return Err(e.into());
            }
        };

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();
        trace!(
            attr = %attr_path,
            elapsed_ms = started.elapsed().as_millis(),
            success = status.success(),
            "nix eval finished"
        );

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(EvalError::Exit {
                status: status.to_string(),
                stderr: stderr.lines().take(5).collect::<Vec<_>>().join("\n"),
            });
        }

        Ok(serde_json::from_slice(&stdout)?)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Kill `child` and reap it so no zombie is left behind.
fn abandon(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Poll `child` until it exits or `timeout` elapses. `None` means it is still running.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    let mut interval = Duration::from_millis(5);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(interval.min(deadline - now));
        interval = (interval * 2).min(Duration::from_millis(100));
    }
}
