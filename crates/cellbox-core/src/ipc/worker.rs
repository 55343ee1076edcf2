//! Worker process management.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::SandboxConfig;
use crate::error::{Error, Result};
use crate::sandbox::protocol::{
    HostMessage, Outcome, SandboxEvent, UnitId, decode_line, encode_line,
};

const WORKER_NAME: &str = if cfg!(windows) {
    "cellbox-worker.exe"
} else {
    "cellbox-worker"
};

/// Write one message as a JSON line and flush.
pub fn write_message<W: Write>(writer: &mut W, message: &impl Serialize) -> Result<()> {
    let line = encode_line(message)?;
    writer
        .write_all(line.as_bytes())
        .and_then(|()| writer.write_all(b"\n"))
        .and_then(|()| writer.flush())
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message: {e}")))
}

/// Read one JSON-line message, skipping blank lines.
pub fn read_message<R: BufRead, T: DeserializeOwned>(reader: &mut R) -> Result<T> {
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .map_err(|e| Error::Ipc(format!("Failed to read IPC message: {e}")))?;
        if read == 0 {
            return Err(Error::Ipc("worker closed its output".to_string()));
        }
        if !line.trim().is_empty() {
            return decode_line(&line);
        }
    }
}

/// Handle to a sandbox running in a `cellbox-worker` process.
pub struct WorkerProcess {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    killed: bool,
}

impl WorkerProcess {
    /// Spawn a worker and bring its sandbox up.
    ///
    /// The sandbox settings travel as `CELLBOX_*` environment variables.
    /// Returns `Error::Bootstrap` if the worker reports a fatal error
    /// instead of `ready`.
    pub fn spawn(config: &SandboxConfig) -> Result<Self> {
        let worker_path = find_worker_binary(config)?;

        let mut command = Command::new(&worker_path);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .env("CELLBOX_SHOW_PRIVATE", config.show_private.to_string())
            .env("CELLBOX_MAX_COMPLETIONS", config.max_completions.to_string());
        match &config.startup {
            Some(startup) => command.env("CELLBOX_STARTUP", startup),
            None => command.env_remove("CELLBOX_STARTUP"),
        };
        let mut child = command.spawn().map_err(|e| {
            Error::Ipc(format!(
                "Failed to spawn worker process '{}': {e}",
                worker_path.display()
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Ipc("Failed to get worker stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Ipc("Failed to get worker stdout".to_string()))?;

        let mut worker = Self {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
            killed: false,
        };
        tracing::debug!(pid = worker.pid(), path = %worker_path.display(), "Worker spawned");

        worker.send(&HostMessage::Init)?;
        loop {
            match worker.recv()? {
                SandboxEvent::Ready => return Ok(worker),
                SandboxEvent::FatalError { message } => return Err(Error::Bootstrap(message)),
                other => tracing::debug!(?other, "Ignoring event before ready"),
            }
        }
    }

    pub fn send(&mut self, message: &HostMessage) -> Result<()> {
        if self.killed {
            return Err(Error::Ipc("Worker has been killed".to_string()));
        }
        write_message(&mut self.stdin, message)
    }

    pub fn recv(&mut self) -> Result<SandboxEvent> {
        if self.killed {
            return Err(Error::Ipc("Worker has been killed".to_string()));
        }
        read_message(&mut self.stdout)
    }

    /// Run a unit and wait for its result.
    ///
    /// Every other event that arrives meanwhile (output, widget updates,
    /// results of other units) is passed to `on_event`.
    pub fn run(
        &mut self,
        unit_id: &UnitId,
        code: &str,
        mut on_event: impl FnMut(SandboxEvent),
    ) -> Result<Outcome> {
        self.send(&HostMessage::Run {
            unit_id: unit_id.clone(),
            code: code.to_string(),
        })?;
        loop {
            match self.recv()? {
                SandboxEvent::Result { unit_id: done, outcome } if &done == unit_id => {
                    return Ok(outcome);
                }
                SandboxEvent::FatalError { message } => return Err(Error::Bootstrap(message)),
                other => on_event(other),
            }
        }
    }

    /// Kill the worker process immediately.
    pub fn kill(&mut self) -> Result<()> {
        if self.killed {
            return Ok(());
        }
        self.killed = true;

        let _ = write_message(&mut self.stdin, &HostMessage::Shutdown);
        std::thread::sleep(Duration::from_millis(10));

        if let Err(e) = self.child.kill()
            && e.kind() != std::io::ErrorKind::InvalidInput
        {
            tracing::warn!("Failed to kill worker: {}", e);
        }
        let _ = self.child.wait();
        Ok(())
    }

    /// Check if the worker process is still running.
    pub fn is_alive(&mut self) -> bool {
        !self.killed && matches!(self.child.try_wait(), Ok(None))
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Ask the worker to exit and wait for it.
    pub fn shutdown(mut self) -> Result<()> {
        if self.killed {
            return Ok(());
        }
        self.killed = true;
        let _ = write_message(&mut self.stdin, &HostMessage::Shutdown);

        match self.child.wait() {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(Error::Ipc(format!("Worker exited with status: {status}"))),
            Err(e) => Err(Error::Ipc(format!("Failed to wait for worker: {e}"))),
        }
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        let _ = self.kill();
    }
}

/// Locate the worker binary.
///
/// Order: the configured path, the directory of the current executable,
/// the system PATH, then the workspace's `target/` directories.
fn find_worker_binary(config: &SandboxConfig) -> Result<PathBuf> {
    if let Some(path) = &config.worker_path {
        if path.exists() {
            return Ok(path.clone());
        }
        tracing::warn!(path = %path.display(), "Configured worker binary does not exist");
    }

    if let Ok(exe_path) = std::env::current_exe()
        && let Some(exe_dir) = exe_path.parent()
    {
        let beside = exe_dir.join(WORKER_NAME);
        if beside.exists() {
            return Ok(beside);
        }
        // Test binaries live one level down, in target/<profile>/deps.
        if let Some(profile_dir) = exe_dir.parent() {
            let above = profile_dir.join(WORKER_NAME);
            if above.exists() {
                return Ok(above);
            }
        }
    }

    if let Ok(path) = which::which(WORKER_NAME) {
        return Ok(path);
    }

    if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
        for profile in ["debug", "release"] {
            let path = PathBuf::from(&manifest_dir)
                .join("..")
                .join("..")
                .join("target")
                .join(profile)
                .join(WORKER_NAME);
            if path.exists() {
                return Ok(path.canonicalize().unwrap_or(path));
            }
        }
    }

    Err(Error::Ipc(format!(
        "Could not find {WORKER_NAME}. Set CELLBOX_WORKER_PATH or ensure it's in PATH."
    )))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_message_lines() {
        let mut buf = Vec::new();
        write_message(&mut buf, &HostMessage::Init).unwrap();
        write_message(&mut buf, &HostMessage::Shutdown).unwrap();
        assert_eq!(String::from_utf8(buf.clone()).unwrap(), "{\"type\":\"init\"}\n{\"type\":\"shutdown\"}\n");

        let mut reader = Cursor::new(buf);
        assert_eq!(read_message::<_, HostMessage>(&mut reader).unwrap(), HostMessage::Init);
        assert_eq!(read_message::<_, HostMessage>(&mut reader).unwrap(), HostMessage::Shutdown);
        assert!(matches!(read_message::<_, HostMessage>(&mut reader), Err(Error::Ipc(_))));
    }

    #[test]
    fn test_blank_lines_skipped() {
        let mut reader = Cursor::new(b"\n  \n{\"type\":\"ready\"}\n".to_vec());
        assert_eq!(read_message::<_, SandboxEvent>(&mut reader).unwrap(), SandboxEvent::Ready);
    }

    #[test]
    fn test_missing_worker_binary() {
        let config = SandboxConfig::default().with_worker_path("/nonexistent/cellbox-worker");
        // Falls through to the other locations; only fails if none has it.
        if let Err(e) = find_worker_binary(&config) {
            assert!(matches!(e, Error::Ipc(_)));
        }
    }

    // These tests require the cellbox-worker binary to be built.
    // Run `cargo build -p cellbox-worker` first.

    #[test]
    #[ignore = "Requires cellbox-worker binary"]
    fn test_worker_run() {
        let mut worker = WorkerProcess::spawn(&SandboxConfig::default()).unwrap();
        assert!(worker.pid() > 0);
        let mut output = String::new();
        let outcome = worker
            .run(&UnitId::from("a"), "print('hi')\n1 + 1", |event| {
                if let SandboxEvent::Output { text, .. } = event {
                    output.push_str(&text);
                }
            })
            .unwrap();
        assert_eq!(output, "hi\n");
        assert_eq!(outcome, Outcome::Success { value: Some("2".into()), render: None });
        worker.shutdown().unwrap();
    }

    #[test]
    #[ignore = "Requires cellbox-worker binary"]
    fn test_worker_kill() {
        let mut worker = WorkerProcess::spawn(&SandboxConfig::default()).unwrap();
        worker.send(&HostMessage::Run { unit_id: "spin".into(), code: "while True:\n    pass".into() }).unwrap();
        worker.kill().unwrap();
        assert!(!worker.is_alive());
    }
}
