//! PTY-backed subprocess.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use portable_pty::{Child, ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tether_api::CommandSpec;
use tether_pump::{Pump, PumpMessage};

use super::{ControlledProcess, ReadOutcome, Watchdog};
use crate::config::EngineConfig;

/// A subprocess running on the slave side of a PTY.
///
/// The child leads a fresh session (and so its own process group), so
/// terminal signals aimed at the engine never reach it and teardown can kill
/// everything it started.
pub struct PtyProcess {
    child: Box<dyn Child + Send + Sync>,
    /// Kept open for the lifetime of the child.
    _master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    pump: Pump,
    output: Receiver<PumpMessage>,
    watchdog: Watchdog,
    pid: Option<u32>,
    closed: bool,
    reaped: bool,
}

impl PtyProcess {
    /// Spawn `spec` in a new PTY and arm its deadline.
    pub fn spawn(spec: &CommandSpec, config: &EngineConfig) -> anyhow::Result<Self> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: config.pty_rows,
                cols: config.pty_cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("failed to open pty")?;

        let mut cmd = CommandBuilder::new(&spec.command);
        cmd.args(&spec.args);
        if let Some(dir) = &spec.cwd {
            cmd.cwd(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("failed to start {}", spec.command))?;

        // Only the child should hold the slave, or we never see end of stream.
        drop(pair.slave);

        let pid = child.process_id();
        let io = pair
            .master
            .try_clone_reader()
            .context("failed to clone pty reader")
            .and_then(|reader| {
                let writer = pair.master.take_writer().context("failed to take pty writer")?;
                Ok((reader, writer))
            });

        let (reader, writer) = match io {
            Ok(io) => io,
            Err(e) => {
                let mut killer = child.clone_killer();
                terminate(pid, killer.as_mut());
                let _ = child.wait();
                return Err(e);
            }
        };

        let (pump, output) = Pump::spawn(reader, config.strip_ansi);

        let mut killer = child.clone_killer();
        let watchdog = Watchdog::arm(spec.effective_timeout(), move || {
            terminate(pid, killer.as_mut());
        });

        tracing::debug!("spawned {} (pid {:?}) in pty", spec.display_line(), pid);

        Ok(Self {
            child,
            _master: pair.master,
            writer,
            pump,
            output,
            watchdog,
            pid,
            closed: false,
            reaped: false,
        })
    }
}

impl ControlledProcess for PtyProcess {
    fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()
    }

    fn next_chunk(&mut self, timeout: Duration) -> io::Result<ReadOutcome> {
        if self.closed {
            return Ok(ReadOutcome::Closed);
        }

        match self.output.recv_timeout(timeout) {
            Ok(PumpMessage::Chunk(text)) => Ok(ReadOutcome::Data(text)),
            Ok(PumpMessage::Closed) | Err(RecvTimeoutError::Disconnected) => {
                self.closed = true;
                Ok(ReadOutcome::Closed)
            }
            Ok(PumpMessage::Failed(e)) => {
                self.closed = true;
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => Ok(ReadOutcome::Timeout),
        }
    }

    fn kill(&mut self) {
        if self.reaped {
            return;
        }
        self.reaped = true;
        self.watchdog.disarm();

        match self.child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!("subprocess {:?} already exited: {:?}", self.pid, status);
            }
            _ => {
                let mut killer = self.child.clone_killer();
                terminate(self.pid, killer.as_mut());
            }
        }

        if let Err(e) = self.child.wait() {
            tracing::debug!("failed to reap subprocess {:?}: {}", self.pid, e);
        }
        self.pump.stop();
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn deadline_fired(&self) -> bool {
        self.watchdog.fired()
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Kill the subprocess and everything in its process group.
fn terminate(pid: Option<u32>, killer: &mut dyn ChildKiller) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        // The child is a session leader, so its pid is also its group id.
        if let Some(pid) = pid {
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                tracing::debug!("killpg({}) failed: {}", pid, e);
            }
        }
    }

    if let Err(e) = killer.kill() {
        tracing::debug!("kill failed: {}", e);
    }
}
