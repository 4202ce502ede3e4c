//! Profiling launcher: spawn the target, attach a batch-mode monitor to its PID,
//! wait for the target to exit, kill the monitor and relay its captured stdout.
use crate::config::{LauncherConfig, MonitorConfig, TargetConfig, PID_PLACEHOLDER};
use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

/// Which of the two children an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Target,
    Monitor,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Target => write!(f, "target"),
            Role::Monitor => write!(f, "monitor"),
        }
    }
}

/// Errors surfaced by a launcher run. The underlying OS error is never translated.
#[derive(Debug)]
pub enum LaunchError {
    /// Failed to start one of the child processes.
    Spawn {
        role: Role,
        command: PathBuf,
        source: std::io::Error,
    },
    /// Failed while waiting on the target, killing the monitor or relaying output.
    Io { source: std::io::Error },
}

impl std::fmt::Display for LaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchError::Spawn {
                role,
                command,
                source,
            } => {
                write!(
                    f,
                    "failed to launch {} {}: {}",
                    role,
                    command.display(),
                    source
                )
            }
            LaunchError::Io { source } => {
                write!(f, "I/O error while supervising processes: {}", source)
            }
        }
    }
}

impl std::error::Error for LaunchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LaunchError::Spawn { source, .. } => Some(source),
            LaunchError::Io { source } => Some(source),
        }
    }
}

/// What a completed run observed.
#[derive(Debug)]
pub struct RunReport {
    pub target_pid: u32,
    pub monitor_pid: u32,
    /// Arguments the monitor was launched with, after PID substitution.
    pub monitor_args: Vec<String>,
    /// Target exit code (None if killed by signal).
    pub target_exit_code: Option<i32>,
    pub target_signal: Option<i32>,
    pub monitor_signal: Option<i32>,
    pub target_started_at: DateTime<Utc>,
    pub monitor_started_at: DateTime<Utc>,
    pub target_exited_at: DateTime<Utc>,
    pub monitor_killed_at: DateTime<Utc>,
    /// Number of monitor lines written to the output.
    pub lines_relayed: u64,
    pub duration: Duration,
}

/// Substitute the target PID into the monitor's argument template.
pub fn build_monitor_args(monitor: &MonitorConfig, pid: u32) -> Vec<String> {
    let pid = pid.to_string();
    monitor
        .args
        .iter()
        .map(|arg| arg.replace(PID_PLACEHOLDER, &pid))
        .collect()
}

/// Copy `reader` to `writer` one line at a time, in order, bytes untouched.
///
/// Every line is terminated with `\n` on output, including a trailing
/// partial line. Returns the number of lines written.
pub async fn relay_lines<R, W>(reader: R, writer: &mut W) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut segments = BufReader::new(reader).split(b'\n');
    let mut count = 0;
    while let Some(line) = segments.next_segment().await? {
        writer.write_all(&line).await?;
        writer.write_all(b"\n").await?;
        count += 1;
    }
    writer.flush().await?;
    Ok(count)
}

fn signal_name(sig: Option<i32>) -> Option<&'static str> {
    sig.and_then(|s| Signal::try_from(s).ok()).map(|s| s.as_str())
}

/// SIGKILL the monitor. A monitor that is already gone is not an error.
fn kill_monitor(pid: u32) -> Result<(), LaunchError> {
    let raw = i32::try_from(pid).map_err(|_| LaunchError::Io {
        source: std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("monitor pid {pid} out of range"),
        ),
    })?;
    match signal::kill(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => {
            tracing::debug!(pid, "monitor already exited before kill");
            Ok(())
        }
        Err(errno) => Err(LaunchError::Io {
            source: std::io::Error::from_raw_os_error(errno as i32),
        }),
    }
}

/// Kill a started monitor before bailing out of a run with `err`.
fn abandon_monitor(monitor: &mut Child, err: LaunchError) -> LaunchError {
    if let Err(e) = monitor.start_kill() {
        tracing::warn!(error = %e, "failed to kill monitor after launcher error");
    }
    err
}

fn missing_pid(role: Role) -> LaunchError {
    LaunchError::Io {
        source: std::io::Error::other(format!("{role} was reaped before its pid was read")),
    }
}

/// Runs one target under one monitor.
#[derive(Debug)]
pub struct Launcher {
    target: TargetConfig,
    monitor: MonitorConfig,
}

impl Launcher {
    pub fn new(config: LauncherConfig) -> Self {
        Self {
            target: config.target,
            monitor: config.monitor,
        }
    }

    pub fn target(&self) -> &TargetConfig {
        &self.target
    }

    pub fn monitor(&self) -> &MonitorConfig {
        &self.monitor
    }

    /// Run the target to completion under the monitor and relay the
    /// monitor's stdout to `out`.
    ///
    /// If the target cannot be spawned the monitor is never launched. If the
    /// monitor cannot be spawned the target is left running on its own.
    pub async fn run<W>(&self, out: &mut W) -> Result<RunReport, LaunchError>
    where
        W: AsyncWrite + Unpin,
    {
        let start = Instant::now();

        tracing::info!(
            command = %self.target.command.display(),
            args = ?self.target.args,
            "spawning target"
        );
        let mut target = Command::new(&self.target.command)
            .args(&self.target.args)
            .spawn()
            .map_err(|e| LaunchError::Spawn {
                role: Role::Target,
                command: self.target.command.clone(),
                source: e,
            })?;
        let target_started_at = Utc::now();
        let target_pid = target.id().ok_or_else(|| missing_pid(Role::Target))?;
        tracing::info!(pid = target_pid, "target started");

        let monitor_args = build_monitor_args(&self.monitor, target_pid);
        tracing::info!(
            command = %self.monitor.command.display(),
            args = ?monitor_args,
            "spawning monitor"
        );
        let mut monitor = match Command::new(&self.monitor.command)
            .args(&monitor_args)
            .stdout(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(
                    pid = target_pid,
                    "monitor failed to start; target left running unmonitored"
                );
                return Err(LaunchError::Spawn {
                    role: Role::Monitor,
                    command: self.monitor.command.clone(),
                    source: e,
                });
            }
        };
        let monitor_started_at = Utc::now();
        let Some(monitor_pid) = monitor.id() else {
            return Err(abandon_monitor(&mut monitor, missing_pid(Role::Monitor)));
        };
        let Some(monitor_stdout) = monitor.stdout.take() else {
            let err = LaunchError::Io {
                source: std::io::Error::other("monitor stdout was not captured"),
            };
            return Err(abandon_monitor(&mut monitor, err));
        };
        tracing::info!(pid = monitor_pid, "monitor started");

        let status = match target.wait().await {
            Ok(status) => status,
            Err(e) => {
                return Err(abandon_monitor(&mut monitor, LaunchError::Io { source: e }));
            }
        };
        let target_exited_at = Utc::now();
        tracing::info!(
            exit_code = ?status.code(),
            signal = ?signal_name(status.signal()),
            "target exited"
        );

        if let Err(e) = kill_monitor(monitor_pid) {
            return Err(abandon_monitor(&mut monitor, e));
        }
        let monitor_killed_at = Utc::now();
        let monitor_status = monitor
            .wait()
            .await
            .map_err(|e| LaunchError::Io { source: e })?;
        tracing::debug!(
            exit_code = ?monitor_status.code(),
            signal = ?signal_name(monitor_status.signal()),
            "monitor reaped"
        );

        let lines_relayed = relay_lines(monitor_stdout, out)
            .await
            .map_err(|e| LaunchError::Io { source: e })?;

        let duration = start.elapsed();
        tracing::info!(
            lines_relayed,
            duration_ms = duration.as_millis() as u64,
            "monitor output relayed"
        );

        Ok(RunReport {
            target_pid,
            monitor_pid,
            monitor_args,
            target_exit_code: status.code(),
            target_signal: status.signal(),
            monitor_signal: monitor_status.signal(),
            target_started_at,
            monitor_started_at,
            target_exited_at,
            monitor_killed_at,
            lines_relayed,
            duration,
        })
    }
}
