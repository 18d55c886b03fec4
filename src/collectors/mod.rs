pub mod apps;
pub mod battery;
pub mod display;
pub mod gpu;
pub mod sysfs;
pub mod system;
#[cfg(test)]
pub mod testing;

use crate::info::{
    AppInfo, CameraInfo, CpuInfo, DisplayInfo, GpuInfo, NetworkInfo, RamInfo, SensorInfo, SimInfo,
    StorageInfo, SystemInfo, ThermalInfo,
};
use async_trait::async_trait;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("источник недоступен: {0}")]
    Unavailable(String),
    #[error("нет доступа: {0}")]
    PermissionDenied(String),
    #[error("не поддерживается на этой платформе")]
    Unsupported,
    #[error("ошибка чтения {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("не удалось запустить {program}: {message}")]
    Command { program: String, message: String },
    #[error("не удалось разобрать вывод: {0}")]
    Parse(String),
}

impl SourceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied(path.display().to_string());
        }
        Self::Io { path, source }
    }
}

/// Runs a synchronous tool and kills it once `timeout` passes.
pub fn run_with_deadline(
    program: &str,
    cmd: &mut Command,
    timeout: Duration,
) -> Result<String, SourceError> {
    let command_error = |message: String| SourceError::Command {
        program: program.to_string(),
        message,
    };
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| command_error(err.to_string()))?;

    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    return Err(command_error(format!("exit status {status}")));
                }
                let mut out = Vec::new();
                if let Some(mut stdout) = child.stdout.take() {
                    stdout
                        .read_to_end(&mut out)
                        .map_err(|err| command_error(err.to_string()))?;
                }
                return Ok(String::from_utf8_lossy(&out).to_string());
            }
            Ok(None) => {
                if started.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(command_error(format!(
                        "не завершился за {} мс",
                        timeout.as_millis()
                    )));
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(err) => return Err(command_error(err.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    X11,
    Wayland,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    kind: SessionKind,
    display: String,
}

impl ExecutionContext {
    pub fn new(kind: SessionKind, display: impl Into<String>) -> Self {
        Self {
            kind,
            display: display.into(),
        }
    }

    pub fn from_env() -> Option<Self> {
        let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        if let Some(display) = non_empty("DISPLAY") {
            return Some(Self::new(SessionKind::X11, display));
        }
        non_empty("WAYLAND_DISPLAY").map(|display| Self::new(SessionKind::Wayland, display))
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    pub fn is_valid(&self) -> bool {
        !self.display.trim().is_empty()
    }

    pub fn x_display(&self) -> Option<&str> {
        match self.kind {
            SessionKind::X11 => Some(&self.display),
            SessionKind::Wayland => None,
        }
    }
}

#[async_trait]
pub trait InfoSource: Send + Sync {
    fn cpu(&self) -> Result<CpuInfo, SourceError>;

    fn live_cpu_frequencies(&self) -> Result<Vec<u64>, SourceError>;

    fn gpu_load(&self) -> Result<Option<u8>, SourceError>;

    fn ram(&self) -> Result<RamInfo, SourceError>;

    fn storage(&self) -> Result<StorageInfo, SourceError>;

    fn system(&self) -> Result<SystemInfo, SourceError>;

    fn network(&self) -> Result<NetworkInfo, SourceError>;

    fn thermal(&self) -> Result<Vec<ThermalInfo>, SourceError>;

    fn display(&self, ctx: &ExecutionContext) -> Result<DisplayInfo, SourceError>;

    fn sensors(&self, ctx: &ExecutionContext) -> Result<Vec<SensorInfo>, SourceError>;

    /// May spawn external probes; dropping the future cancels them.
    async fn gpu(&self, ctx: &ExecutionContext) -> Result<GpuInfo, SourceError>;

    fn cameras(&self) -> Result<Vec<CameraInfo>, SourceError>;

    fn sims(&self) -> Result<Vec<SimInfo>, SourceError>;

    fn apps(&self) -> Result<Vec<AppInfo>, SourceError>;
}
