//! External render tool invocation
//!
//! The tool is run once per poster with the flags
//! `-i <image> -f <font> -w <width> -h <height> -q <quality> -t <text>`
//! and must write a JPEG to stdout. A run counts as successful only when the
//! tool exits zero and wrote at least one byte.

use crate::assets::AssetSelection;
use crate::caption::Caption;
use crate::config::RenderConfig;
use crate::error::PosterError;
use hyper::body::Bytes;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

/// Everything needed to launch the render tool
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub command: String,
    /// Arguments placed before the render flags (e.g. `-jar tool.jar`)
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub quality: f32,
    pub timeout: Duration,
    pub kill_grace_period: Duration,
}

impl From<&RenderConfig> for RenderSettings {
    fn from(config: &RenderConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
            width: config.width,
            height: config.height,
            quality: config.quality,
            timeout: config.timeout(),
            kill_grace_period: config.kill_grace_period(),
        }
    }
}

/// Render flags for one poster, each value its own argument
pub fn render_args(settings: &RenderSettings, image: &Path, font: &Path, text: &str) -> Vec<OsString> {
    vec![
        "-i".into(),
        image.as_os_str().to_owned(),
        "-f".into(),
        font.as_os_str().to_owned(),
        "-w".into(),
        settings.width.to_string().into(),
        "-h".into(),
        settings.height.to_string().into(),
        "-q".into(),
        settings.quality.to_string().into(),
        "-t".into(),
        text.into(),
    ]
}

/// Runs the render tool and collects its output
#[derive(Debug, Clone)]
pub struct RenderInvoker {
    settings: RenderSettings,
}

impl RenderInvoker {
    pub fn new(settings: RenderSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Render `caption` onto the selected image, returning the JPEG bytes
    pub async fn render(
        &self,
        assets: &AssetSelection,
        caption: &Caption,
    ) -> Result<Bytes, PosterError> {
        let settings = &self.settings;

        let mut cmd = Command::new(&settings.command);
        cmd.args(&settings.args);
        cmd.args(render_args(settings, &assets.image, &assets.font, &caption.text()));
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        if let Some(ref working_dir) = settings.working_dir {
            cmd.current_dir(working_dir);
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            error!(command = %settings.command, error = %e, "Failed to start render tool");
            let reason = if e.kind() == ErrorKind::NotFound {
                format!("render tool '{}' not found", settings.command)
            } else {
                format!("failed to start render tool: {}", e)
            };
            PosterError::render_failure(reason, &[])
        })?;
        let pid = child.id().unwrap_or(0);
        debug!(pid, command = %settings.command, "Render tool spawned");

        let (status, stdout, stderr) =
            match tokio::time::timeout(settings.timeout, collect_output(&mut child)).await {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    error!(pid, error = %e, "Failed to read render tool output");
                    terminate(&mut child, settings.kill_grace_period).await;
                    return Err(PosterError::render_failure(
                        format!("failed to read render tool output: {}", e),
                        &[],
                    ));
                }
                Err(_) => {
                    warn!(
                        pid,
                        timeout_ms = settings.timeout.as_millis() as u64,
                        "Render tool timed out"
                    );
                    terminate(&mut child, settings.kill_grace_period).await;
                    return Err(PosterError::RenderTimeout(settings.timeout));
                }
            };

        let elapsed_ms = started.elapsed().as_millis() as u64;

        let failure = if !status.success() {
            Some(format!("render tool exited with {}", status))
        } else if stdout.is_empty() {
            Some("render tool produced no output".to_string())
        } else {
            None
        };

        if let Some(reason) = failure {
            let err = PosterError::render_failure(reason, &stderr);
            error!(pid, %status, elapsed_ms, error = ?err, "Render tool failed");
            return Err(err);
        }

        info!(pid, bytes = stdout.len(), elapsed_ms, "Poster rendered");
        Ok(Bytes::from(stdout))
    }
}

/// Drain stdout and stderr while waiting for exit
async fn collect_output(child: &mut Child) -> std::io::Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (stdout, stderr, status) =
        tokio::try_join!(read_all(stdout), read_all(stderr), child.wait())?;
    Ok((status, stdout, stderr))
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// SIGTERM, wait out the grace period, then SIGKILL
async fn terminate(child: &mut Child, grace_period: Duration) {
    if let Some(pid) = child.id() {
        debug!(pid, "Sending SIGTERM to render tool");

        #[cfg(unix)]
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }

        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }
    }

    match tokio::time::timeout(grace_period, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(?status, "Render tool exited after SIGTERM");
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Error waiting for render tool to exit");
        }
        Err(_) => {
            warn!(
                grace_period_ms = grace_period.as_millis() as u64,
                "Grace period exceeded, sending SIGKILL"
            );
            let _ = child.kill().await;
        }
    }
}
