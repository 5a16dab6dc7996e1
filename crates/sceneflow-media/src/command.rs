//! FFmpeg command builder and extraction process control.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};

/// Output file pattern for extracted frames (sequentially numbered).
pub const DEFAULT_OUTPUT_PATTERN: &str = "frame_%06d.jpg";

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Executable to run
    program: PathBuf,
    /// Input file path
    input: PathBuf,
    /// Output file path or pattern
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Run a different executable (absolute path or name on PATH).
    pub fn program(mut self, program: impl AsRef<Path>) -> Self {
        self.program = program.as_ref().to_path_buf();
        self
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Emit every selected frame as-is, without duplicating or dropping.
    pub fn passthrough_sync(self) -> Self {
        self.output_arg("-vsync").output_arg("0")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Executable this command runs.
    pub fn program_path(&self) -> &Path {
        &self.program
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec!["-hide_banner".to_string(), "-nostdin".to_string()];

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Build the scene-change extraction command.
///
/// Selects frames whose scene score exceeds `threshold` and logs each one
/// through `showinfo`, which needs log level `info` to reach stderr.
pub fn scene_extraction_command(
    input: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    threshold: f64,
) -> MediaResult<FfmpegCommand> {
    if !(0.0..=1.0).contains(&threshold) || threshold.is_nan() {
        return Err(MediaError::InvalidThreshold(threshold));
    }

    let output = output_dir.as_ref().join(DEFAULT_OUTPUT_PATTERN);
    Ok(FfmpegCommand::new(input, output)
        .log_level("info")
        .video_filter(format!("select='gt(scene,{})',showinfo", threshold))
        .passthrough_sync())
}

/// A running extraction process with its stderr drained on a dedicated task.
///
/// Fields are public so a supervisor can `select!` on the child and the line
/// channel at the same time.
pub struct ExtractionProcess {
    pub child: Child,
    /// Diagnostic lines in the order FFmpeg wrote them
    pub lines: mpsc::Receiver<String>,
    pub reader: JoinHandle<()>,
}

impl ExtractionProcess {
    /// Spawn the command with stderr piped into a bounded line channel.
    pub fn spawn(cmd: &FfmpegCommand, line_buffer: usize) -> MediaResult<Self> {
        let program = resolve_program(cmd.program_path())?;

        let args = cmd.build_args();
        info!("Running FFmpeg: {} {}", program.display(), args.join(" "));

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("stderr not captured"))?;

        let (tx, lines) = mpsc::channel(line_buffer.max(1));
        let reader = tokio::spawn(drain_lines(stderr, tx));

        Ok(Self {
            child,
            lines,
            reader,
        })
    }

    /// OS process id, if the process is still running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Read `source` to EOF, forwarding each line to `tx`.
///
/// Both `\n` and `\r` terminate a line so FFmpeg's carriage-return stats
/// updates count as activity.
async fn drain_lines<R>(mut source: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8192];
    let mut pending = Vec::new();

    loop {
        let n = match source.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("Error reading FFmpeg stderr: {}", e);
                break;
            }
        };

        for line in split_lines(&mut pending, &buf[..n]) {
            if tx.send(line).await.is_err() {
                return;
            }
        }
    }

    if !pending.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&pending).into_owned()).await;
    }
    debug!("FFmpeg stderr closed");
}

/// Append `chunk` to `pending` and return every completed, non-empty line.
fn split_lines(pending: &mut Vec<u8>, chunk: &[u8]) -> Vec<String> {
    let mut lines = Vec::new();
    for &b in chunk {
        if b == b'\n' || b == b'\r' {
            if !pending.is_empty() {
                lines.push(String::from_utf8_lossy(pending).into_owned());
                pending.clear();
            }
        } else {
            pending.push(b);
        }
    }
    lines
}

/// Stop a child process: SIGTERM first, SIGKILL if it outlives `grace`.
pub async fn terminate(child: &mut Child, grace: Duration) -> MediaResult<Option<ExitStatus>> {
    let Some(pid) = child.id() else {
        // Already reaped
        return Ok(child.try_wait()?);
    };

    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        warn!("Failed to send SIGTERM to FFmpeg ({}): {}", pid, e);
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => Ok(Some(status?)),
        Err(_) => {
            warn!(
                "FFmpeg ({}) ignored SIGTERM for {:?}, killing process",
                pid, grace
            );
            child.kill().await?;
            Ok(child.try_wait()?)
        }
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Locate the executable for `program`.
///
/// Anything with a directory component must exist as given; a bare name is
/// looked up on `PATH`.
fn resolve_program(program: &Path) -> MediaResult<PathBuf> {
    if program == Path::new("ffmpeg") {
        return check_ffmpeg();
    }

    if program.components().count() > 1 {
        if program.exists() {
            return Ok(program.to_path_buf());
        }
        return Err(MediaError::FileNotFound(program.to_path_buf()));
    }

    which::which(program).map_err(|_| MediaError::FileNotFound(program.to_path_buf()))
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_command_args() {
        let cmd = scene_extraction_command("in.mp4", "/tmp/out", 0.4).unwrap();
        let args = cmd.build_args();

        assert_eq!(args[0], "-hide_banner");
        assert!(args.contains(&"select='gt(scene,0.4)',showinfo".to_string()));
        assert!(args.contains(&"-vsync".to_string()));
        let v = args.iter().position(|a| a == "-v").unwrap();
        assert_eq!(args[v + 1], "info");
        assert_eq!(args.last().unwrap(), "/tmp/out/frame_%06d.jpg");
    }

    #[test]
    fn test_scene_command_rejects_bad_threshold() {
        assert!(matches!(
            scene_extraction_command("in.mp4", "/tmp", 1.5),
            Err(MediaError::InvalidThreshold(_))
        ));
        assert!(scene_extraction_command("in.mp4", "/tmp", f64::NAN).is_err());
        assert!(scene_extraction_command("in.mp4", "/tmp", 0.0).is_ok());
    }

    #[test]
    fn test_resolve_program_searches_path_for_bare_names() {
        let sh = resolve_program(Path::new("sh")).unwrap();
        assert!(sh.is_absolute());

        assert!(matches!(
            resolve_program(Path::new("sceneflow-no-such-tool")),
            Err(MediaError::FileNotFound(_))
        ));
        assert!(matches!(
            resolve_program(Path::new("/nonexistent/bin/ffmpeg")),
            Err(MediaError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_spawn_accepts_program_on_path() {
        let cmd = FfmpegCommand::new("in.mp4", "/tmp/out.jpg").program("true");
        let mut process = ExtractionProcess::spawn(&cmd, 8).unwrap();
        let status = process.child.wait().await.unwrap();
        assert!(status.success());

        let missing =
            FfmpegCommand::new("in.mp4", "/tmp/out.jpg").program("sceneflow-no-such-tool");
        assert!(ExtractionProcess::spawn(&missing, 8).is_err());
    }

    #[test]
    fn test_split_lines_handles_carriage_returns() {
        let mut pending = Vec::new();
        let lines = split_lines(&mut pending, b"first\nframe=  1\rframe=  2\rpar");
        assert_eq!(lines, vec!["first", "frame=  1", "frame=  2"]);
        assert_eq!(pending, b"par");

        let lines = split_lines(&mut pending, b"tial\r\n");
        assert_eq!(lines, vec!["partial"]);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_drain_lines_forwards_everything() {
        let data: &[u8] = b"a\nb\r\nc";
        let (tx, mut rx) = mpsc::channel(4);
        drain_lines(data, tx).await;

        let mut out = Vec::new();
        while let Some(line) = rx.recv().await {
            out.push(line);
        }
        assert_eq!(out, vec!["a", "b", "c"]);
    }
}
