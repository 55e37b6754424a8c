use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    process::Child,
    sync::oneshot,
};

pub const DEFAULT_DOWNLOADER: &str = "youtube-dl";

const COMPAT_FLAG: &str = "--hls-use-mpegts";

const MARKER_NOT_STARTED: &str = "This live event will begin in";
const MARKER_ALREADY_DOWNLOADED: &str = "already been downloaded and merged";

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("I/O error")]
    IoError(#[from] std::io::Error),
}

/// Exit state and combined stdout/stderr text of one capture attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOutput {
    pub success: bool,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The stream has not started yet, try again.
    LiveNotStarted,
    /// The tool reports the stream is fully captured.
    AlreadyDownloaded,
    /// Zero exit without any known marker.
    Finished,
    /// Non-zero exit without any known marker.
    Failed,
}

impl CaptureOutput {
    pub fn classify(&self) -> AttemptOutcome {
        if self.text.contains(MARKER_NOT_STARTED) {
            AttemptOutcome::LiveNotStarted
        } else if self.text.contains(MARKER_ALREADY_DOWNLOADED) {
            AttemptOutcome::AlreadyDownloaded
        } else if self.success {
            AttemptOutcome::Finished
        } else {
            AttemptOutcome::Failed
        }
    }
}

/// Runs the external capture tool once.
#[async_trait]
pub trait Capturer: Send + Sync {
    /// Captures `url` until the tool exits. Firing `interrupt` asks the
    /// running tool to stop; the call still waits for it to exit.
    async fn capture(
        &self,
        url: &str,
        interrupt: oneshot::Receiver<()>,
    ) -> Result<CaptureOutput, CaptureError>;
}

pub struct YoutubeDl {
    program: String,
}

impl YoutubeDl {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

impl Default for YoutubeDl {
    fn default() -> Self {
        Self::new(DEFAULT_DOWNLOADER)
    }
}

#[async_trait]
impl Capturer for YoutubeDl {
    async fn capture(
        &self,
        url: &str,
        mut interrupt: oneshot::Receiver<()>,
    ) -> Result<CaptureOutput, CaptureError> {
        let mut child = tokio::process::Command::new(&self.program)
            .arg(COMPAT_FLAG)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let tee_out = tokio::spawn(async move {
            match stdout {
                Some(r) => tee(r, tokio::io::stdout()).await,
                None => Ok(Vec::new()),
            }
        });
        let tee_err = tokio::spawn(async move {
            match stderr {
                Some(r) => tee(r, tokio::io::stderr()).await,
                None => Ok(Vec::new()),
            }
        });

        let status = tokio::select! {
            status = child.wait() => status?,
            Ok(()) = &mut interrupt => {
                interrupt_child(&child);
                child.wait().await?
            }
        };

        let out = join_tee(tee_out).await?;
        let err = join_tee(tee_err).await?;

        Ok(output_from(status, &out, &err))
    }
}

fn output_from(status: ExitStatus, out: &[u8], err: &[u8]) -> CaptureOutput {
    CaptureOutput {
        success: status.success(),
        text: format!(
            "{}\n{}",
            String::from_utf8_lossy(out),
            String::from_utf8_lossy(err)
        ),
    }
}

async fn join_tee(
    handle: tokio::task::JoinHandle<std::io::Result<Vec<u8>>>,
) -> std::io::Result<Vec<u8>> {
    handle
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
}

/// Copies `reader` into `sink` while keeping everything read.
async fn tee<R, W>(mut reader: R, mut sink: W) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut captured = Vec::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        captured.extend_from_slice(&buf[..n]);
        // Mirroring is best effort
        let _ = sink.write_all(&buf[..n]).await;
    }
    let _ = sink.flush().await;

    Ok(captured)
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn interrupt_child(child: &Child) {
    let Some(pid) = child.id() else {
        debug!("capture tool already exited");
        return;
    };

    // SAFETY: kill(2) only sends a signal, the pid comes from our own child
    let res = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
    if res != 0 {
        warn!(
            "Could not interrupt capture tool: {}",
            std::io::Error::last_os_error()
        );
    } else {
        info!("Sent interrupt to capture tool (pid {})", pid);
    }
}

#[cfg(not(unix))]
fn interrupt_child(_child: &Child) {
    warn!("Interrupting the capture tool is not supported on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(success: bool, text: &str) -> CaptureOutput {
        CaptureOutput {
            success,
            text: text.to_string(),
        }
    }

    #[test]
    fn classify_markers() {
        assert_eq!(
            output(false, "ERROR: This live event will begin in 5 minutes.").classify(),
            AttemptOutcome::LiveNotStarted
        );
        assert_eq!(
            output(true, "[download] foo.mp4 has already been downloaded and merged").classify(),
            AttemptOutcome::AlreadyDownloaded
        );
    }

    #[test]
    fn classify_without_markers() {
        assert_eq!(output(true, "[download] 100%").classify(), AttemptOutcome::Finished);
        assert_eq!(
            output(false, "ERROR: unable to download webpage").classify(),
            AttemptOutcome::Failed
        );
    }

    #[tokio::test]
    async fn tee_keeps_everything() {
        let input: &[u8] = b"line one\nline two\n";
        let mut mirror = Vec::new();
        let captured = tee(input, &mut mirror).await.unwrap();

        assert_eq!(captured, input);
        assert_eq!(mirror, input);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_program_and_collects_output() {
        // `echo` prints its arguments, which include the watch URL
        let capturer = YoutubeDl::new("echo");
        let (_tx, rx) = oneshot::channel();
        let out = capturer
            .capture("https://www.youtube.com/watch?v=abc", rx)
            .await
            .expect("echo should run");

        assert!(out.success);
        assert!(out.text.contains("--hls-use-mpegts https://www.youtube.com/watch?v=abc"));
        assert_eq!(out.classify(), AttemptOutcome::Finished);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn interrupt_stops_program() {
        // `sleep` rejects the flag arguments, so wrap it in a script that ignores them
        let dir = std::env::temp_dir().join(format!("yta-watch-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let script = dir.join("fake-dl.sh");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let capturer = YoutubeDl::new(&script.to_string_lossy());
        let (tx, rx) = oneshot::channel();
        let started = std::time::Instant::now();
        let run = tokio::spawn(async move { capturer.capture("url", rx).await });

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        tx.send(()).unwrap();
        let out = run.await.unwrap().unwrap();

        assert!(!out.success);
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
