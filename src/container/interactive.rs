//! Attached container sessions

use crate::error::{BerthError, Result};
use crate::runtime::DynContainerRuntime;
use futures_util::StreamExt;
use std::io::Read;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PIPE_CAPACITY: usize = 8 * 1024;

/// Puts the local terminal in raw mode until dropped.
pub struct RawModeGuard {
    enabled: bool,
}

impl RawModeGuard {
    /// Enter raw mode. A terminal that refuses is logged and left as is.
    pub fn enter() -> Self {
        match crossterm::terminal::enable_raw_mode() {
            Ok(()) => Self { enabled: true },
            Err(e) => {
                info!("Could not put the terminal in raw mode: {}", e);
                Self { enabled: false }
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.enabled {
            if let Err(e) = crossterm::terminal::disable_raw_mode() {
                warn!("Failed to restore terminal: {}", e);
            }
        }
    }
}

/// Local end of an attached session
pub struct SessionIo {
    pub input: Box<dyn AsyncRead + Send + Unpin>,
    pub output: Box<dyn AsyncWrite + Send + Unpin>,
    /// Put the local terminal in raw mode for the session
    pub raw_terminal: bool,
}

impl SessionIo {
    pub fn new(
        input: impl AsyncRead + Send + Unpin + 'static,
        output: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            input: Box::new(input),
            output: Box::new(output),
            raw_terminal: false,
        }
    }

    /// Process stdin and stdout, with the terminal in raw mode.
    pub fn terminal() -> Self {
        Self {
            input: Box::new(stdin_pipe()),
            output: Box::new(tokio::io::stdout()),
            raw_terminal: true,
        }
    }

    /// No input; output goes to stdout.
    pub fn detached() -> Self {
        Self::new(tokio::io::empty(), tokio::io::stdout())
    }
}

/// Proxy process stdin through an in-memory pipe.
///
/// A dedicated thread owns stdin, so dropping the returned reader never
/// closes the process's real stdin.
pub fn stdin_pipe() -> DuplexStream {
    let (reader, mut writer) = tokio::io::duplex(PIPE_CAPACITY);
    let handle = tokio::runtime::Handle::current();

    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            let n = match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if handle.block_on(writer.write_all(&buf[..n])).is_err() {
                break;
            }
        }
    });

    reader
}

/// Attach to `name`, start it, and proxy `io` until it exits.
///
/// Cancelling `cancel` stops the container gracefully. A non-zero exit code
/// is returned as [`BerthError::ContainerExited`].
pub async fn run_session(
    runtime: &DynContainerRuntime,
    name: &str,
    io: SessionIo,
    cancel: CancellationToken,
    stop_timeout: u32,
) -> Result<()> {
    let streams = runtime.attach(name).await?;
    let _raw = io.raw_terminal.then(RawModeGuard::enter);

    let SessionIo {
        mut input,
        mut output,
        ..
    } = io;

    let mut container_input = streams.input;
    let input_task = tokio::spawn(async move {
        if let Err(e) = tokio::io::copy(&mut input, &mut container_input).await {
            debug!("Session input closed: {}", e);
        }
        let _ = container_input.shutdown().await;
    });

    let mut container_output = streams.output;
    let output_task = tokio::spawn(async move {
        while let Some(chunk) = container_output.next().await {
            output.write_all(&chunk?).await?;
            output.flush().await?;
        }
        Ok::<_, BerthError>(())
    });

    let session = async {
        runtime.start(name).await?;
        tokio::select! {
            code = runtime.wait(name) => code,
            _ = cancel.cancelled() => {
                info!("Stopping {}", name);
                runtime.stop(name, stop_timeout).await?;
                runtime.wait(name).await
            }
        }
    };

    let code = match session.await {
        Ok(code) => code,
        Err(e) => {
            input_task.abort();
            output_task.abort();
            return Err(e);
        }
    };

    input_task.abort();
    match output_task.await {
        Ok(Err(e)) => warn!("Session output for {} failed: {}", name, e),
        Err(e) => warn!("Session output task for {} failed: {}", name, e),
        Ok(Ok(())) => {}
    }

    if code != 0 {
        return Err(BerthError::ContainerExited {
            name: name.to_string(),
            code,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerSpec;
    use crate::runtime::memory::Event;
    use crate::runtime::{ContainerRuntime, MemoryRuntime};
    use std::sync::Arc;

    async fn runtime_with(name: &str) -> (MemoryRuntime, DynContainerRuntime) {
        let memory = MemoryRuntime::new().with_image("busybox");
        memory
            .create(&ContainerSpec::new(name, "busybox"))
            .await
            .unwrap();
        let runtime: DynContainerRuntime = Arc::new(memory.clone());
        (memory, runtime)
    }

    #[tokio::test]
    async fn test_session_copies_output() {
        let (memory, runtime) = runtime_with("sh").await;
        memory.set_output("sh", b"hello\n").unwrap();

        let (mut local, remote) = tokio::io::duplex(1024);
        let io = SessionIo::new(tokio::io::empty(), remote);
        run_session(&runtime, "sh", io, CancellationToken::new(), 1)
            .await
            .unwrap();

        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut local, &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"hello\n");
    }

    #[tokio::test]
    async fn test_session_exit_code() {
        let (memory, runtime) = runtime_with("sh").await;
        memory.set_exit_code("sh", 3).unwrap();

        let io = SessionIo::new(tokio::io::empty(), tokio::io::sink());
        let err = run_session(&runtime, "sh", io, CancellationToken::new(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, BerthError::ContainerExited { code: 3, .. }));
    }

    #[tokio::test]
    async fn test_session_missing_container() {
        let (_memory, runtime) = runtime_with("sh").await;
        let io = SessionIo::new(tokio::io::empty(), tokio::io::sink());
        let err = run_session(&runtime, "other", io, CancellationToken::new(), 1)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_cancel_stops_container() {
        let (memory, runtime) = runtime_with("sh").await;
        memory.hold("sh").unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            trigger.cancel();
        });

        let io = SessionIo::new(tokio::io::empty(), tokio::io::sink());
        run_session(&runtime, "sh", io, cancel, 1).await.unwrap();

        let events = memory.events();
        assert!(events.contains(&Event::Stop("sh".to_string())));
        assert!(!memory.inspect("sh").await.unwrap().unwrap().running);
    }

    #[tokio::test]
    async fn test_failed_start_ends_session_tasks() {
        let (memory, runtime) = runtime_with("sh").await;
        memory.fail_start("sh").unwrap();

        let (mut feed, input) = tokio::io::duplex(64);
        let io = SessionIo::new(input, tokio::io::sink());
        let err = run_session(&runtime, "sh", io, CancellationToken::new(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, BerthError::Runtime(_)));

        // The input task owned the other end; once it is gone writes fail.
        let closed = tokio::time::timeout(std::time::Duration::from_secs(1), async {
            loop {
                if let Err(e) = feed.write_all(b"x").await {
                    return e.kind();
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(closed, std::io::ErrorKind::BrokenPipe);
    }
}
