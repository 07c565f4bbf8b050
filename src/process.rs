use std::io::{Read, Write};
use std::process::{Child, Command, Output, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{SyncError, SyncResult};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How long the reader threads get to reach EOF once the child has exited.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

#[must_use]
pub fn command_exists(program: &str) -> bool {
    which::which(program).is_ok()
}

pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    timeout: Option<Duration>,
) -> SyncResult<Output> {
    run_command_with_input(program, args, None, timeout)
}

/// Runs `program` to completion, optionally feeding `stdin` and enforcing a
/// hard deadline. The child is killed when the deadline passes.
pub fn run_command_with_input(
    program: &str,
    args: &[String],
    stdin: Option<&[u8]>,
    timeout: Option<Duration>,
) -> SyncResult<Output> {
    if !command_exists(program) {
        return Err(SyncError::CommandMissing {
            command: program.to_owned(),
        });
    }

    let rendered = render_command(program, args);
    let mut command = Command::new(program);
    command.args(args);
    command.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command.spawn()?;
    let started_at = Instant::now();

    if let (Some(payload), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let payload = payload.to_vec();
        // A child that exits early closes its end; the write error is then
        // irrelevant because the exit status tells the story.
        thread::spawn(move || {
            let _ = pipe.write_all(&payload);
        });
    }

    let stdout_rx = drain_pipe(child.stdout.take());
    let stderr_rx = drain_pipe(child.stderr.take());

    loop {
        if let Some(status) = child.try_wait()? {
            let stdout = collect_pipe(&stdout_rx, &rendered, "stdout")?;
            let stderr = collect_pipe(&stderr_rx, &rendered, "stderr")?;
            return validate_command_output(
                &rendered,
                Output {
                    status,
                    stdout,
                    stderr,
                },
            );
        }

        if let Some(limit) = timeout
            && started_at.elapsed() >= limit
        {
            kill_quietly(&mut child);
            let stderr = stderr_rx.recv_timeout(PIPE_DRAIN_GRACE).unwrap_or_default();
            return Err(SyncError::from_command_timeout(
                rendered,
                saturating_duration_ms(limit),
                String::from_utf8_lossy(&stderr).into_owned(),
            ));
        }

        thread::sleep(POLL_INTERVAL);
    }
}

fn drain_pipe<R>(pipe: Option<R>) -> Receiver<Vec<u8>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    if let Some(mut pipe) = pipe {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = tx.send(buf);
        });
    }
    rx
}

/// Output of a reader thread. A pipe that was never opened yields nothing;
/// a pipe still open after the grace period (a background grandchild holding
/// it) is an error rather than silently truncated output.
fn collect_pipe(rx: &Receiver<Vec<u8>>, rendered: &str, stream: &str) -> SyncResult<Vec<u8>> {
    match rx.recv_timeout(PIPE_DRAIN_GRACE) {
        Ok(buf) => Ok(buf),
        Err(RecvTimeoutError::Disconnected) => Ok(Vec::new()),
        Err(RecvTimeoutError::Timeout) => Err(SyncError::Io(std::io::Error::other(format!(
            "`{rendered}` exited but its {stream} stayed open for {}ms",
            saturating_duration_ms(PIPE_DRAIN_GRACE)
        )))),
    }
}

fn kill_quietly(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn render_command(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_owned()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

fn validate_command_output(rendered: &str, output: Output) -> SyncResult<Output> {
    if output.status.success() {
        return Ok(output);
    }

    let status = output.status.code().unwrap_or(-1);
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    Err(SyncError::from_command_failure(
        rendered.to_owned(),
        status,
        stderr,
    ))
}

pub(crate) fn saturating_duration_ms(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}
