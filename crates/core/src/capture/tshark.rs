//! Live capture through an external `tshark` process.
//!
//! tshark does all the dissection; it is asked to print the two TCP fields we
//! care about, tab separated, one packet per line. Stopping the stream (by
//! dropping it) kills the child process.

use std::path::PathBuf;
use std::process::Stdio;

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};

use super::{CaptureError, CaptureStream, PacketMetadata};

const TSHARK_BIN: &str = "tshark";
/// Where Homebrew puts tshark on Apple Silicon machines.
const FALLBACK_TSHARK_PATH: &str = "/opt/homebrew/bin/tshark";

const WINDOW_SIZE_FIELD: &str = "tcp.window_size_value";
const ACK_RTT_FIELD: &str = "tcp.analysis.ack_rtt";

/// Live capture on one interface, narrowed by a display filter.
#[derive(Debug, Clone)]
pub struct TsharkCapture {
    tshark_path: PathBuf,
    interface: String,
    display_filter: String,
}

impl TsharkCapture {
    /// Builds a capture, locating tshark on `PATH` unless `tshark_path` is given.
    pub fn new(
        interface: impl Into<String>,
        display_filter: impl Into<String>,
        tshark_path: Option<PathBuf>,
    ) -> Result<Self, CaptureError> {
        let tshark_path = match tshark_path {
            Some(path) => path,
            None => locate_tshark()?,
        };
        tracing::debug!(tshark = %tshark_path.display(), "Using tshark binary");
        Ok(Self {
            tshark_path,
            interface: interface.into(),
            display_filter: display_filter.into(),
        })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.tshark_path);
        cmd.arg("-i")
            .arg(&self.interface)
            .args(["-l", "-n", "-T", "fields", "-E", "separator=/t", "-E", "occurrence=f"])
            .args(["-e", WINDOW_SIZE_FIELD, "-e", ACK_RTT_FIELD]);
        if !self.display_filter.is_empty() {
            cmd.arg("-Y").arg(&self.display_filter);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Spawns tshark and returns the stream of captured packets.
    ///
    /// The stream yields a final [`CaptureError::Exited`] when tshark stops on
    /// its own, then ends.
    pub fn start(&self) -> Result<CaptureStream, CaptureError> {
        tracing::info!(
            interface = %self.interface,
            filter = %self.display_filter,
            "Starting packet capture"
        );
        let mut child = self.command().spawn().map_err(CaptureError::Spawn)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Exited("tshark stdout unavailable".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "congestion_monitor::capture::tshark", "{line}");
                }
            });
        }

        let state = Some(TsharkOutput {
            child,
            lines: BufReader::new(stdout).lines(),
        });
        let stream = futures::stream::unfold(state, |state| async move {
            let mut out = state?;
            match out.lines.next_line().await {
                Ok(Some(line)) => Some((Ok(parse_fields_line(&line)), Some(out))),
                Ok(None) => {
                    let status = out.child.wait().await;
                    let reason = match status {
                        Ok(status) => format!("tshark terminated with {status}"),
                        Err(err) => format!("tshark terminated: {err}"),
                    };
                    Some((Err(CaptureError::Exited(reason)), None))
                }
                Err(err) => Some((Err(CaptureError::Io(err)), None)),
            }
        });
        Ok(stream.boxed())
    }
}

struct TsharkOutput {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
}

/// Splits one line of `-T fields` output into its raw field values.
///
/// Empty columns mean tshark did not find the field on that packet.
pub(crate) fn parse_fields_line(line: &str) -> PacketMetadata {
    let mut columns = line.trim_end_matches(['\r', '\n']).split('\t');
    let mut next_field = || {
        columns
            .next()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned)
    };
    let window_size = next_field();
    let ack_rtt = next_field();
    PacketMetadata {
        window_size,
        ack_rtt,
    }
}

fn locate_tshark() -> Result<PathBuf, CaptureError> {
    if let Some(found) = std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(TSHARK_BIN))
            .find(|candidate| candidate.is_file())
    }) {
        return Ok(found);
    }
    let fallback = PathBuf::from(FALLBACK_TSHARK_PATH);
    if fallback.is_file() {
        tracing::warn!(
            tshark = %fallback.display(),
            "tshark not found on PATH, using default location"
        );
        return Ok(fallback);
    }
    Err(CaptureError::ToolNotFound(format!(
        "{TSHARK_BIN} is not on PATH and {FALLBACK_TSHARK_PATH} does not exist"
    )))
}
