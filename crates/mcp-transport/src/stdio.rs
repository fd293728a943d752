//! Process-backed transport: spawns a child, frames JSON-RPC messages over its
//! stdin/stdout, and reaps it on shutdown.
//!
//! Two framing modes are supported because real MCP stdio servers disagree on the wire
//! convention: [`Framing::LengthPrefixed`] (an LSP-style `Content-Length` header block) and
//! [`Framing::LineDelimited`] (one JSON value per newline-terminated line).

use std::fmt;
use std::path::Path;
use std::process::{ExitStatus, Stdio as StdStdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mcp_protocol::{Error, Result};
use mcp_transport_traits::Transport;

const SHELL_METACHARACTERS: &[char] = &[
    ';', '|', '&', '$', '`', '\\', '"', '\'', '<', '>', '(', ')', '{', '}', '[', ']', '!', '#',
    '~',
];

#[cfg(unix)]
const ALLOWED_ABSOLUTE_PREFIXES: &[&str] = &["/usr/bin/", "/usr/local/bin/", "/bin/", "/opt/"];
#[cfg(windows)]
const ALLOWED_ABSOLUTE_PREFIXES: &[&str] =
    &["C:\\Windows\\", "C:\\Program Files\\", "C:\\Program Files (x86)\\"];

/// How JSON-RPC frames are delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `Content-Length: N\r\n\r\n<N bytes of UTF-8 JSON>`, one or more header lines.
    LengthPrefixed,
    /// One JSON value per `\n`-terminated line. A value containing an unescaped newline
    /// cannot be represented this way; `serde_json::to_vec` never produces one.
    LineDelimited,
}

/// What to do with the child's stderr stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StderrPolicy {
    /// Redirect to `/dev/null` (or platform equivalent); nothing is observed.
    Discard,
    /// Share the parent's stderr; useful for interactive debugging, not for production.
    Inherit,
    /// Pipe stderr to a dedicated reader task that appends lines to an in-memory buffer
    /// and, if set, invokes [`StdioTransportConfig::stderr_callback`] per line.
    Capture,
}

type StderrCallback = dyn Fn(&str) + Send + Sync;

/// Construction-time configuration for [`StdioTransport`].
#[derive(Clone)]
pub struct StdioTransportConfig {
    pub command: String,
    pub args: Vec<String>,
    pub max_content_length: usize,
    pub framing: Framing,
    pub stderr_policy: StderrPolicy,
    pub read_timeout: Option<Duration>,
    pub stderr_callback: Option<Arc<StderrCallback>>,
    /// Escape hatch for tests that spawn harmless fixtures (`cat`, shell builtins via a
    /// helper script) from paths that would otherwise fail [`validate_command`].
    pub skip_validation: bool,
}

impl fmt::Debug for StdioTransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdioTransportConfig")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("max_content_length", &self.max_content_length)
            .field("framing", &self.framing)
            .field("stderr_policy", &self.stderr_policy)
            .field("read_timeout", &self.read_timeout)
            .field("stderr_callback", &self.stderr_callback.is_some())
            .field("skip_validation", &self.skip_validation)
            .finish()
    }
}

impl Default for StdioTransportConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            max_content_length: 10 * 1024 * 1024,
            framing: Framing::LengthPrefixed,
            stderr_policy: StderrPolicy::Discard,
            read_timeout: None,
            stderr_callback: None,
            skip_validation: false,
        }
    }
}

impl StdioTransportConfig {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    #[must_use]
    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    #[must_use]
    pub fn with_stderr_policy(mut self, policy: StderrPolicy) -> Self {
        self.stderr_policy = policy;
        self
    }

    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_stderr_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.stderr_callback = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn skipping_validation(mut self) -> Self {
        self.skip_validation = true;
        self
    }
}

/// Reject command lines that look like shell injection, and absolute paths outside the
/// platform's trusted binary directories. Relative commands (resolved via `PATH`, e.g.
/// `"npx"`) are always allowed — the allow-list only constrains *absolute* paths.
fn validate_command(command: &str, args: &[String]) -> Result<()> {
    if command.is_empty() {
        return Err(Error::validation("command must not be empty"));
    }
    for token in std::iter::once(command).chain(args.iter().map(String::as_str)) {
        if token.chars().any(|c| SHELL_METACHARACTERS.contains(&c)) {
            return Err(Error::validation(format!(
                "command token `{token}` contains a disallowed shell metacharacter"
            )));
        }
    }
    if Path::new(command).is_absolute()
        && !ALLOWED_ABSOLUTE_PREFIXES
            .iter()
            .any(|prefix| command.starts_with(prefix))
    {
        return Err(Error::validation(format!(
            "absolute command path `{command}` is not under an allow-listed directory"
        )));
    }
    Ok(())
}

struct Inner {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    read_buf: Vec<u8>,
    exit_status: Option<i32>,
}

/// A [`Transport`] backed by a spawned child process, communicating over its stdin/stdout.
pub struct StdioTransport {
    config: StdioTransportConfig,
    inner: AsyncMutex<Inner>,
    stderr_buffer: Arc<SyncMutex<Vec<u8>>>,
    stderr_task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdioTransport")
            .field("config", &self.config)
            .finish()
    }
}

impl StdioTransport {
    /// Validate `config` (unless [`StdioTransportConfig::skip_validation`] is set) and build
    /// an unstarted transport. Call [`Transport::start`] to actually spawn the process.
    pub fn new(config: StdioTransportConfig) -> Result<Self> {
        if !config.skip_validation {
            validate_command(&config.command, &config.args)?;
        }
        Ok(Self {
            config,
            inner: AsyncMutex::new(Inner {
                child: None,
                stdin: None,
                stdout: None,
                read_buf: Vec::new(),
                exit_status: None,
            }),
            stderr_buffer: Arc::new(SyncMutex::new(Vec::new())),
            stderr_task: AsyncMutex::new(None),
        })
    }

    /// The last exit code observed, if the process has been reaped.
    pub async fn exit_code(&self) -> Option<i32> {
        self.inner.lock().await.exit_status
    }

    /// Whether anything has been captured in the stderr buffer (only populated under
    /// [`StderrPolicy::Capture`]).
    #[must_use]
    pub fn has_stderr_data(&self) -> bool {
        !self.stderr_buffer.lock().is_empty()
    }

    /// Drain and return everything captured in the stderr buffer so far.
    pub fn read_stderr(&self) -> Vec<u8> {
        std::mem::take(&mut *self.stderr_buffer.lock())
    }

    /// True if the child has been spawned and has not been observed to exit.
    pub async fn is_process_alive(&self) -> bool {
        let mut inner = self.inner.lock().await;
        check_alive(&mut inner).is_ok()
    }
}

fn check_alive(inner: &mut Inner) -> Result<()> {
    let Some(child) = inner.child.as_mut() else {
        return Err(Error::NotConnected);
    };
    match child.try_wait() {
        Ok(Some(status)) => {
            let code = exit_code_of(&status);
            inner.exit_status = Some(code);
            Err(Error::network(format!(
                "child process exited with status {code}"
            )))
        }
        Ok(None) => Ok(()),
        Err(e) => Err(Error::network(format!(
            "failed to poll child process status: {e}"
        ))),
    }
}

fn exit_code_of(status: &ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.code().unwrap_or_else(|| -status.signal().unwrap_or(0))
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(-1)
    }
}

async fn fill_buf(stdout: &mut ChildStdout, buf: &mut Vec<u8>) -> Result<()> {
    let mut tmp = [0u8; 8192];
    let n = stdout
        .read(&mut tmp)
        .await
        .map_err(|e| Error::network(format!("stdio read failed: {e}")))?;
    if n == 0 {
        return Err(Error::network("child process closed stdout (EOF)"));
    }
    buf.extend_from_slice(&tmp[..n]);
    Ok(())
}

async fn read_line_from_buf(stdout: &mut ChildStdout, buf: &mut Vec<u8>) -> Result<String> {
    loop {
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return String::from_utf8(line)
                .map_err(|e| Error::protocol(format!("invalid utf-8 in stdio frame: {e}")));
        }
        fill_buf(stdout, buf).await?;
    }
}

async fn read_exact_from_buf(
    stdout: &mut ChildStdout,
    buf: &mut Vec<u8>,
    n: usize,
) -> Result<Vec<u8>> {
    while buf.len() < n {
        fill_buf(stdout, buf).await?;
    }
    Ok(buf.drain(..n).collect())
}

async fn read_length_prefixed(
    stdout: &mut ChildStdout,
    buf: &mut Vec<u8>,
    max_content_length: usize,
) -> Result<Value> {
    let mut content_length = None;
    loop {
        let line = read_line_from_buf(stdout, buf).await?;
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::protocol(format!(
                "malformed stdio header line: {line}"
            )));
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            let value = value.trim();
            content_length = Some(
                value
                    .parse::<usize>()
                    .map_err(|_| Error::protocol(format!("invalid Content-Length: {value}")))?,
            );
        }
    }
    let n = content_length.ok_or_else(|| Error::protocol("missing Content-Length header"))?;
    if n > max_content_length {
        return Err(Error::protocol(format!(
            "Content-Length {n} exceeds the configured maximum of {max_content_length}"
        )));
    }
    let body = read_exact_from_buf(stdout, buf, n).await?;
    serde_json::from_slice(&body)
        .map_err(|e| Error::protocol(format!("invalid JSON in stdio body: {e}")))
}

#[async_trait]
impl Transport for StdioTransport {
    async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.child.is_some() {
            return Ok(());
        }

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args);
        cmd.stdin(StdStdio::piped());
        cmd.stdout(StdStdio::piped());
        cmd.stderr(match self.config.stderr_policy {
            StderrPolicy::Discard => StdStdio::null(),
            StderrPolicy::Inherit => StdStdio::inherit(),
            StderrPolicy::Capture => StdStdio::piped(),
        });
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            Error::network(format!("failed to spawn `{}`: {e}", self.config.command))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::network("child stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::network("child stdout was not piped"))?;

        if matches!(self.config.stderr_policy, StderrPolicy::Capture) {
            let stderr = child
                .stderr
                .take()
                .ok_or_else(|| Error::network("child stderr was not piped"))?;
            let buffer = self.stderr_buffer.clone();
            let callback = self.config.stderr_callback.clone();
            let task = tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut line = String::new();
                loop {
                    line.clear();
                    match reader.read_line(&mut line).await {
                        Ok(0) => break,
                        Ok(_) => {
                            buffer.lock().extend_from_slice(line.as_bytes());
                            if let Some(cb) = callback.as_ref() {
                                cb(line.trim_end());
                            }
                        }
                        Err(e) => {
                            warn!("stdio stderr reader failed: {e}");
                            break;
                        }
                    }
                }
            });
            *self.stderr_task.lock().await = Some(task);
        }

        info!(command = %self.config.command, "spawned child process");
        inner.child = Some(child);
        inner.stdin = Some(stdin);
        inner.stdout = Some(stdout);
        inner.read_buf.clear();
        inner.exit_status = None;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(mut child) = inner.child.take() else {
            return Ok(());
        };
        inner.stdin = None;
        inner.stdout = None;

        if matches!(child.try_wait(), Ok(None)) {
            #[cfg(unix)]
            {
                if let Some(pid) = child.id() {
                    // SAFETY: `pid` was returned by `Child::id` for this still-running child.
                    unsafe {
                        libc::kill(pid as libc::pid_t, libc::SIGTERM);
                    }
                }
            }
            #[cfg(not(unix))]
            {
                let _ = child.start_kill();
            }

            let mut exited = false;
            for _ in 0..10 {
                tokio::time::sleep(Duration::from_millis(20)).await;
                if matches!(child.try_wait(), Ok(Some(_))) {
                    exited = true;
                    break;
                }
            }
            if !exited {
                let _ = child.kill().await;
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| Error::network(format!("failed to reap child process: {e}")))?;
        inner.exit_status = Some(exit_code_of(&status));

        if let Some(task) = self.stderr_task.lock().await.take() {
            task.abort();
        }

        debug!(exit_status = ?inner.exit_status, "stdio transport stopped");
        Ok(())
    }

    async fn send(&self, message: Value) -> Result<()> {
        let mut inner = self.inner.lock().await;
        check_alive(&mut inner)?;

        let body = serde_json::to_vec(&message)
            .map_err(|e| Error::protocol(format!("failed to serialize outbound message: {e}")))?;
        let framed = match self.config.framing {
            Framing::LengthPrefixed => {
                let mut out = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
                out.extend_from_slice(&body);
                out
            }
            Framing::LineDelimited => {
                let mut out = body;
                out.push(b'\n');
                out
            }
        };

        let stdin = inner
            .stdin
            .as_mut()
            .ok_or_else(|| Error::network("stdio stdin is not available"))?;
        let written = stdin
            .write(&framed)
            .await
            .map_err(|e| Error::network(format!("stdio write failed: {e}")))?;
        if written != framed.len() {
            return Err(Error::network(format!(
                "short write to child stdin: wrote {written} of {} bytes",
                framed.len()
            )));
        }
        stdin
            .flush()
            .await
            .map_err(|e| Error::network(format!("stdio flush failed: {e}")))?;
        Ok(())
    }

    async fn receive(&self) -> Result<Value> {
        let fut = async {
            let mut inner = self.inner.lock().await;
            check_alive(&mut inner)?;
            let Inner {
                stdout, read_buf, ..
            } = &mut *inner;
            let stdout = stdout
                .as_mut()
                .ok_or_else(|| Error::network("stdio stdout is not available"))?;
            match self.config.framing {
                Framing::LengthPrefixed => {
                    read_length_prefixed(stdout, read_buf, self.config.max_content_length).await
                }
                Framing::LineDelimited => {
                    let line = read_line_from_buf(stdout, read_buf).await?;
                    serde_json::from_str(&line)
                        .map_err(|e| Error::protocol(format!("invalid JSON line: {e}")))
                }
            }
        };
        match self.config.read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, fut).await.map_err(|_| {
                Error::timeout(format!("no message received within {timeout:?}"))
            })?,
            None => fut.await,
        }
    }

    async fn is_running(&self) -> bool {
        self.is_process_alive().await
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.try_lock() {
            if let Some(child) = inner.child.as_mut() {
                #[cfg(unix)]
                {
                    if let Some(pid) = child.id() {
                        // SAFETY: `pid` was returned by `Child::id` for this still-running child.
                        unsafe {
                            libc::kill(pid as libc::pid_t, libc::SIGTERM);
                        }
                    }
                }
                #[cfg(not(unix))]
                {
                    let _ = child.start_kill();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn cat_config() -> StdioTransportConfig {
        StdioTransportConfig::new("/bin/cat")
    }

    #[test]
    fn rejects_shell_metacharacters() {
        let err = validate_command("/bin/echo", &["hi; rm -rf /".to_string()]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn rejects_unlisted_absolute_path() {
        let err = validate_command("/home/attacker/evil", &[]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn allows_relative_command() {
        assert!(validate_command("npx", &["some-mcp-server".to_string()]).is_ok());
    }

    #[test]
    fn allows_listed_absolute_path() {
        assert!(validate_command("/usr/bin/env", &[]).is_ok());
    }

    #[tokio::test]
    async fn length_prefixed_round_trip_through_cat() {
        let transport = StdioTransport::new(cat_config()).unwrap();
        transport.start().await.unwrap();

        let request = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"});
        transport.send(request.clone()).await.unwrap();
        let echoed = transport.receive().await.unwrap();
        assert_eq!(echoed, request);

        transport.stop().await.unwrap();
    }

    #[tokio::test]
    async fn line_delimited_round_trip_through_cat() {
        let config = cat_config().with_framing(Framing::LineDelimited);
        let transport = StdioTransport::new(config).unwrap();
        transport.start().await.unwrap();

        let request = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        transport.send(request.clone()).await.unwrap();
        let echoed = transport.receive().await.unwrap();
        assert_eq!(echoed, request);

        transport.stop().await.unwrap();
    }

    #[tokio::test]
    async fn content_length_header_is_case_insensitive() {
        let transport = StdioTransport::new(cat_config()).unwrap();
        transport.start().await.unwrap();

        {
            let mut inner = transport.inner.lock().await;
            let stdin = inner.stdin.as_mut().unwrap();
            stdin
                .write_all(b"content-length: 13\r\n\r\n{\"ok\":true}\n")
                .await
                .unwrap();
        }
        let value = transport.receive().await.unwrap();
        assert_eq!(value, json!({"ok": true}));

        transport.stop().await.unwrap();
    }

    #[tokio::test]
    async fn oversized_content_length_is_rejected() {
        let mut config = StdioTransportConfig::new("/bin/cat").with_framing(Framing::LengthPrefixed);
        config.max_content_length = 4;
        let transport = StdioTransport::new(config).unwrap();
        transport.start().await.unwrap();

        {
            let mut inner = transport.inner.lock().await;
            let stdin = inner.stdin.as_mut().unwrap();
            stdin
                .write_all(b"Content-Length: 100\r\n\r\n")
                .await
                .unwrap();
        }
        let err = transport.receive().await.unwrap_err();
        assert!(matches!(err, Error::TransportProtocol(_)));

        transport.stop().await.unwrap();
    }

    #[tokio::test]
    async fn read_timeout_fires_when_no_message_arrives() {
        let config = StdioTransportConfig::new("/bin/sleep")
            .with_args(vec!["5".to_string()])
            .with_read_timeout(Duration::from_millis(50));
        let transport = StdioTransport::new(config).unwrap();
        transport.start().await.unwrap();

        let err = transport.receive().await.unwrap_err();
        assert!(matches!(err, Error::TransportTimeout(_)));

        transport.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_start_is_reentrant() {
        let transport = StdioTransport::new(cat_config()).unwrap();
        transport.start().await.unwrap();
        transport.start().await.unwrap();
        transport.stop().await.unwrap();
        transport.stop().await.unwrap();
        assert!(!transport.is_process_alive().await);
    }

    #[tokio::test]
    async fn stderr_is_captured_under_capture_policy() {
        let config = StdioTransportConfig::new("/bin/sh")
            .with_args(vec!["-c".to_string(), "echo oops 1>&2".to_string()])
            .with_stderr_policy(StderrPolicy::Capture)
            .skipping_validation();
        let transport = StdioTransport::new(config).unwrap();
        transport.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        transport.stop().await.unwrap();
        assert!(transport.has_stderr_data());
        assert!(String::from_utf8(transport.read_stderr())
            .unwrap()
            .contains("oops"));
    }

    #[tokio::test]
    async fn send_after_process_exit_is_a_transport_error() {
        let config = StdioTransportConfig::new("/bin/true");
        let transport = StdioTransport::new(config).unwrap();
        transport.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let err = transport.send(json!({"jsonrpc": "2.0"})).await.unwrap_err();
        assert!(matches!(err, Error::TransportNetwork(_)));
        assert_eq!(transport.exit_code().await, Some(0));
    }
}
