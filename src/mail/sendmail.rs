//! Local sendmail transport
//!
//! Pipes each message to `sendmail -t -i`, which reads recipients from the
//! headers. The child is killed if it has not exited within the timeout so
//! a stuck MTA cannot stall the bounce pass. Its stdout and stderr are
//! drained on reader threads so a chatty transport never blocks on a full
//! pipe.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{MailSink, SendError};

/// Default sendmail binary
pub const DEFAULT_SENDMAIL: &str = "/usr/sbin/sendmail";

/// How often the child is checked for exit
const WAIT_STEP: Duration = Duration::from_millis(20);

/// Sink delivering through a sendmail-compatible binary
#[derive(Debug, Clone)]
pub struct SendmailSink {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl SendmailSink {
    /// Create a sink running `program -t -i` with the given timeout
    pub fn new<P: AsRef<Path>>(program: P, timeout: Duration) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: vec!["-t".to_string(), "-i".to_string()],
            timeout,
        }
    }

    /// Replace the arguments passed to the program
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Program being run
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Wait for the child, killing it once the deadline passes
    fn wait(&self, child: &mut Child, output: Drain) -> Result<(), SendError> {
        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    warn!(program = %self.program.display(), "mail transport timed out, killing it");
                    let _ = child.kill();
                    let _ = child.wait();
                    // Readers are left to finish on their own; a grandchild
                    // may still hold the pipes open.
                    return Err(SendError::Timeout(self.timeout));
                }
                None => thread::sleep(WAIT_STEP),
            }
        };

        let text = output.collect();
        if status.success() {
            return Ok(());
        }
        Err(SendError::Rejected {
            status: status.code(),
            output: text.trim().to_string(),
        })
    }
}

/// Reader threads for the child's stdout and stderr
struct Drain {
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
}

impl Drain {
    fn start(child: &mut Child) -> Self {
        Self {
            stdout: child.stdout.take().map(read_all),
            stderr: child.stderr.take().map(read_all),
        }
    }

    /// Join both readers and return stdout followed by stderr
    fn collect(self) -> String {
        let mut text = String::new();
        for handle in [self.stdout, self.stderr].into_iter().flatten() {
            let bytes = handle.join().unwrap_or_default();
            text.push_str(&String::from_utf8_lossy(&bytes));
        }
        text
    }
}

fn read_all<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

impl Default for SendmailSink {
    fn default() -> Self {
        Self::new(DEFAULT_SENDMAIL, Duration::from_secs(30))
    }
}

impl MailSink for SendmailSink {
    fn send(&self, message: &[u8]) -> Result<(), SendError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SendError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let output = Drain::start(&mut child);
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(message).and_then(|_| stdin.flush()),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin not captured")),
        };

        match written {
            Ok(()) => {
                debug!(program = %self.program.display(), bytes = message.len(), "message handed to transport");
                self.wait(&mut child, output)
            }
            Err(e) => {
                // Prefer the transport's own exit status and output when it
                // quit before reading the message.
                self.wait(&mut child, output)?;
                Err(SendError::Io(e))
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> SendmailSink {
        SendmailSink::new("/bin/sh", timeout).with_args(["-c", script])
    }

    #[test]
    fn test_successful_send() {
        let sink = sh("cat > /dev/null", Duration::from_secs(10));
        sink.send(b"To: a@example.org\r\n\r\nbody\r\n").unwrap();
    }

    #[test]
    fn test_rejected_send_carries_output() {
        let sink = sh("cat > /dev/null; echo 'no such user' >&2; exit 67", Duration::from_secs(10));

        match sink.send(b"To: a@example.org\r\n\r\nbody\r\n") {
            Err(SendError::Rejected { status, output }) => {
                assert_eq!(status, Some(67));
                assert_eq!(output, "no such user");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_timeout_kills_transport() {
        let sink = sh("cat > /dev/null; sleep 10", Duration::from_millis(100));
        let start = Instant::now();

        assert!(matches!(
            sink.send(b"To: a@example.org\r\n\r\nbody\r\n"),
            Err(SendError::Timeout(_))
        ));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_large_output_does_not_time_out() {
        let sink = sh(
            "cat > /dev/null; head -c 200000 /dev/zero | tr '\\0' x; head -c 200000 /dev/zero | tr '\\0' y >&2",
            Duration::from_secs(10),
        );
        sink.send(b"To: a@example.org\r\n\r\nbody\r\n").unwrap();
    }

    #[test]
    fn test_large_output_is_reported_on_rejection() {
        let sink = sh(
            "cat > /dev/null; head -c 100000 /dev/zero | tr '\\0' x; echo; echo 'quota exceeded' >&2; exit 75",
            Duration::from_secs(10),
        );

        match sink.send(b"To: a@example.org\r\n\r\nbody\r\n") {
            Err(SendError::Rejected { status, output }) => {
                assert_eq!(status, Some(75));
                assert!(output.starts_with("xxxx"));
                assert!(output.ends_with("quota exceeded"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_program() {
        let sink = SendmailSink::new("/nonexistent/sendmail", Duration::from_secs(1));
        assert!(matches!(sink.send(b"x"), Err(SendError::Spawn { .. })));
    }
}
