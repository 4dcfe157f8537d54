//! Virus scan gate backed by a ClamAV daemon.
//!
//! Raw message bytes are streamed to clamd over its TCP INSTREAM protocol.
//! An unreachable daemon degrades to [`Verdict::Unavailable`]: the message is
//! stored unscanned with a warning, never dropped or blocked.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// INSTREAM chunk size sent to clamd.
const CHUNK_SIZE: usize = 8192;

/// Network timeout for a single scan round-trip.
const SCAN_TIMEOUT: Duration = Duration::from_secs(60);

/// Scan verdict for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    Infected(String),
    /// Daemon unreachable or the scan itself failed.
    Unavailable,
}

/// Configured response to a positive verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanAction {
    /// Store regardless, flag if infected.
    Quarantine,
    /// Skip storage entirely if infected (message is lost from this pass).
    Reject,
    /// Always store, log the verdict.
    LogOnly,
}

impl ScanAction {
    /// Parses the settings-table representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "quarantine" => Some(ScanAction::Quarantine),
            "reject" => Some(ScanAction::Reject),
            "log_only" => Some(ScanAction::LogOnly),
            _ => None,
        }
    }

    /// Whether a message with this verdict should be stored.
    /// Only `reject` + infected drops a message; `Unavailable` always stores.
    pub fn should_store(&self, verdict: &Verdict) -> bool {
        !(matches!(self, ScanAction::Reject) && matches!(verdict, Verdict::Infected(_)))
    }
}

/// Result of running one message through the gate.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub verdict: Verdict,
    pub timestamp: DateTime<Utc>,
}

impl ScanReport {
    /// True when the daemon actually examined the bytes.
    pub fn scanned(&self) -> bool {
        !matches!(self.verdict, Verdict::Unavailable)
    }

    pub fn detected(&self) -> bool {
        matches!(self.verdict, Verdict::Infected(_))
    }

    pub fn virus_name(&self) -> Option<&str> {
        match &self.verdict {
            Verdict::Infected(name) => Some(name),
            _ => None,
        }
    }
}

/// Scan gate the ingestion pipeline routes raw messages through. Tests
/// substitute a stub; production uses [`ClamdScanner`].
#[async_trait::async_trait]
pub trait ScanGate: Send + Sync {
    async fn scan(&self, bytes: &[u8]) -> ScanReport;
}

#[async_trait::async_trait]
impl ScanGate for ClamdScanner {
    async fn scan(&self, bytes: &[u8]) -> ScanReport {
        ClamdScanner::scan(self, bytes).await
    }
}

/// ClamAV daemon client.
#[derive(Debug, Clone)]
pub struct ClamdScanner {
    host: String,
    port: u16,
}

impl ClamdScanner {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Checks daemon liveness with a PING command.
    pub async fn ping(&self) -> bool {
        match self.command(b"zPING\0").await {
            Ok(response) => response.trim_end_matches('\0').trim() == "PONG",
            Err(e) => {
                debug!("clamd ping failed: {}", e);
                false
            }
        }
    }

    /// Scans raw message bytes, returning a verdict with a timestamp.
    ///
    /// Never returns an error: connection and protocol failures collapse to
    /// `Verdict::Unavailable` so the caller can store-unscanned-and-warn.
    pub async fn scan(&self, bytes: &[u8]) -> ScanReport {
        let timestamp = Utc::now();
        let verdict = match tokio::time::timeout(SCAN_TIMEOUT, self.instream(bytes)).await {
            Ok(Ok(response)) => parse_scan_response(&response),
            Ok(Err(e)) => {
                warn!(
                    "clamd at {}:{} not available, skipping virus scan: {}",
                    self.host, self.port, e
                );
                Verdict::Unavailable
            }
            Err(_) => {
                warn!("clamd scan timed out after {:?}", SCAN_TIMEOUT);
                Verdict::Unavailable
            }
        };

        ScanReport { verdict, timestamp }
    }

    /// Runs the INSTREAM protocol: `zINSTREAM\0`, then length-prefixed
    /// chunks, then a zero-length terminator, then reads the reply.
    async fn instream(&self, bytes: &[u8]) -> std::io::Result<String> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;

        stream.write_all(b"zINSTREAM\0").await?;
        for chunk in bytes.chunks(CHUNK_SIZE) {
            stream.write_all(&(chunk.len() as u32).to_be_bytes()).await?;
            stream.write_all(chunk).await?;
        }
        stream.write_all(&0u32.to_be_bytes()).await?;

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await?;
        Ok(String::from_utf8_lossy(&response).into_owned())
    }

    async fn command(&self, cmd: &[u8]) -> std::io::Result<String> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.write_all(cmd).await?;

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await?;
        Ok(String::from_utf8_lossy(&response).into_owned())
    }
}

/// Parses a clamd INSTREAM reply into a verdict.
///
/// Replies look like `stream: OK`, `stream: Eicar-Test-Signature FOUND` or
/// `INSTREAM size limit exceeded. ERROR`.
fn parse_scan_response(response: &str) -> Verdict {
    let reply = response.trim_end_matches('\0').trim();

    if reply.ends_with("OK") {
        return Verdict::Clean;
    }

    if let Some(body) = reply.strip_suffix("FOUND") {
        let name = body
            .trim_end()
            .rsplit(' ')
            .next()
            .unwrap_or("Unknown")
            .trim_start_matches("stream:")
            .trim();
        let name = if name.is_empty() { "Unknown" } else { name };
        return Verdict::Infected(name.to_string());
    }

    warn!("Unexpected clamd reply: {}", reply);
    Verdict::Unavailable
}
