use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::codec::{self, CommandArg, Value};

/// Transport status codes surfaced by a failed dispatch. Status `0` means the
/// transport itself succeeded but the peer reported an error in text form.
pub const STATUS_CONNECTION: u32 = 1;
pub const STATUS_TIMEOUT: u32 = 2;
pub const STATUS_AUTH: u32 = 3;
pub const STATUS_NETWORK: u32 = 4;

/// A transport-level dispatch failure, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchFailure {
    pub status: u32,
    pub message: String,
}

impl DispatchFailure {
    pub fn new(status: u32, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// The dispatch seam: submit one encoded command, receive the raw bytes of
/// exactly one reply. Implementations own framing; callers own parsing and
/// classification.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, payload: &[u8]) -> Result<Vec<u8>, DispatchFailure>;
}

/// TCP dispatcher with a lazily-established connection.
///
/// One command is on the wire at a time (the connection slot is mutex-held for
/// the full exchange), which is what lets replies be framed by reading until
/// one complete RESP value parses. Any failure drops the connection so the
/// next dispatch reconnects from scratch.
pub struct TcpDispatch {
    address: String,
    username: Option<String>,
    password: Option<String>,
    database: u32,
    timeout: Duration,
    conn: Mutex<Option<TcpStream>>,
}

/// Connection parameters registered at init time.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub address: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_ms: u64,
    pub database: u32,
}

impl TcpDispatch {
    pub fn new(params: &ConnectionParams) -> Self {
        Self {
            address: params.address.clone(),
            username: params.username.clone(),
            password: params.password.clone(),
            database: params.database,
            timeout: Duration::from_millis(params.timeout_ms),
            conn: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<TcpStream, DispatchFailure> {
        let mut stream = TcpStream::connect(&self.address).await.map_err(|e| {
            DispatchFailure::new(
                STATUS_CONNECTION,
                format!("failed to connect to {}: {e}", self.address),
            )
        })?;

        if let Some(password) = &self.password {
            let mut args = vec![CommandArg::from("auth")];
            if let Some(username) = &self.username {
                if !username.is_empty() {
                    args.push(CommandArg::from(username.as_str()));
                }
            }
            args.push(CommandArg::from(password.as_str()));
            let reply = exchange_on(&mut stream, &codec::encode_command(&args)).await?;
            if let Ok(Value::Error(text)) = codec::parse_reply(&reply) {
                return Err(DispatchFailure::new(
                    STATUS_AUTH,
                    format!("AUTH rejected: {text}"),
                ));
            }
        }

        if self.database != 0 {
            let args = [
                CommandArg::from("select"),
                CommandArg::Int(i64::from(self.database)),
            ];
            let reply = exchange_on(&mut stream, &codec::encode_command(&args)).await?;
            if let Ok(Value::Error(text)) = codec::parse_reply(&reply) {
                return Err(DispatchFailure::new(0, format!("SELECT rejected: {text}")));
            }
        }

        Ok(stream)
    }

    async fn exchange(
        &self,
        slot: &mut Option<TcpStream>,
        payload: &[u8],
    ) -> Result<Vec<u8>, DispatchFailure> {
        if slot.is_none() {
            *slot = Some(self.connect().await?);
        }
        let Some(stream) = slot.as_mut() else {
            return Err(DispatchFailure::new(STATUS_CONNECTION, "no connection"));
        };
        exchange_on(stream, payload).await
    }
}

#[async_trait]
impl Dispatch for TcpDispatch {
    async fn dispatch(&self, payload: &[u8]) -> Result<Vec<u8>, DispatchFailure> {
        let mut slot = self.conn.lock().await;
        match tokio::time::timeout(self.timeout, self.exchange(&mut *slot, payload)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(failure)) => {
                *slot = None;
                Err(failure)
            }
            Err(_elapsed) => {
                // The connection is mid-exchange in an unknown state.
                *slot = None;
                Err(DispatchFailure::new(
                    STATUS_TIMEOUT,
                    format!("operation timed out after {:?}", self.timeout),
                ))
            }
        }
    }
}

/// Write the payload and read bytes until one complete RESP frame parses.
async fn exchange_on(stream: &mut TcpStream, payload: &[u8]) -> Result<Vec<u8>, DispatchFailure> {
    stream.write_all(payload).await.map_err(map_io_failure)?;

    let mut buf = Vec::with_capacity(256);
    let mut chunk = [0u8; 4096];
    loop {
        match codec::parse_value(&buf, 0) {
            Ok(Some((_, consumed))) => {
                buf.truncate(consumed);
                return Ok(buf);
            }
            Ok(None) => {}
            Err(e) => return Err(DispatchFailure::new(0, format!("protocol error: {e}"))),
        }
        let n = stream.read(&mut chunk).await.map_err(map_io_failure)?;
        if n == 0 {
            return Err(DispatchFailure::new(
                STATUS_CONNECTION,
                "connection closed while awaiting reply",
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn map_io_failure(e: std::io::Error) -> DispatchFailure {
    use std::io::ErrorKind;
    let status = match e.kind() {
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe => STATUS_CONNECTION,
        ErrorKind::TimedOut | ErrorKind::WouldBlock => STATUS_TIMEOUT,
        _ => STATUS_NETWORK,
    };
    DispatchFailure::new(status, e.to_string())
}

/// Process-global view of store traffic: one dispatch increment per call, one
/// success-or-failure increment per resolution, one retry increment per
/// reissued attempt.
#[derive(Debug, Default)]
pub struct StoreMetrics {
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    retry_attempts: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreMetricsSnapshot {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub retry_attempts: u64,
}

impl StoreMetrics {
    pub fn record_dispatch(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successful_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retry_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StoreMetricsSnapshot {
        StoreMetricsSnapshot {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            successful_calls: self.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            retry_attempts: self.retry_attempts.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.total_calls.store(0, Ordering::Relaxed);
        self.successful_calls.store(0, Ordering::Relaxed);
        self.failed_calls.store(0, Ordering::Relaxed);
        self.retry_attempts.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_snapshot_and_reset() {
        let metrics = StoreMetrics::default();
        metrics.record_dispatch();
        metrics.record_dispatch();
        metrics.record_success();
        metrics.record_failure();
        metrics.record_retry();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_calls, 2);
        assert_eq!(snapshot.successful_calls, 1);
        assert_eq!(snapshot.failed_calls, 1);
        assert_eq!(snapshot.retry_attempts, 1);

        metrics.reset();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_calls, 0);
        assert_eq!(snapshot.successful_calls, 0);
        assert_eq!(snapshot.failed_calls, 0);
        assert_eq!(snapshot.retry_attempts, 0);
    }

    #[test]
    fn test_io_failures_map_to_transport_statuses() {
        use std::io::{Error as IoError, ErrorKind};
        assert_eq!(
            map_io_failure(IoError::new(ErrorKind::ConnectionRefused, "refused")).status,
            STATUS_CONNECTION
        );
        assert_eq!(
            map_io_failure(IoError::new(ErrorKind::TimedOut, "slow")).status,
            STATUS_TIMEOUT
        );
        assert_eq!(
            map_io_failure(IoError::new(ErrorKind::InvalidData, "junk")).status,
            STATUS_NETWORK
        );
    }

    #[tokio::test]
    async fn test_dispatch_against_unreachable_address_is_a_connection_failure() {
        // Port 1 is unassigned on loopback; connect() fails fast or times out.
        let dispatch = TcpDispatch::new(&ConnectionParams {
            address: "127.0.0.1:1".to_string(),
            username: None,
            password: None,
            timeout_ms: 250,
            database: 0,
        });
        let failure = dispatch
            .dispatch(b"*1\r\n$4\r\nping\r\n")
            .await
            .expect_err("nothing listens on port 1");
        assert!(
            failure.status == STATUS_CONNECTION || failure.status == STATUS_TIMEOUT,
            "unexpected status: {failure:?}"
        );
    }
}
