//! Recovery listener
//!
//! Serves one `XaResource` over TCP so a coordinator in another process
//! can drive it, typically a `SubordinateResource`. Newline-delimited JSON:
//! one `ListenerRequest` per line in, one `ListenerResponse` per line out.
//! Resource calls run on the blocking pool.
//!
//! A request line longer than `MAX_REQUEST_BYTES` is answered with
//! `XAER_PROTO` and the connection is closed. So is a connection that sends
//! nothing for the idle timeout.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::observability::{log_event_with_fields, Event, Logger};
use crate::xa::{Vote, XaErrorCode, XaResource, Xid};

use super::errors::{RecoveryError, RecoveryResult};

/// Longest accepted request line, newline excluded
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Request from a remote coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ListenerRequest {
    Start { xid: Xid },
    Prepare { xid: Xid },
    Commit { xid: Xid, one_phase: bool },
    Rollback { xid: Xid },
    Forget { xid: Xid },
    Recover,
    GetTimeout,
    SetTimeout { seconds: u64 },
}

/// Response to a remote coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ListenerResponse {
    Ok,
    Vote { read_only: bool },
    Xids { xids: Vec<Xid> },
    Timeout { seconds: u64 },
    Applied { applied: bool },
    Error { code: XaErrorCode, message: String },
}

impl ListenerRequest {
    /// Apply the request to a resource
    pub fn apply(self, resource: &dyn XaResource) -> ListenerResponse {
        let result = match self {
            ListenerRequest::Start { xid } => resource.start(&xid).map(|()| ListenerResponse::Ok),
            ListenerRequest::Prepare { xid } => resource.prepare(&xid).map(|vote| ListenerResponse::Vote {
                read_only: vote == Vote::ReadOnly,
            }),
            ListenerRequest::Commit { xid, one_phase } => {
                resource.commit(&xid, one_phase).map(|()| ListenerResponse::Ok)
            }
            ListenerRequest::Rollback { xid } => resource.rollback(&xid).map(|()| ListenerResponse::Ok),
            ListenerRequest::Forget { xid } => resource.forget(&xid).map(|()| ListenerResponse::Ok),
            ListenerRequest::Recover => resource.recover().map(|xids| ListenerResponse::Xids { xids }),
            ListenerRequest::GetTimeout => resource
                .transaction_timeout()
                .map(|seconds| ListenerResponse::Timeout { seconds }),
            ListenerRequest::SetTimeout { seconds } => resource
                .set_transaction_timeout(seconds)
                .map(|applied| ListenerResponse::Applied { applied }),
        };
        result.unwrap_or_else(|e| ListenerResponse::Error {
            code: e.code,
            message: e.message,
        })
    }
}

pub struct RecoveryListener {
    listener: TcpListener,
    resource: Arc<dyn XaResource>,
    shutdown_tx: broadcast::Sender<()>,
    stopping: AtomicBool,
    idle_timeout: Duration,
}

impl RecoveryListener {
    /// Bind the listener. Port 0 picks a free port; see `local_addr`.
    pub async fn bind(address: &str, resource: Arc<dyn XaResource>) -> RecoveryResult<Self> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| RecoveryError::listener(&format!("cannot bind {}", address), e))?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            listener,
            resource,
            shutdown_tx,
            stopping: AtomicBool::new(false),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        })
    }

    /// How long a connection may wait for its next request
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn local_addr(&self) -> RecoveryResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| RecoveryError::listener("cannot read local address", e))
    }

    /// Accept connections until `shutdown`
    pub async fn run(&self) -> RecoveryResult<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let address = self.local_addr()?.to_string();
        log_event_with_fields(
            Event::ListenerStarted,
            &[("address", &address), ("resource", self.resource.name())],
        );

        while !self.stopping.load(Ordering::SeqCst) {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let resource = Arc::clone(&self.resource);
                            let idle_timeout = self.idle_timeout;
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, resource, idle_timeout).await {
                                    Logger::warn(
                                        "RECOVERY_LISTENER_CONNECTION_FAILED",
                                        &[("peer", &peer.to_string()), ("error", &e.to_string())],
                                    );
                                }
                            });
                        }
                        Err(e) => Logger::error(
                            "RECOVERY_LISTENER_ACCEPT_FAILED",
                            &[("error", &e.to_string())],
                        ),
                    }
                }

                _ = shutdown_rx.recv() => break,
            }
        }

        log_event_with_fields(Event::ListenerStopped, &[("address", &address)]);
        Ok(())
    }

    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }
}

enum Line {
    Request(Vec<u8>),
    TooLong,
    Closed,
}

/// Read one line of at most `MAX_REQUEST_BYTES`
async fn read_line<R>(reader: &mut R) -> io::Result<Line>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let limit = MAX_REQUEST_BYTES as u64 + 1;
    let read = reader.take(limit).read_until(b'\n', &mut buf).await?;
    if read == 0 {
        return Ok(Line::Closed);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > MAX_REQUEST_BYTES {
        return Ok(Line::TooLong);
    }
    Ok(Line::Request(buf))
}

async fn write_response<W>(writer: &mut W, response: &ListenerResponse) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut bytes =
        serde_json::to_vec(response).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await
}

async fn handle_connection(
    stream: TcpStream,
    resource: Arc<dyn XaResource>,
    idle_timeout: Duration,
) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let line = match tokio::time::timeout(idle_timeout, read_line(&mut reader)).await {
            Ok(line) => line?,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no request within {:?}", idle_timeout),
                ))
            }
        };

        let line = match line {
            Line::Request(line) => line,
            Line::Closed => return Ok(()),
            Line::TooLong => {
                let response = ListenerResponse::Error {
                    code: XaErrorCode::Proto,
                    message: format!("request exceeds {} bytes", MAX_REQUEST_BYTES),
                };
                write_response(&mut writer, &response).await?;
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("request exceeds {} bytes", MAX_REQUEST_BYTES),
                ));
            }
        };
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let response = match serde_json::from_slice::<ListenerRequest>(&line) {
            Ok(request) => {
                let resource = Arc::clone(&resource);
                tokio::task::spawn_blocking(move || request.apply(resource.as_ref()))
                    .await
                    .unwrap_or_else(|e| ListenerResponse::Error {
                        code: XaErrorCode::RmFail,
                        message: format!("resource call aborted: {}", e),
                    })
            }
            Err(e) => ListenerResponse::Error {
                code: XaErrorCode::Proto,
                message: format!("malformed request: {}", e),
            },
        };
        write_response(&mut writer, &response).await?;
    }
}
