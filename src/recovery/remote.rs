//! Coordinator-side client of a remote `RecoveryListener`
//!
//! One short-lived connection per call, bounded by connect, read and write
//! timeouts. An unreachable peer reports `XAER_RMFAIL` so the commit stays
//! pending and recovery retries it.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::xa::{Vote, XaError, XaErrorCode, XaResource, XaResult, Xid};

use super::listener::{ListenerRequest, ListenerResponse};

#[derive(Debug, Clone)]
pub struct RemoteResource {
    name: String,
    address: String,
    timeout: Duration,
}

impl RemoteResource {
    pub fn new(name: &str, address: &str, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn unreachable(&self, err: impl std::fmt::Display) -> XaError {
        XaError::new(
            XaErrorCode::RmFail,
            format!("{} at {} unreachable: {}", self.name, self.address, err),
        )
    }

    fn call(&self, request: &ListenerRequest) -> XaResult<ListenerResponse> {
        let addr = self
            .address
            .to_socket_addrs()
            .map_err(|e| self.unreachable(e))?
            .next()
            .ok_or_else(|| self.unreachable("address did not resolve"))?;

        let stream = TcpStream::connect_timeout(&addr, self.timeout).map_err(|e| self.unreachable(e))?;
        stream
            .set_read_timeout(Some(self.timeout))
            .and_then(|()| stream.set_write_timeout(Some(self.timeout)))
            .map_err(|e| self.unreachable(e))?;

        let mut line = serde_json::to_string(request)
            .map_err(|e| XaError::new(XaErrorCode::RmErr, e.to_string()))?;
        line.push('\n');
        (&stream)
            .write_all(line.as_bytes())
            .map_err(|e| self.unreachable(e))?;

        let mut reply = String::new();
        let read = BufReader::new(&stream)
            .read_line(&mut reply)
            .map_err(|e| self.unreachable(e))?;
        if read == 0 {
            return Err(self.unreachable("connection closed"));
        }

        match serde_json::from_str::<ListenerResponse>(&reply) {
            Ok(ListenerResponse::Error { code, message }) => Err(XaError::new(code, message)),
            Ok(response) => Ok(response),
            Err(e) => Err(XaError::new(
                XaErrorCode::RmErr,
                format!("malformed response from {}: {}", self.address, e),
            )),
        }
    }

    fn expect_ok(&self, request: ListenerRequest) -> XaResult<()> {
        match self.call(&request)? {
            ListenerResponse::Ok => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &ListenerResponse) -> XaError {
    XaError::new(XaErrorCode::RmErr, format!("unexpected response {:?}", response))
}

impl XaResource for RemoteResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self, xid: &Xid) -> XaResult<()> {
        self.expect_ok(ListenerRequest::Start { xid: xid.clone() })
    }

    fn prepare(&self, xid: &Xid) -> XaResult<Vote> {
        match self.call(&ListenerRequest::Prepare { xid: xid.clone() })? {
            ListenerResponse::Vote { read_only: true } => Ok(Vote::ReadOnly),
            ListenerResponse::Vote { read_only: false } => Ok(Vote::Commit),
            other => Err(unexpected(&other)),
        }
    }

    fn commit(&self, xid: &Xid, one_phase: bool) -> XaResult<()> {
        self.expect_ok(ListenerRequest::Commit {
            xid: xid.clone(),
            one_phase,
        })
    }

    fn rollback(&self, xid: &Xid) -> XaResult<()> {
        self.expect_ok(ListenerRequest::Rollback { xid: xid.clone() })
    }

    fn forget(&self, xid: &Xid) -> XaResult<()> {
        self.expect_ok(ListenerRequest::Forget { xid: xid.clone() })
    }

    fn recover(&self) -> XaResult<Vec<Xid>> {
        match self.call(&ListenerRequest::Recover)? {
            ListenerResponse::Xids { xids } => Ok(xids),
            other => Err(unexpected(&other)),
        }
    }

    fn transaction_timeout(&self) -> XaResult<u64> {
        match self.call(&ListenerRequest::GetTimeout)? {
            ListenerResponse::Timeout { seconds } => Ok(seconds),
            other => Err(unexpected(&other)),
        }
    }

    fn set_transaction_timeout(&self, seconds: u64) -> XaResult<bool> {
        match self.call(&ListenerRequest::SetTimeout { seconds })? {
            ListenerResponse::Applied { applied } => Ok(applied),
            other => Err(unexpected(&other)),
        }
    }
}
