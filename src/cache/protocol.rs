//! memcached text protocol over TCP.
//!
//! # Responsibilities
//! - Open connections with a connect deadline
//! - Encode `get`, `incr`, `decr`, `add`, `version` and read their replies
//! - Map transport and protocol failures onto [`CacheError`]
//!
//! Reply parsing is written against any `AsyncBufRead` so it can be tested
//! over plain byte slices.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::cache::CacheError;
use crate::resilience::timeouts::{within, Elapsed, Timeouts};

/// Failure while reading a reply, before the node name is attached.
#[derive(Debug, Error)]
pub enum ReplyError {
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The peer closed the stream before sending anything.
    #[error("connection closed")]
    Closed,

    /// Writing the command failed, so the node never saw a complete command.
    #[error("send failed: {0}")]
    Send(io::Error),

    #[error("unexpected reply: {0}")]
    Unexpected(String),

    #[error("{0}")]
    Server(String),
}

/// Reply to `incr` / `decr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterReply {
    Value(u64),
    NotFound,
}

/// Read one CRLF-terminated line, without the terminator.
pub async fn read_line<R>(reader: &mut R) -> Result<String, ReplyError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(ReplyError::Closed);
    }
    if !line.ends_with('\n') {
        return Err(ReplyError::Io(io::ErrorKind::UnexpectedEof.into()));
    }
    let trimmed = line.trim_end_matches(['\r', '\n']).to_string();
    check_error_line(&trimmed)?;
    Ok(trimmed)
}

fn check_error_line(line: &str) -> Result<(), ReplyError> {
    if line == "ERROR" || line.starts_with("CLIENT_ERROR") || line.starts_with("SERVER_ERROR") {
        return Err(ReplyError::Server(line.to_string()));
    }
    Ok(())
}

/// Read the reply to `get <key>`: either `END`, or one `VALUE` block then `END`.
pub async fn read_get_reply<R>(reader: &mut R, key: &str) -> Result<Option<Vec<u8>>, ReplyError>
where
    R: AsyncBufRead + Unpin,
{
    let header = read_line(reader).await?;
    if header == "END" {
        return Ok(None);
    }

    let mut parts = header.split_ascii_whitespace();
    let (tag, name, _flags, len) = (parts.next(), parts.next(), parts.next(), parts.next());
    let len: usize = match (tag, name, len) {
        (Some("VALUE"), Some(name), Some(len)) if name == key => len
            .parse()
            .map_err(|_| ReplyError::Unexpected(header.clone()))?,
        _ => return Err(ReplyError::Unexpected(header.clone())),
    };

    // data block plus its trailing CRLF
    let mut data = vec![0u8; len + 2];
    reader.read_exact(&mut data).await?;
    if !data.ends_with(b"\r\n") {
        return Err(ReplyError::Unexpected("data block missing terminator".into()));
    }
    data.truncate(len);

    let end = read_line(reader).await?;
    if end != "END" {
        return Err(ReplyError::Unexpected(end));
    }
    Ok(Some(data))
}

/// Read the reply to `incr` / `decr`.
pub async fn read_counter_reply<R>(reader: &mut R) -> Result<CounterReply, ReplyError>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader).await?;
    if line == "NOT_FOUND" {
        return Ok(CounterReply::NotFound);
    }
    line.trim()
        .parse::<u64>()
        .map(CounterReply::Value)
        .map_err(|_| ReplyError::Unexpected(line))
}

/// Read the reply to `add`: true when stored, false when the key already existed.
pub async fn read_store_reply<R>(reader: &mut R) -> Result<bool, ReplyError>
where
    R: AsyncBufRead + Unpin,
{
    match read_line(reader).await?.as_str() {
        "STORED" => Ok(true),
        "NOT_STORED" | "EXISTS" => Ok(false),
        other => Err(ReplyError::Unexpected(other.to_string())),
    }
}

/// Read the reply to `version`.
pub async fn read_version_reply<R>(reader: &mut R) -> Result<String, ReplyError>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader).await?;
    line.strip_prefix("VERSION ")
        .map(str::to_string)
        .ok_or(ReplyError::Unexpected(line))
}

/// An open connection to one memcached node.
#[derive(Debug)]
pub struct Connection {
    node: String,
    stream: BufReader<TcpStream>,
    io_timeout: Duration,
    /// Set once the connection has completed a command and been pooled.
    reused: bool,
}

impl Connection {
    /// Connect to `node` ("host:port") within the connect deadline.
    pub async fn connect(node: &str, timeouts: Timeouts) -> Result<Self, CacheError> {
        let stream = within(timeouts.connect, TcpStream::connect(node))
            .await
            .map_err(|e| CacheError::ConnectTimeout {
                node: node.to_string(),
                elapsed: e.0,
            })?
            .map_err(|source| CacheError::Connect {
                node: node.to_string(),
                source,
            })?;
        let _ = stream.set_nodelay(true);

        Ok(Self {
            node: node.to_string(),
            stream: BufReader::new(stream),
            io_timeout: timeouts.io,
            reused: false,
        })
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Mark the connection as coming from the idle pool.
    pub fn mark_reused(&mut self) {
        self.reused = true;
    }

    /// Whether an idle connection can no longer carry a command: the peer
    /// closed it, reset it, or left unsolicited bytes on it.
    pub fn is_closed(&self) -> bool {
        if !self.stream.buffer().is_empty() {
            return true;
        }
        let mut byte = [0u8; 1];
        match self.stream.get_ref().try_read(&mut byte) {
            Ok(_) => true,
            Err(e) => e.kind() != io::ErrorKind::WouldBlock,
        }
    }

    pub async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let command = format!("get {key}\r\n");
        let stream = &mut self.stream;
        let result = within(self.io_timeout, async move {
            stream
                .get_mut()
                .write_all(command.as_bytes())
                .await
                .map_err(ReplyError::Send)?;
            read_get_reply(stream, key).await
        })
        .await;
        self.finish("get", result)
    }

    pub async fn incr(&mut self, key: &str, by: u64) -> Result<CounterReply, CacheError> {
        self.counter_command("incr", key, by).await
    }

    pub async fn decr(&mut self, key: &str, by: u64) -> Result<CounterReply, CacheError> {
        self.counter_command("decr", key, by).await
    }

    async fn counter_command(
        &mut self,
        op: &'static str,
        key: &str,
        by: u64,
    ) -> Result<CounterReply, CacheError> {
        let command = format!("{op} {key} {by}\r\n");
        let stream = &mut self.stream;
        let result = within(self.io_timeout, async move {
            stream
                .get_mut()
                .write_all(command.as_bytes())
                .await
                .map_err(ReplyError::Send)?;
            read_counter_reply(stream).await
        })
        .await;
        self.finish(op, result)
    }

    /// Store `value` only if `key` does not exist yet. No expiry.
    pub async fn add(&mut self, key: &str, value: &[u8]) -> Result<bool, CacheError> {
        let mut command = format!("add {key} 0 0 {}\r\n", value.len()).into_bytes();
        command.extend_from_slice(value);
        command.extend_from_slice(b"\r\n");
        let stream = &mut self.stream;
        let result = within(self.io_timeout, async move {
            stream.get_mut().write_all(&command).await.map_err(ReplyError::Send)?;
            read_store_reply(stream).await
        })
        .await;
        self.finish("add", result)
    }

    pub async fn version(&mut self) -> Result<String, CacheError> {
        let stream = &mut self.stream;
        let result = within(self.io_timeout, async move {
            stream
                .get_mut()
                .write_all(b"version\r\n")
                .await
                .map_err(ReplyError::Send)?;
            read_version_reply(stream).await
        })
        .await;
        self.finish("version", result)
    }

    /// Attach the node name and classify a finished exchange.
    fn finish<T>(
        &self,
        op: &'static str,
        result: Result<Result<T, ReplyError>, Elapsed>,
    ) -> Result<T, CacheError> {
        let node = self.node.clone();
        match result {
            Err(elapsed) => Err(CacheError::Timeout {
                node,
                op,
                elapsed: elapsed.0,
            }),
            Ok(Ok(value)) => Ok(value),
            Ok(Err(ReplyError::Send(source))) if self.reused && is_reset(&source) => {
                Err(CacheError::StaleConnection { node })
            }
            Ok(Err(ReplyError::Send(source))) => Err(CacheError::Io { node, source }),
            // once the command is out, a dropped connection may hide an applied write
            Ok(Err(ReplyError::Closed)) => Err(CacheError::Io {
                node,
                source: io::ErrorKind::UnexpectedEof.into(),
            }),
            Ok(Err(ReplyError::Io(source))) => Err(CacheError::Io { node, source }),
            Ok(Err(ReplyError::Unexpected(reply))) => Err(CacheError::Protocol { node, reply }),
            Ok(Err(ReplyError::Server(message))) => Err(CacheError::Server { node, message }),
        }
    }
}

fn is_reset(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}
