//! Cluster node discovery.
//!
//! Asks the cluster configuration endpoint for the current node list with
//! `config get cluster`. The reply carries a config version line and one
//! space-separated list of `hostname|ip|port` entries:
//!
//! ```text
//! CONFIG cluster 0 <len>\r\n
//! 12\n
//! node-1.cache.local|10.0.0.1|11211 node-2.cache.local|10.0.0.2|11211\n
//! \r\n
//! END\r\n
//! ```
//!
//! Discovery runs once at startup; any failure here is fatal.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::cache::protocol::{read_line, ReplyError};
use crate::cache::CacheError;
use crate::resilience::timeouts::{within, Timeouts};

/// Largest `CONFIG cluster` body accepted.
pub const MAX_CLUSTER_CONFIG_BYTES: usize = 1024 * 1024;

/// One node as advertised by the configuration endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddr {
    pub hostname: String,
    pub ip: String,
    pub port: u16,
}

impl NodeAddr {
    /// Address to connect to; the IP is preferred when advertised.
    pub fn connect_addr(&self) -> String {
        let host = if self.ip.is_empty() {
            &self.hostname
        } else {
            &self.ip
        };
        if host.contains(':') {
            format!("[{host}]:{}", self.port)
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

/// Parsed cluster configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub version: u64,
    pub nodes: Vec<NodeAddr>,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("bad reply from configuration endpoint {endpoint}: {source}")]
    Reply {
        endpoint: String,
        #[source]
        source: ReplyError,
    },

    #[error("malformed cluster configuration: {0}")]
    Malformed(String),

    #[error("configuration endpoint returned no nodes")]
    Empty,
}

/// Query `endpoint` ("host:port") for the cluster's nodes.
pub async fn discover(endpoint: &str, timeouts: Timeouts) -> Result<ClusterConfig, DiscoveryError> {
    let stream = within(timeouts.connect, TcpStream::connect(endpoint))
        .await
        .map_err(|e| CacheError::ConnectTimeout {
            node: endpoint.to_string(),
            elapsed: e.0,
        })?
        .map_err(|source| CacheError::Connect {
            node: endpoint.to_string(),
            source,
        })?;
    let mut stream = BufReader::new(stream);

    let reader = &mut stream;
    let body = within(timeouts.io, async move {
        reader.get_mut().write_all(b"config get cluster\r\n").await?;
        read_cluster_reply(reader).await
    })
    .await
    .map_err(|e| CacheError::Timeout {
        node: endpoint.to_string(),
        op: "config get cluster",
        elapsed: e.0,
    })?
    .map_err(|source| DiscoveryError::Reply {
        endpoint: endpoint.to_string(),
        source,
    })?;

    let config = parse_cluster_config(&body)?;
    tracing::info!(
        endpoint = %endpoint,
        version = config.version,
        nodes = config.nodes.len(),
        "Cluster configuration discovered"
    );
    Ok(config)
}

/// Read a `CONFIG cluster` reply and return its body.
pub async fn read_cluster_reply<R>(reader: &mut R) -> Result<String, ReplyError>
where
    R: AsyncBufRead + Unpin,
{
    let header = read_line(reader).await?;
    let len = match header.split_ascii_whitespace().collect::<Vec<_>>().as_slice() {
        ["CONFIG", "cluster", _flags, len] => len
            .parse::<usize>()
            .map_err(|_| ReplyError::Unexpected(header.clone()))?,
        _ => return Err(ReplyError::Unexpected(header.clone())),
    };
    if len > MAX_CLUSTER_CONFIG_BYTES {
        return Err(ReplyError::Unexpected(format!(
            "cluster config of {len} bytes exceeds {MAX_CLUSTER_CONFIG_BYTES}"
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    loop {
        let line = read_line(reader).await?;
        if line == "END" {
            break;
        }
        if !line.is_empty() {
            return Err(ReplyError::Unexpected(line));
        }
    }

    String::from_utf8(body).map_err(|_| ReplyError::Unexpected("non-UTF-8 cluster config".into()))
}

/// Parse the body of a `CONFIG cluster` reply.
pub fn parse_cluster_config(body: &str) -> Result<ClusterConfig, DiscoveryError> {
    let mut lines = body.lines().map(str::trim).filter(|l| !l.is_empty());

    let version_line = lines
        .next()
        .ok_or_else(|| DiscoveryError::Malformed("missing config version".into()))?;
    let version = version_line
        .parse::<u64>()
        .map_err(|_| DiscoveryError::Malformed(format!("bad config version {version_line:?}")))?;

    let nodes = lines
        .next()
        .unwrap_or_default()
        .split_ascii_whitespace()
        .map(parse_node)
        .collect::<Result<Vec<_>, _>>()?;

    if nodes.is_empty() {
        return Err(DiscoveryError::Empty);
    }
    Ok(ClusterConfig { version, nodes })
}

fn parse_node(entry: &str) -> Result<NodeAddr, DiscoveryError> {
    let malformed = || DiscoveryError::Malformed(format!("bad node entry {entry:?}"));
    let mut fields = entry.split('|');
    let (Some(hostname), Some(ip), Some(port), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(malformed());
    };

    let port = port.parse::<u16>().map_err(|_| malformed())?;
    if port == 0 || (hostname.is_empty() && ip.is_empty()) {
        return Err(malformed());
    }

    Ok(NodeAddr {
        hostname: hostname.to_string(),
        ip: ip.to_string(),
        port,
    })
}
