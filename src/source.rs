//! Sources of transport stream bytes.
//!
//! | URL                      | Source                                                      |
//! |--------------------------|-------------------------------------------------------------|
//! | `http://…`, `https://…`  | chunked HTTP fetch (requires the `http` feature)            |
//! | `udp://host:port`        | RTP datagrams received on the given local address, with FEC |
//! | `file://path`            | a local file                                                |
//!
//! Any other `AsyncRead` can be used via [`Source::from_reader()`](enum.Source.html#method.from_reader).

use crate::config::TransportConfig;
use crate::fec::FecIngestor;
use crate::pipeline::send_or_cancel;
use bytes::{Bytes, BytesMut};
use log::{debug, info};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP request failed with status {0}")]
    HttpStatus(u16),
    #[error("unsupported URL: {0}")]
    UnsupportedScheme(String),
    #[cfg(feature = "http")]
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
}

/// What a source produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Data(Bytes),
    /// Data is known to have been lost at this point
    Gap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceUrl<'a> {
    Http(&'a str),
    Udp(&'a str),
    File(&'a str),
}

impl<'a> SourceUrl<'a> {
    pub fn parse(url: &'a str) -> Result<SourceUrl<'a>, LoadError> {
        let unsupported = || LoadError::UnsupportedScheme(url.to_string());
        let (scheme, rest) = url.split_once("://").ok_or_else(unsupported)?;
        if rest.is_empty() {
            return Err(unsupported());
        }
        match scheme.to_ascii_lowercase().as_str() {
            "http" | "https" => Ok(SourceUrl::Http(url)),
            "udp" => Ok(SourceUrl::Udp(rest)),
            "file" => Ok(SourceUrl::File(rest)),
            _ => Err(unsupported()),
        }
    }
}

pub enum Source {
    #[cfg(feature = "http")]
    Http(reqwest::Response),
    Udp {
        socket: UdpSocket,
        fec: FecIngestor,
        max_datagram_size: usize,
    },
    Reader {
        reader: Box<dyn AsyncRead + Send + Unpin>,
        chunk_size: usize,
    },
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "http")]
            Source::Http(response) => f.debug_tuple("Http").field(&response.url().as_str()).finish(),
            Source::Udp {
                socket,
                max_datagram_size,
                ..
            } => f
                .debug_struct("Udp")
                .field("local_addr", &socket.local_addr().ok())
                .field("max_datagram_size", max_datagram_size)
                .finish(),
            Source::Reader { chunk_size, .. } => f
                .debug_struct("Reader")
                .field("chunk_size", chunk_size)
                .finish(),
        }
    }
}

impl Source {
    /// Connects to, binds or opens the given URL.  A failure here is a failure to load.
    pub async fn open(url: &str, transport: &TransportConfig) -> Result<Source, LoadError> {
        match SourceUrl::parse(url)? {
            #[cfg(feature = "http")]
            SourceUrl::Http(url) => {
                let response = reqwest::get(url).await?;
                if !response.status().is_success() {
                    return Err(LoadError::HttpStatus(response.status().as_u16()));
                }
                Ok(Source::Http(response))
            }
            #[cfg(not(feature = "http"))]
            SourceUrl::Http(_) => Err(LoadError::UnsupportedScheme(url.to_string())),
            SourceUrl::Udp(addr) => {
                let socket = UdpSocket::bind(addr).await?;
                Ok(Source::udp(socket, transport))
            }
            SourceUrl::File(path) => {
                let file = tokio::fs::File::open(path).await?;
                Ok(Source::from_reader(Box::new(file), transport.read_chunk_size))
            }
        }
    }

    /// Receive RTP datagrams on an already bound socket.
    pub fn udp(socket: UdpSocket, transport: &TransportConfig) -> Source {
        Source::Udp {
            socket,
            fec: FecIngestor::new(transport.fec_window),
            max_datagram_size: transport.max_datagram_size,
        }
    }

    pub fn from_reader(reader: Box<dyn AsyncRead + Send + Unpin>, chunk_size: usize) -> Source {
        Source::Reader {
            reader,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Sends the source's data to `tx` until the end of input, an error, `cancel` being
    /// triggered, or the receiver going away.
    pub async fn run(
        self,
        tx: mpsc::Sender<Input>,
        cancel: CancellationToken,
    ) -> Result<(), LoadError> {
        match self {
            #[cfg(feature = "http")]
            Source::Http(response) => run_http(response, &tx, &cancel).await,
            Source::Udp {
                socket,
                fec,
                max_datagram_size,
            } => run_udp(socket, fec, max_datagram_size, &tx, &cancel).await,
            Source::Reader { reader, chunk_size } => {
                run_reader(reader, chunk_size, &tx, &cancel).await
            }
        }
    }
}

#[cfg(feature = "http")]
async fn run_http(
    response: reqwest::Response,
    tx: &mpsc::Sender<Input>,
    cancel: &CancellationToken,
) -> Result<(), LoadError> {
    use futures::StreamExt;

    let mut body = Box::pin(response.bytes_stream());
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            chunk = body.next() => chunk,
        };
        match chunk {
            Some(Ok(data)) => {
                if !send_or_cancel(tx, Input::Data(data), cancel).await {
                    return Ok(());
                }
            }
            Some(Err(e)) => return Err(e.into()),
            None => {
                info!("end of HTTP response body");
                return Ok(());
            }
        }
    }
}

async fn run_udp(
    socket: UdpSocket,
    mut fec: FecIngestor,
    max_datagram_size: usize,
    tx: &mpsc::Sender<Input>,
    cancel: &CancellationToken,
) -> Result<(), LoadError> {
    let mut buf = vec![0u8; max_datagram_size.max(1)];
    loop {
        let len = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                fec.abort();
                return Ok(());
            }
            r = socket.recv(&mut buf) => r?,
        };
        if len == buf.len() {
            debug!("datagram filled the {} byte receive buffer, may be truncated", len);
        }
        for slot in fec.push_datagram(Bytes::copy_from_slice(&buf[..len])) {
            let input = match slot {
                Some(data) => Input::Data(data),
                None => Input::Gap,
            };
            if !send_or_cancel(tx, input, cancel).await {
                return Ok(());
            }
        }
    }
}

async fn run_reader(
    mut reader: Box<dyn AsyncRead + Send + Unpin>,
    chunk_size: usize,
    tx: &mpsc::Sender<Input>,
    cancel: &CancellationToken,
) -> Result<(), LoadError> {
    loop {
        let mut buf = BytesMut::with_capacity(chunk_size);
        let len = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            r = reader.read_buf(&mut buf) => r?,
        };
        if len == 0 {
            info!("end of input");
            return Ok(());
        }
        if !send_or_cancel(tx, Input::Data(buf.freeze()), cancel).await {
            return Ok(());
        }
    }
}
