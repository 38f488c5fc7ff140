use crate::error::{Result, SpiceError};
use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf as TcpReadHalf, OwnedWriteHalf as TcpWriteHalf};
use tokio::net::unix::{OwnedReadHalf as UnixReadHalf, OwnedWriteHalf as UnixWriteHalf};
use tokio::net::{TcpStream, UnixStream};
use tracing::info;

/// Abstracts the byte stream a channel is linked over: TCP or a UNIX domain socket.
///
/// Used as a single combined handle for the link handshake, which is a
/// short, strictly sequential exchange with no concurrent access. After the
/// handshake the socket is split (`into_split`) so the channel's background
/// read task and foreign-thread writers no longer share one mutable handle.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    async fn flush(&mut self) -> io::Result<()>;
}

/// Where a channel should dial to establish its link.
#[derive(Debug, Clone)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix { path: String },
}

pub enum Socket {
    Tcp(TcpStream),
    Unix(UnixStream),
}

#[async_trait]
impl Transport for Socket {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Socket::Tcp(s) => s.read(buf).await,
            Socket::Unix(s) => s.read(buf).await,
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Socket::Tcp(s) => s.write_all(buf).await,
            Socket::Unix(s) => s.write_all(buf).await,
        }
    }

    async fn flush(&mut self) -> io::Result<()> {
        match self {
            Socket::Tcp(s) => s.flush().await,
            Socket::Unix(s) => s.flush().await,
        }
    }
}

impl Socket {
    pub fn into_split(self) -> (ReadHalf, WriteHalf) {
        match self {
            Socket::Tcp(s) => {
                let (r, w) = s.into_split();
                (ReadHalf::Tcp(r), WriteHalf::Tcp(w))
            }
            Socket::Unix(s) => {
                let (r, w) = s.into_split();
                (ReadHalf::Unix(r), WriteHalf::Unix(w))
            }
        }
    }
}

pub enum ReadHalf {
    Tcp(TcpReadHalf),
    Unix(UnixReadHalf),
}

impl ReadHalf {
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ReadHalf::Tcp(r) => r.read(buf).await,
            ReadHalf::Unix(r) => r.read(buf).await,
        }
    }
}

#[async_trait]
impl Transport for ReadHalf {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        ReadHalf::read(self, buf).await
    }

    async fn write_all(&mut self, _buf: &[u8]) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "read half cannot write"))
    }

    async fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "read half cannot write"))
    }
}

pub enum WriteHalf {
    Tcp(TcpWriteHalf),
    Unix(UnixWriteHalf),
}

#[async_trait]
impl Transport for WriteHalf {
    async fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "write half cannot read"))
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            WriteHalf::Tcp(w) => w.write_all(buf).await,
            WriteHalf::Unix(w) => w.write_all(buf).await,
        }
    }

    async fn flush(&mut self) -> io::Result<()> {
        match self {
            WriteHalf::Tcp(w) => w.flush().await,
            WriteHalf::Unix(w) => w.flush().await,
        }
    }
}

impl WriteHalf {
    pub async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            WriteHalf::Tcp(w) => w.shutdown().await,
            WriteHalf::Unix(w) => w.shutdown().await,
        }
    }
}

pub async fn create_transport(endpoint: &Endpoint) -> Result<Socket> {
    match endpoint {
        Endpoint::Tcp { host, port } => tcp::connect(host, *port).await,
        Endpoint::Unix { path } => unix::connect(path).await,
    }
}

pub mod tcp {
    use super::*;

    pub async fn connect(host: &str, port: u16) -> Result<Socket> {
        info!("Connecting to SPICE server at {}:{}", host, port);
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| SpiceError::Connection(format!("failed to connect: {e}")))?;
        stream
            .set_nodelay(true)
            .map_err(|e| SpiceError::Connection(format!("failed to set TCP_NODELAY: {e}")))?;
        Ok(Socket::Tcp(stream))
    }
}

pub mod unix {
    use super::*;

    pub async fn connect(path: &str) -> Result<Socket> {
        info!("Connecting to SPICE server at unix:{}", path);
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| SpiceError::Connection(format!("failed to connect to {path}: {e}")))?;
        Ok(Socket::Unix(stream))
    }
}
