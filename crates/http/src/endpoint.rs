//! Transport endpoints a server can run on.
//!
//! TCP and unix sockets are bound eagerly with `socket2` so reuse flags and
//! the backlog are applied before the listener reaches tokio. A pre-bound
//! descriptor is adopted as-is. The hammer endpoint has no listener at all;
//! its traffic is generated in memory.

use std::io;
use std::net::SocketAddr;
#[cfg(unix)]
use std::os::fd::{FromRawFd, RawFd};
use std::path::PathBuf;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::AsyncRead;

use crate::protocol::EngineError;
use crate::response::BoxWriter;

/// Where a server takes its traffic from.
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// TCP on all interfaces; port 0 asks the OS for a free port
    Tcp { port: u16 },
    /// Unix domain socket; a stale file at the path is removed first
    #[cfg(unix)]
    Unix { path: PathBuf },
    /// An already-bound listening descriptor inherited from the embedder
    #[cfg(unix)]
    Fd { fd: RawFd },
    /// Synthetic load: replay `urls` through normal dispatch `repeat` times
    Hammer { urls: Vec<String>, repeat: u32 },
}

impl Endpoint {
    /// Binds the endpoint, returning `None` for the hammer (no socket).
    pub(crate) fn bind(&self, backlog: i32) -> Result<Option<Listener>, EngineError> {
        match self {
            Endpoint::Tcp { port } => {
                let listener = bind_tcp(*port, backlog).map_err(EngineError::bind)?;
                Ok(Some(Listener::Tcp(listener)))
            }
            #[cfg(unix)]
            Endpoint::Unix { path } => {
                let listener = bind_unix(path, backlog).map_err(EngineError::bind)?;
                Ok(Some(Listener::Unix(listener)))
            }
            #[cfg(unix)]
            Endpoint::Fd { fd } => {
                // SAFETY: the embedder hands over ownership of a valid
                // listening descriptor; nothing else may close it afterwards.
                let listener = unsafe { std::net::TcpListener::from_raw_fd(*fd) };
                listener.set_nonblocking(true).map_err(EngineError::bind)?;
                Ok(Some(Listener::Tcp(listener)))
            }
            Endpoint::Hammer { .. } => Ok(None),
        }
    }
}

fn bind_tcp(port: u16, backlog: i32) -> io::Result<std::net::TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(socket.into())
}

#[cfg(unix)]
fn bind_unix(path: &std::path::Path, backlog: i32) -> io::Result<std::os::unix::net::UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    socket.set_nonblocking(true)?;
    socket.bind(&socket2::SockAddr::unix(path)?)?;
    socket.listen(backlog)?;
    Ok(socket.into())
}

/// A bound, nonblocking listener still in std form so it can be cloned once
/// per worker before entering a runtime.
#[derive(Debug)]
pub(crate) enum Listener {
    Tcp(std::net::TcpListener),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixListener),
}

impl Listener {
    pub(crate) fn try_clone(&self) -> io::Result<Self> {
        match self {
            Listener::Tcp(l) => Ok(Listener::Tcp(l.try_clone()?)),
            #[cfg(unix)]
            Listener::Unix(l) => Ok(Listener::Unix(l.try_clone()?)),
        }
    }

    pub(crate) fn local_addr(&self) -> io::Result<Option<SocketAddr>> {
        match self {
            Listener::Tcp(l) => l.local_addr().map(Some),
            #[cfg(unix)]
            Listener::Unix(_) => Ok(None),
        }
    }

    /// Registers the listener with the current runtime.
    pub(crate) fn into_async(self) -> io::Result<AsyncListener> {
        match self {
            Listener::Tcp(l) => Ok(AsyncListener::Tcp(tokio::net::TcpListener::from_std(l)?)),
            #[cfg(unix)]
            Listener::Unix(l) => Ok(AsyncListener::Unix(tokio::net::UnixListener::from_std(l)?)),
        }
    }
}

#[derive(Debug)]
pub(crate) enum AsyncListener {
    Tcp(tokio::net::TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

impl AsyncListener {
    /// Accepts one connection and splits it into boxed transport halves.
    pub(crate) async fn accept(&self) -> io::Result<(Box<dyn AsyncRead + Unpin>, BoxWriter)> {
        match self {
            AsyncListener::Tcp(l) => {
                let (stream, _) = l.accept().await?;
                stream.set_nodelay(true)?;
                let (r, w) = stream.into_split();
                Ok((Box::new(r), Box::new(w)))
            }
            #[cfg(unix)]
            AsyncListener::Unix(l) => {
                let (stream, _) = l.accept().await?;
                let (r, w) = stream.into_split();
                Ok((Box::new(r), Box::new(w)))
            }
        }
    }
}
