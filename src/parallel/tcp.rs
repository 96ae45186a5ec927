//! Newline delimited JSON over TCP.
//!
//! Each line the client writes is one [`Request`]; the server answers with
//! one [`Response`] line. Connections are long lived and served by a thread
//! each.

use std::{
    io::{self, BufRead, BufReader, Write},
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    error::SyncError,
    parallel::{
        SyncClient, SyncServer,
        protocol::{Request, Response},
    },
    util::lock,
};

const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// Serves a [`SyncServer`] on a TCP socket until dropped.
#[derive(Debug)]
pub struct TcpSyncServer {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    accept_loop: Option<JoinHandle<()>>,
}

impl TcpSyncServer {
    pub fn bind(addr: impl ToSocketAddrs, server: Arc<SyncServer>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));

        let accept_stop = Arc::clone(&stop);
        let accept_loop = thread::Builder::new()
            .name("kispec-sync-accept".into())
            .spawn(move || accept(listener, server, accept_stop))?;
        tracing::debug!(%addr, "sync server listening");
        Ok(Self {
            addr,
            stop,
            accept_loop: Some(accept_loop),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for TcpSyncServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.accept_loop.take() {
            let _ = handle.join();
        }
    }
}

fn accept(listener: TcpListener, server: Arc<SyncServer>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let server = Arc::clone(&server);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    if let Err(err) = serve(stream, &server, &stop) {
                        tracing::debug!(%peer, error = %err, "sync connection closed");
                    }
                });
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(err) => {
                tracing::warn!(error = %err, "sync server accept failed");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn serve(stream: TcpStream, server: &SyncServer, stop: &AtomicBool) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_millis(100)))?;
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    while !stop.load(Ordering::SeqCst) {
        match reader.read_line(&mut line) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(err) => return Err(err),
        }

        let response = match serde_json::from_str::<Request>(line.trim_end()) {
            Ok(request) => server.handle(request),
            Err(err) => Response::Error(format!("malformed request: {err}")),
        };
        line.clear();
        let mut encoded = serde_json::to_string(&response).map_err(io::Error::other)?;
        encoded.push('\n');
        writer.write_all(encoded.as_bytes())?;
    }
    Ok(())
}

#[derive(Debug)]
struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

/// A [`SyncClient`] connected to a [`TcpSyncServer`].
///
/// Calls are serialized over one connection.
#[derive(Debug)]
pub struct TcpClient {
    connection: Mutex<Connection>,
    poll_interval: Duration,
}

impl TcpClient {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, SyncError> {
        let writer = TcpStream::connect(addr)?;
        writer.set_nodelay(true)?;
        let reader = BufReader::new(writer.try_clone()?);
        Ok(Self {
            connection: Mutex::new(Connection { reader, writer }),
            poll_interval: Duration::from_millis(50),
        })
    }

    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            ..self
        }
    }
}

impl SyncClient for TcpClient {
    fn call(&self, request: Request) -> Result<Response, SyncError> {
        let mut encoded = serde_json::to_string(&request)?;
        encoded.push('\n');

        let mut connection = lock(&self.connection);
        connection.writer.write_all(encoded.as_bytes())?;
        let mut line = String::new();
        if connection.reader.read_line(&mut line)? == 0 {
            return Err(SyncError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "sync server closed the connection",
            )));
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
