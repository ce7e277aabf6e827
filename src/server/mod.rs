//! The server: socket acceptance and the two execution modes.

mod tcp;

use std::cell::RefCell;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, trace};

use crate::error::Error;
use crate::io::Tcp;
use crate::proto::h1::conn::{run_blocking, Conn, ReactorConn};
use crate::reactor::{EventSink, Events, Reactor};
use crate::service::Service;

/// How accepted connections are driven.
///
/// Both modes run the identical per-connection state machine; they differ
/// only in where the waiting happens.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mode {
    /// One accept thread plus one detached thread per connection, all I/O
    /// blocking. Connections share nothing mutable.
    Threaded,
    /// One thread, one reactor; every connection is nonblocking and driven
    /// by readiness callbacks.
    Reactor,
}

/// A configured listener, ready to serve.
///
/// ```no_run
/// use ember::{Mode, Router, Server, StatusCode};
///
/// let mut router = Router::new();
/// router.get("/", |_req, res| res.send_text(StatusCode::OK, "hello"));
///
/// let server = Server::bind("127.0.0.1:8080".parse().unwrap())
///     .unwrap()
///     .mode(Mode::Threaded);
/// server.serve(router).unwrap();
/// ```
pub struct Server {
    listener: TcpListener,
    mode: Mode,
}

impl Server {
    /// Binds the listening socket (IPv4, `SO_REUSEADDR`, backlog 128).
    pub fn bind(addr: SocketAddr) -> crate::Result<Server> {
        let listener = tcp::bind(addr)?;
        debug!(%addr, "listener bound");
        Ok(Server {
            listener,
            mode: Mode::Threaded,
        })
    }

    /// Selects the execution mode. Must be chosen before [`serve`](Server::serve).
    pub fn mode(mut self, mode: Mode) -> Server {
        self.mode = mode;
        self
    }

    /// The bound address, useful with port 0.
    pub fn local_addr(&self) -> crate::Result<SocketAddr> {
        self.listener.local_addr().map_err(Error::new_listen)
    }

    /// Accepts and serves forever on the calling thread.
    ///
    /// Per-connection failures never unwind this call; only listener or
    /// reactor failures do.
    pub fn serve<S>(self, service: S) -> crate::Result<()>
    where
        S: Service + 'static,
    {
        let service: Arc<dyn Service> = Arc::new(service);
        match self.mode {
            Mode::Threaded => serve_threaded(self.listener, service),
            Mode::Reactor => serve_reactor(self.listener, service),
        }
    }
}

fn serve_threaded(listener: TcpListener, service: Arc<dyn Service>) -> crate::Result<()> {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                trace!(%peer, "accepted");
                let service = service.clone();
                let spawned = thread::Builder::new()
                    .name("ember-conn".to_string())
                    .spawn(move || {
                        let conn = Conn::new(Tcp::new(stream), service, Some(peer.ip()));
                        run_blocking(conn);
                    });
                // the handle is dropped: connection threads are detached
                if let Err(e) = spawned {
                    error!(error = %e, "spawning connection thread failed");
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(error = %e, "accept failed");
                continue;
            }
        }
    }
}

fn serve_reactor(listener: TcpListener, service: Arc<dyn Service>) -> crate::Result<()> {
    listener.set_nonblocking(true).map_err(Error::new_listen)?;
    let fd = listener.as_raw_fd();
    let mut reactor = Reactor::new()?;
    let acceptor = Rc::new(RefCell::new(Acceptor { listener, service }));
    reactor.add(fd, Events::READ, acceptor)?;
    reactor.run()
}

/// The listening socket's readiness callback: accepts until the kernel has
/// nothing more, registering each connection for read.
struct Acceptor {
    listener: TcpListener,
    service: Arc<dyn Service>,
}

impl EventSink for Acceptor {
    fn on_event(&mut self, reactor: &mut Reactor, _fd: RawFd, _events: Events) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    trace!(%peer, "accepted");
                    if let Err(e) =
                        ReactorConn::register(reactor, stream, self.service.clone(), Some(peer.ip()))
                    {
                        error!(error = %e, "registering connection failed");
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    return;
                }
            }
        }
    }
}
