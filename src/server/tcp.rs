//! Listening socket setup.

use std::net::{SocketAddr, TcpListener};

use socket2::{Domain, Socket, Type};

use crate::error::Error;
use crate::limits::ACCEPT_BACKLOG;

/// Binds an IPv4 TCP listener with `SO_REUSEADDR` and the contract
/// backlog.
pub(crate) fn bind(addr: SocketAddr) -> crate::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None).map_err(Error::new_listen)?;
    socket.set_reuse_address(true).map_err(Error::new_listen)?;
    socket.bind(&addr.into()).map_err(Error::new_listen)?;
    socket.listen(ACCEPT_BACKLOG).map_err(Error::new_listen)?;
    Ok(socket.into())
}
