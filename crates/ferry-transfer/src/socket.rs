//! UDP socket setup shared by both roles.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::thread;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

/// OS send/receive buffer size (4 MB).
pub const UDP_BUFFER: usize = 4 * 1024 * 1024;

/// Read timeout on transfer sockets, so blocked loops can notice
/// cancellation.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Create a UDP socket bound to `addr` with large buffers and a
/// [`POLL_INTERVAL`] read timeout.
pub fn bind_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(false)?;
    socket.set_recv_buffer_size(UDP_BUFFER)?;
    socket.set_send_buffer_size(UDP_BUFFER)?;
    socket.set_read_timeout(Some(POLL_INTERVAL))?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// True for the errors a timed-out blocking read produces.
/// Windows returns TimedOut, Unix returns WouldBlock.
pub fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Send one datagram, backing off briefly while the OS send buffer is full.
pub fn send_datagram(socket: &UdpSocket, datagram: &[u8], target: SocketAddr) -> io::Result<()> {
    let mut retries = 0;
    loop {
        match socket.send_to(datagram, target) {
            Ok(_) => return Ok(()),
            Err(ref e)
                if retries < 50
                    && (e.kind() == io::ErrorKind::WouldBlock
                        || e.raw_os_error() == Some(10055) // WSAENOBUFS
                        || e.raw_os_error() == Some(105)) => // ENOBUFS (Linux)
            {
                retries += 1;
                thread::sleep(Duration::from_millis(1));
            }
            Err(e) => return Err(e),
        }
    }
}
