//! Paired-UDP session socket with the RTP port discipline.
//!
//! RTP convention reserves even ports for media and the adjacent odd port
//! for RTCP, so [`RtpSocket::bind`] never settles on an odd local port.
//! The remote peer is fixed once with [`RtpSocket::associate`]; sending is
//! only possible after that, receiving as soon as the socket is bound.

use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use socket2::{Domain, SockAddr, Socket, Type};
use tracing::debug;

/// Scattered bind attempts before giving up on finding an even port.
const BIND_ATTEMPTS: usize = 1000;

/// A bound UDP endpoint with an optional fixed remote peer.
pub struct RtpSocket {
    inner: Socket,
    local: SocketAddr,
    remote: Option<SocketAddr>,
}

impl RtpSocket {
    /// Bind a media socket on `local_ip` to an even port.
    ///
    /// The first bind uses an ephemeral port. If the kernel hands out an odd
    /// one, the socket is discarded and a fresh socket probes a
    /// deterministic scatter of candidates with stride `2p` (always even,
    /// skipping the reserved range below 1024) for up to 1000 binds.
    /// Exhaustion returns the last OS error.
    pub fn bind(local_ip: IpAddr) -> io::Result<Self> {
        let domain = if local_ip.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, None)?;
        socket.bind(&SockAddr::from(SocketAddr::new(local_ip, 0)))?;
        let local = bound_addr(&socket)?;
        if local.port() % 2 == 0 {
            return Ok(Self {
                inner: socket,
                local,
                remote: None,
            });
        }

        let odd = local.port();
        drop(socket);

        let socket = Socket::new(domain, Type::DGRAM, None)?;
        let stride = odd.wrapping_mul(2);
        let mut candidate = odd.wrapping_add(1);
        let mut last = io::Error::from(io::ErrorKind::AddrInUse);
        for _ in 0..BIND_ATTEMPTS {
            candidate = candidate.wrapping_add(stride);
            while candidate < 1024 {
                candidate = candidate.wrapping_add(stride);
            }
            let addr = SocketAddr::new(local_ip, candidate);
            match socket.bind(&SockAddr::from(addr)) {
                Ok(()) => {
                    debug!("moved off odd port {} to {}", odd, candidate);
                    return Ok(Self {
                        inner: socket,
                        local: addr,
                        remote: None,
                    });
                }
                Err(err) => last = err,
            }
        }
        Err(last)
    }

    /// The bound local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// The bound local port (always even).
    pub fn local_port(&self) -> u16 {
        self.local.port()
    }

    /// Fix the remote peer for this session.
    ///
    /// The remote address family must match the local one; a mismatch
    /// reports `EAFNOSUPPORT`.
    pub fn associate(&mut self, remote_ip: IpAddr, port: u16) -> io::Result<()> {
        if remote_ip.is_ipv4() != self.local.ip().is_ipv4() {
            return Err(io::Error::from_raw_os_error(libc::EAFNOSUPPORT));
        }
        self.remote = Some(SocketAddr::new(remote_ip, port));
        Ok(())
    }

    /// Whether a remote peer has been fixed.
    pub fn is_associated(&self) -> bool {
        self.remote.is_some()
    }

    /// The associated remote peer, if any.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// Send one datagram to the associated peer.
    ///
    /// Uses `MSG_NOSIGNAL`: a vanished peer surfaces as an error, never a
    /// signal.
    pub fn send(&self, packet: &[u8]) -> io::Result<usize> {
        let remote = self.remote.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotConnected,
                "socket has no associated remote peer",
            )
        })?;
        self.inner
            .send_to_with_flags(packet, &SockAddr::from(remote), libc::MSG_NOSIGNAL)
    }

    /// Receive one datagram.
    ///
    /// The return is the true datagram length (`MSG_TRUNC`) even when `buf`
    /// is smaller; the excess bytes are discarded by the kernel, which is
    /// how callers detect oversize packets and how a zero-length `buf`
    /// consumes one queued datagram.
    ///
    /// With a deadline, the receive timeout is set to the remaining time
    /// and the call blocks; a deadline already in the past returns `Ok(0)`
    /// immediately. Without one the call never blocks. Timeouts,
    /// interruptions and an empty queue all return `Ok(0)`; only hard
    /// socket failures return `Err`.
    pub fn receive(&self, buf: &mut [u8], deadline: Option<Instant>) -> io::Result<usize> {
        let mut flags = libc::MSG_TRUNC | libc::MSG_DONTWAIT;
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if deadline <= now {
                return Ok(0);
            }
            self.inner.set_read_timeout(Some(deadline - now))?;
            flags &= !libc::MSG_DONTWAIT;
        }

        match self.inner.recv_with_flags(uninit_bytes(buf), flags) {
            Ok(len) => Ok(len),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::TimedOut
                        | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }
}

fn bound_addr(socket: &Socket) -> io::Result<SocketAddr> {
    socket
        .local_addr()?
        .as_socket()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "socket bound to a non-IP address"))
}

fn uninit_bytes(buf: &mut [u8]) -> &mut [MaybeUninit<u8>] {
    // An initialized byte slice is a valid MaybeUninit<u8> view; the kernel
    // only writes into it.
    unsafe { std::slice::from_raw_parts_mut(buf.as_mut_ptr().cast(), buf.len()) }
}
