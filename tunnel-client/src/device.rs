//! UDP device pump
//!
//! Bridges the control socket and the controller's device channels. Each
//! datagram carries one or more whole frames; a partial frame at the end of
//! a datagram is discarded.

use std::io;
use std::net::SocketAddr;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use control_plane::{decode_packets, encode_packet, CancelScope, Packet};
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TryRecvError};
use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};

// ============================================================================
// Constants
// ============================================================================

/// Receive buffer size (largest UDP payload)
const MAX_DATAGRAM_SIZE: usize = 65535;

/// mio token for the control socket
const SOCKET_TOKEN: Token = Token(0);

/// Poll timeout; bounds outbound latency and shutdown detection
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Capacity of each device channel
const QUEUE_LEN: usize = 64;

/// How long an inbound hand-off waits before the pump flushes outbound
const INBOUND_RETRY: Duration = Duration::from_millis(5);

// ============================================================================
// Device
// ============================================================================

pub struct Device {
    poll: Poll,
    socket: UdpSocket,
    peer: SocketAddr,
    recv_buf: Vec<u8>,
}

/// Channel ends handed to the controller
pub struct DeviceChannels {
    pub to_device: Sender<Packet>,
    pub from_device: Receiver<Packet>,
}

impl Device {
    pub fn bind(local: SocketAddr, peer: SocketAddr) -> io::Result<Self> {
        let mut socket = UdpSocket::bind(local)?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut socket, SOCKET_TOKEN, Interest::READABLE)?;

        log::info!("Control socket bound to {}", socket.local_addr()?);

        Ok(Device {
            poll,
            socket,
            peer,
            recv_buf: vec![0u8; MAX_DATAGRAM_SIZE],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Start the pump thread
    ///
    /// The thread exits when `scope` closes or the controller drops its end
    /// of either channel; on exit it closes `scope`.
    pub fn spawn(self, scope: CancelScope) -> io::Result<(DeviceChannels, JoinHandle<()>)> {
        let (to_device, outbound) = crossbeam_channel::bounded(QUEUE_LEN);
        let (inbound, from_device) = crossbeam_channel::bounded(QUEUE_LEN);

        let handle = thread::Builder::new()
            .name("device".into())
            .spawn(move || {
                let mut device = self;
                if let Err(e) = device.run(&scope, &outbound, &inbound) {
                    log::error!("Device pump failed: {}", e);
                }
                scope.close();
            })?;

        Ok((
            DeviceChannels {
                to_device,
                from_device,
            },
            handle,
        ))
    }

    fn run(
        &mut self,
        scope: &CancelScope,
        outbound: &Receiver<Packet>,
        inbound: &Sender<Packet>,
    ) -> io::Result<()> {
        let mut events = Events::with_capacity(64);

        while !scope.is_closed() {
            match self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            for event in events.iter() {
                if event.token() == SOCKET_TOKEN
                    && !self.process_socket(scope, inbound, outbound)?
                {
                    return Ok(());
                }
            }

            if !self.flush_outbound(outbound)? {
                return Ok(());
            }
        }

        Ok(())
    }

    /// Drain the socket. Returns false once either side is gone.
    fn process_socket(
        &mut self,
        scope: &CancelScope,
        inbound: &Sender<Packet>,
        outbound: &Receiver<Packet>,
    ) -> io::Result<bool> {
        loop {
            let (len, from) = match self.socket.recv_from(&mut self.recv_buf) {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(e) => return Err(e),
            };

            if from != self.peer {
                log::debug!("Ignoring {} bytes from unknown peer {}", len, from);
                continue;
            }

            let (packets, rest) = decode_packets(&self.recv_buf[..len]);
            if !rest.is_empty() {
                log::debug!("Discarding {} trailing bytes from {}", rest.len(), from);
            }

            for packet in packets {
                log::trace!("<- {}", packet);
                if !self.deliver(packet, scope, inbound, outbound)? {
                    return Ok(false);
                }
            }
        }
    }

    /// Hand one packet to the controller.
    ///
    /// While the inbound channel is full, outbound keeps flowing: the
    /// controller may be waiting on its own writes before it reads again.
    fn deliver(
        &mut self,
        mut packet: Packet,
        scope: &CancelScope,
        inbound: &Sender<Packet>,
        outbound: &Receiver<Packet>,
    ) -> io::Result<bool> {
        loop {
            if scope.is_closed() {
                return Ok(false);
            }
            match inbound.send_timeout(packet, INBOUND_RETRY) {
                Ok(()) => return Ok(true),
                Err(SendTimeoutError::Timeout(p)) => {
                    packet = p;
                    if !self.flush_outbound(outbound)? {
                        return Ok(false);
                    }
                }
                Err(SendTimeoutError::Disconnected(_)) => return Ok(false),
            }
        }
    }

    /// Send everything queued. Returns false once the outbound side is gone.
    fn flush_outbound(&mut self, outbound: &Receiver<Packet>) -> io::Result<bool> {
        loop {
            let packet = match outbound.try_recv() {
                Ok(p) => p,
                Err(TryRecvError::Empty) => return Ok(true),
                Err(TryRecvError::Disconnected) => return Ok(false),
            };

            let frame = match encode_packet(&packet) {
                Ok(f) => f,
                Err(e) => {
                    log::warn!("Dropping {}: {}", packet, e);
                    continue;
                }
            };

            log::trace!("-> {}", packet);
            match self.socket.send_to(&frame, self.peer) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    log::debug!("Socket busy, dropping {}", packet);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
