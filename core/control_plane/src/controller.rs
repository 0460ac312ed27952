//! Request/response correlation over a single duplex packet channel
//!
//! The controller gives callers synchronous-call semantics (and
//! fire-and-forget) on top of an asynchronous device channel pair.
//!
//! # Threads
//!
//! ```text
//!            send()/request()
//!                  │
//!                  ▼  request queue (bounded)
//!   ┌──────────────────────────┐      to_device
//!   │ write: assign id, stage  │─────────────────────► device
//!   └──────────────────────────┘
//!                  │ staging table (mutex)
//!   ┌──────────────────────────┐      from_device
//!   │ read: resolve or forward │◄───────────────────── device
//!   └──────────────────────────┘
//!        │ responses          │ requests
//!        ▼                    ▼
//!   reply slot (cap 1)   inbound queue ──► higher layer
//!
//!   housekeeping: periodic tick, optional stale-entry sweep
//! ```
//!
//! All three threads exit when the controller's scope closes. The read and
//! write threads close the scope themselves when their device channel
//! disconnects, so one side going away takes the others down with it.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver, Sender};

use crate::metrics::ControllerMetrics;
use crate::packet::Packet;
use crate::scope::CancelScope;

// ============================================================================
// Constants
// ============================================================================

/// Default capacity of the outbound request queue
pub const DEFAULT_REQUEST_QUEUE_LEN: usize = 8;

/// Default housekeeping tick
pub const DEFAULT_HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Configuration
// ============================================================================

/// Controller tuning
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Capacity of the outbound request queue
    pub request_queue_len: usize,
    /// Capacity of the inbound queue (0 = hand-off to a waiting receiver)
    pub inbound_queue_len: usize,
    /// Period of the housekeeping tick
    pub housekeeping_interval: Duration,
    /// Drop staged requests older than this on each tick. `None` disables
    /// the sweep and the tick has no effect.
    pub stale_after: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            request_queue_len: DEFAULT_REQUEST_QUEUE_LEN,
            inbound_queue_len: 0,
            housekeeping_interval: DEFAULT_HOUSEKEEPING_INTERVAL,
            stale_after: None,
        }
    }
}

// ============================================================================
// Request
// ============================================================================

/// An outbound packet plus an optional single-use reply slot
pub struct Request {
    pub packet: Packet,
    reply: Option<Sender<Packet>>,
}

impl Request {
    /// Wrap a packet for the request queue.
    ///
    /// With `reply` set, also returns the receiver the response will be
    /// delivered on (at most once).
    pub fn new(packet: Packet, reply: bool) -> (Self, Option<Receiver<Packet>>) {
        if reply {
            let (tx, rx) = crossbeam_channel::bounded(1);
            (
                Request {
                    packet,
                    reply: Some(tx),
                },
                Some(rx),
            )
        } else {
            (Request { packet, reply: None }, None)
        }
    }
}

/// A transmitted request waiting for its response
struct Staged {
    reply: Option<Sender<Packet>>,
    staged_at: Instant,
}

// ============================================================================
// Shared State
// ============================================================================

/// State shared between the controller handle and its threads
struct Shared {
    scope: CancelScope,
    req_id: AtomicU32,
    staging: Mutex<HashMap<u32, Staged>>,
    metrics: ControllerMetrics,
}

impl Shared {
    fn staging(&self) -> MutexGuard<'_, HashMap<u32, Staged>> {
        self.staging.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_req_id(&self) -> u32 {
        // fetch_add wraps on overflow
        self.req_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Handle one packet from the device.
    ///
    /// Returns false when the read loop should stop.
    fn dispatch(&self, packet: Packet, inbound: &Sender<Packet>) -> bool {
        if packet.kind.is_resp() {
            self.resolve(packet);
            return true;
        }

        if !packet.kind.is_req() {
            log::warn!("Dropping packet with invalid type: {}", packet);
            ControllerMetrics::incr(&self.metrics.invalid_packets_total);
            return true;
        }

        if self.scope.is_closed() {
            return false;
        }
        select! {
            send(inbound, packet) -> res => {
                if res.is_err() {
                    return false;
                }
                ControllerMetrics::incr(&self.metrics.inbound_forwarded_total);
                true
            }
            recv(self.scope.closed()) -> _ => false,
        }
    }

    /// Deliver a response to its staged request, if any
    fn resolve(&self, packet: Packet) {
        let staged = packet
            .req_id()
            .and_then(|id| self.staging().remove(&id));

        match staged {
            Some(staged) => {
                log::trace!("Resolved {}", packet);
                ControllerMetrics::incr(&self.metrics.responses_matched_total);
                if let Some(reply) = staged.reply {
                    // Waiter may have given up; never block on it
                    let _ = reply.try_send(packet);
                }
            }
            None => {
                log::debug!("Dropping response with no staged request: {}", packet);
                ControllerMetrics::incr(&self.metrics.responses_dropped_total);
            }
        }
    }

    /// Assign a correlation id to a request-kind packet and record it
    fn stage(&self, packet: &mut Packet, reply: Option<Sender<Packet>>) {
        let id = packet.init_req_id(|| self.next_req_id());
        let previous = self.staging().insert(
            id,
            Staged {
                reply,
                staged_at: Instant::now(),
            },
        );
        if previous.is_some() {
            log::warn!("Correlation id {} reused, abandoning the earlier request", id);
        }
        log::trace!("Staged {}", packet);
        ControllerMetrics::incr(&self.metrics.requests_staged_total);
    }

    /// Drop staged requests older than `max_age`
    fn sweep(&self, max_age: Option<Duration>) {
        let max_age = match max_age {
            Some(d) => d,
            None => {
                log::trace!("Housekeeping: {} staged requests", self.staging().len());
                return;
            }
        };

        let stale: Vec<(u32, Staged)> = {
            let mut staging = self.staging();
            let ids: Vec<u32> = staging
                .iter()
                .filter(|(_, s)| s.staged_at.elapsed() >= max_age)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| staging.remove(&id).map(|s| (id, s)))
                .collect()
        };

        if stale.is_empty() {
            return;
        }
        for (id, _) in &stale {
            log::debug!("Dropping stale request #{}", id);
        }
        log::info!("Housekeeping dropped {} stale requests", stale.len());
        self.metrics
            .staging_evicted_total
            .fetch_add(stale.len() as u64, Ordering::Relaxed);

        // Dropping the reply senders wakes the abandoned waiters
        drop(stale);
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Multiplexes request/response calls over one device channel pair
pub struct Controller {
    shared: Arc<Shared>,
    input: Sender<Request>,
    inbound: Receiver<Packet>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    /// Start a controller on a device channel pair.
    ///
    /// The controller runs in a scope forked from `parent`; closing either
    /// stops all three threads.
    pub fn new(
        parent: &CancelScope,
        to_device: Sender<Packet>,
        from_device: Receiver<Packet>,
        config: ControllerConfig,
    ) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            scope: parent.fork(),
            req_id: AtomicU32::new(0),
            staging: Mutex::new(HashMap::new()),
            metrics: ControllerMetrics::new(),
        });

        let (input_tx, input_rx) = crossbeam_channel::bounded(config.request_queue_len);
        let (inbound_tx, inbound_rx) = crossbeam_channel::bounded(config.inbound_queue_len);

        let mut handles = Vec::with_capacity(3);

        let s = Arc::clone(&shared);
        handles.push(
            thread::Builder::new()
                .name("ctl-read".into())
                .spawn(move || read_loop(s, from_device, inbound_tx))?,
        );

        let s = Arc::clone(&shared);
        handles.push(
            thread::Builder::new()
                .name("ctl-write".into())
                .spawn(move || write_loop(s, input_rx, to_device))?,
        );

        let s = Arc::clone(&shared);
        let interval = config.housekeeping_interval;
        let stale_after = config.stale_after;
        handles.push(
            thread::Builder::new()
                .name("ctl-housekeeping".into())
                .spawn(move || housekeeping_loop(s, interval, stale_after))?,
        );

        Ok(Controller {
            shared,
            input: input_tx,
            inbound: inbound_rx,
            handles: Mutex::new(handles),
        })
    }

    /// Next correlation id for this controller.
    ///
    /// Starts at 1 and wraps around after `u32::MAX`.
    pub fn next_req_id(&self) -> u32 {
        self.shared.next_req_id()
    }

    /// Queue a packet without waiting for any reply
    pub fn send(&self, packet: Packet) {
        let (req, _) = Request::new(packet, false);
        self.submit(req, None);
    }

    /// Send a request and block until its response arrives.
    ///
    /// Returns `None` if the controller shuts down first, if housekeeping
    /// drops the request, or if `packet` is not a request-kind packet (those
    /// are sent but can never be answered).
    pub fn request(&self, packet: Packet) -> Option<Packet> {
        if !packet.kind.is_req() {
            log::warn!("request() called with non-request packet {}, sending only", packet);
            self.send(packet);
            return None;
        }
        let (req, reply) = Request::new(packet, true);
        self.submit(req, reply)
    }

    /// Queue a prepared request; wait on `reply` if given
    pub fn submit(&self, req: Request, reply: Option<Receiver<Packet>>) -> Option<Packet> {
        let scope = &self.shared.scope;
        if scope.is_closed() {
            return None;
        }

        select! {
            send(self.input, req) -> res => {
                if res.is_err() {
                    return None;
                }
            }
            recv(scope.closed()) -> _ => return None,
        }

        let reply = reply?;
        select! {
            recv(reply) -> msg => {
                if scope.is_closed() {
                    return None;
                }
                msg.ok()
            }
            recv(scope.closed()) -> _ => None,
        }
    }

    /// Packets from the peer that are not responses to our requests
    pub fn inbound(&self) -> &Receiver<Packet> {
        &self.inbound
    }

    /// Number of requests still waiting for a response
    pub fn staging_len(&self) -> usize {
        self.shared.staging().len()
    }

    pub fn metrics(&self) -> &ControllerMetrics {
        &self.shared.metrics
    }

    /// The controller's own scope
    pub fn scope(&self) -> &CancelScope {
        &self.shared.scope
    }

    /// Stop all controller threads
    pub fn close(&self) {
        self.shared.scope.close();
    }

    /// Close and wait for every controller thread to exit
    pub fn join(&self) {
        self.close();
        let handles = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(|e| e.into_inner()),
        );
        for handle in handles {
            let name = handle.thread().name().unwrap_or("ctl").to_string();
            if handle.join().is_err() {
                log::error!("Controller thread '{}' panicked", name);
            }
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shared.scope.close();
    }
}

// ============================================================================
// Threads
// ============================================================================

fn read_loop(shared: Arc<Shared>, from_device: Receiver<Packet>, inbound: Sender<Packet>) {
    log::debug!("Controller read loop started");

    loop {
        if shared.scope.is_closed() {
            break;
        }
        let packet = select! {
            recv(shared.scope.closed()) -> _ => break,
            recv(from_device) -> msg => match msg {
                Ok(p) => p,
                Err(_) => {
                    log::debug!("Device receive channel closed");
                    break;
                }
            },
        };

        if !shared.dispatch(packet, &inbound) {
            break;
        }
    }

    shared.scope.close();
    log::debug!("Controller read loop stopped");
}

fn write_loop(shared: Arc<Shared>, input: Receiver<Request>, to_device: Sender<Packet>) {
    log::debug!("Controller write loop started");

    loop {
        if shared.scope.is_closed() {
            break;
        }
        let Request { mut packet, reply } = select! {
            recv(shared.scope.closed()) -> _ => break,
            recv(input) -> msg => match msg {
                Ok(req) => req,
                Err(_) => break,
            },
        };

        // Stage before transmitting so a fast response always finds its entry
        if packet.kind.is_req() {
            shared.stage(&mut packet, reply);
        }

        select! {
            send(to_device, packet) -> res => {
                if res.is_err() {
                    log::debug!("Device send channel closed");
                    break;
                }
            }
            recv(shared.scope.closed()) -> _ => break,
        }
    }

    shared.scope.close();
    log::debug!("Controller write loop stopped");
}

fn housekeeping_loop(shared: Arc<Shared>, interval: Duration, stale_after: Option<Duration>) {
    let ticker = crossbeam_channel::tick(interval);

    loop {
        select! {
            recv(shared.scope.closed()) -> _ => break,
            recv(ticker) -> _ => shared.sweep(stale_after),
        }
    }
}
