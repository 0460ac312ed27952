//! Route table management for the tunnel device
//!
//! [`Route`] keeps the host's routing table in sync with two in-memory
//! tables:
//! - persistent entries ([`RouteTable`]), loaded from and saved to a
//!   `CIDR<TAB>COMMENT` file
//! - ephemeral entries ([`EphemeralTable`]), removed by a background thread
//!   once they expire
//!
//! No two entries across both tables may overlap. The check runs once, at
//! insertion, under both table locks.
//!
//! Tables are updated before the OS command runs. If the command fails the
//! entry stays in memory and the error is returned to the caller; the
//! command collaborator must therefore be idempotent.

mod cidr;
mod command;
mod ephemeral;
mod item;
mod table;

pub use cidr::{format_cidr, overlaps, parse_cidr};
pub use command::{add_route_cmd, remove_route_cmd, RouteCommand, ShellRouteCommand};
pub use ephemeral::EphemeralTable;
pub use item::{EphemeralItem, Item};
pub use table::RouteTable;

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{select, Receiver, Sender};
use ipnet::IpNet;

use crate::scope::CancelScope;

// ============================================================================
// Error Types
// ============================================================================

/// Errors returned by route operations
#[derive(Debug)]
pub enum RouteError {
    /// CIDR failed to parse
    InvalidCidr { cidr: String, reason: String },
    /// Comment contains a tab or line break
    InvalidComment(String),
    /// New entry overlaps an existing one
    Conflict { cidr: String, existing: String },
    /// No entry with this CIDR
    NotFound(String),
    /// Tables were updated but the OS command failed
    Apply { cidr: String, source: io::Error },
    /// Route file could not be read or written
    Io(io::Error),
}

impl std::fmt::Display for RouteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteError::InvalidCidr { cidr, reason } => {
                write!(f, "invalid CIDR '{}': {}", cidr, reason)
            }
            RouteError::InvalidComment(comment) => {
                write!(f, "comment {:?} contains a tab or line break", comment)
            }
            RouteError::Conflict { cidr, existing } => {
                write!(f, "route '{}' overlaps existing route '{}'", cidr, existing)
            }
            RouteError::NotFound(cidr) => write!(f, "route '{}' not found", cidr),
            RouteError::Apply { cidr, source } => {
                write!(f, "failed to apply route '{}': {}", cidr, source)
            }
            RouteError::Io(e) => write!(f, "route file error: {}", e),
        }
    }
}

impl std::error::Error for RouteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RouteError::Apply { source, .. } => Some(source),
            RouteError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RouteError {
    fn from(e: io::Error) -> Self {
        RouteError::Io(e)
    }
}

// ============================================================================
// Shared State
// ============================================================================

/// State shared between the route handle and the eviction thread.
///
/// Lock order: `items` before `ephemeral`.
struct Shared {
    dev_name: String,
    items: Mutex<RouteTable>,
    ephemeral: Mutex<EphemeralTable>,
    command: Arc<dyn RouteCommand>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    fn set_route(&self, cidr: &str) -> Result<(), RouteError> {
        self.command
            .set_route(&self.dev_name, cidr)
            .map_err(|source| RouteError::Apply {
                cidr: cidr.to_string(),
                source,
            })
    }

    fn delete_route(&self, cidr: &str) -> Result<(), RouteError> {
        self.command
            .delete_route(cidr)
            .map_err(|source| RouteError::Apply {
                cidr: cidr.to_string(),
                source,
            })
    }

    fn remove_ephemeral_item(&self, cidr: &str) -> Result<(), RouteError> {
        let removed = lock(&self.ephemeral).remove(cidr);
        match removed {
            Some(item) => {
                log::info!("Removed ephemeral route {}", item.item);
                self.delete_route(cidr)
            }
            None => Err(RouteError::NotFound(cidr.to_string())),
        }
    }
}

/// Existing entry in either table overlapping `net`
fn find_conflict<'a>(
    items: &'a RouteTable,
    ephemeral: &'a EphemeralTable,
    net: &IpNet,
) -> Option<&'a Item> {
    ephemeral
        .match_net(net)
        .map(|e| &e.item)
        .or_else(|| items.match_net(net))
}

// ============================================================================
// Route
// ============================================================================

/// Persistent and ephemeral routes for one tunnel device
pub struct Route {
    shared: Arc<Shared>,
    scope: CancelScope,
    wake: Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Route {
    /// Create an empty route manager and start its eviction thread
    pub fn new(
        parent: &CancelScope,
        dev_name: impl Into<String>,
        command: Arc<dyn RouteCommand>,
    ) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            dev_name: dev_name.into(),
            items: Mutex::new(RouteTable::new()),
            ephemeral: Mutex::new(EphemeralTable::new()),
            command,
        });
        let scope = parent.fork();

        // Capacity one: rapid adds coalesce into a single wake-up
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);

        let s = Arc::clone(&shared);
        let sc = scope.clone();
        let handle = thread::Builder::new()
            .name("route-evict".into())
            .spawn(move || eviction_loop(s, sc, wake_rx))?;

        Ok(Route {
            shared,
            scope,
            wake: wake_tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn dev_name(&self) -> &str {
        &self.shared.dev_name
    }

    /// Snapshot of the persistent entries, in sorted order
    pub fn items(&self) -> Vec<Item> {
        lock(&self.shared.items).iter().cloned().collect()
    }

    /// Snapshot of the ephemeral entries, soonest expiry first
    pub fn ephemeral_items(&self) -> Vec<EphemeralItem> {
        lock(&self.shared.ephemeral).iter().cloned().collect()
    }

    /// Entry overlapping `target`, ephemeral entries first
    pub fn match_net(&self, target: &IpNet) -> Option<Item> {
        let items = lock(&self.shared.items);
        let ephemeral = lock(&self.shared.ephemeral);
        find_conflict(&items, &ephemeral, target).cloned()
    }

    /// Add a persistent route and install it
    pub fn add_item(&self, item: Item) -> Result<(), RouteError> {
        {
            let mut items = lock(&self.shared.items);
            let ephemeral = lock(&self.shared.ephemeral);
            if let Some(existing) = find_conflict(&items, &ephemeral, item.net()) {
                return Err(RouteError::Conflict {
                    cidr: item.cidr().to_string(),
                    existing: existing.cidr().to_string(),
                });
            }
            items.append(item.clone());
            items.sort();
        }

        log::info!("Added route {}", item);
        self.shared.set_route(item.cidr())
    }

    /// Add a route that is removed automatically at `item.expires_at`
    pub fn add_ephemeral_item(&self, item: EphemeralItem) -> Result<(), RouteError> {
        let cidr = item.cidr().to_string();
        {
            let items = lock(&self.shared.items);
            let mut ephemeral = lock(&self.shared.ephemeral);
            if let Some(existing) = find_conflict(&items, &ephemeral, item.item.net()) {
                return Err(RouteError::Conflict {
                    cidr,
                    existing: existing.cidr().to_string(),
                });
            }
            log::info!(
                "Added ephemeral route {} (expires in {:?})",
                item.item,
                item.expires_at.saturating_duration_since(Instant::now())
            );
            ephemeral.add(item);
        }

        // Never blocks: a pending wake already covers this entry
        let _ = self.wake.try_send(());

        self.shared.set_route(&cidr)
    }

    /// Remove a route from whichever table holds it and uninstall it
    pub fn remove_item(&self, cidr: &str) -> Result<(), RouteError> {
        let cidr = format_cidr(cidr);
        let removed = lock(&self.shared.items).remove(&cidr);
        if let Some(item) = removed {
            log::info!("Removed route {}", item);
            return self.shared.delete_route(&cidr);
        }
        self.shared.remove_ephemeral_item(&cidr)
    }

    /// Remove an ephemeral route before it expires and uninstall it
    pub fn remove_ephemeral_item(&self, cidr: &str) -> Result<(), RouteError> {
        self.shared.remove_ephemeral_item(&format_cidr(cidr))
    }

    /// Turn an ephemeral route into a persistent one.
    ///
    /// The route is already installed, so no OS command runs.
    pub fn persist_ephemeral_item(&self, cidr: &str) -> Result<(), RouteError> {
        let cidr = format_cidr(cidr);
        let mut items = lock(&self.shared.items);
        let removed = lock(&self.shared.ephemeral).remove(&cidr);
        match removed {
            Some(e) => {
                log::info!("Persisted ephemeral route {}", e.item);
                items.append(e.item);
                items.sort();
                Ok(())
            }
            None => Err(RouteError::NotFound(cidr)),
        }
    }

    /// Load persistent routes from a `CIDR<TAB>COMMENT` file.
    ///
    /// Bad lines and rejected routes are logged and skipped.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<(), RouteError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        let mut loaded = 0;
        for line in content.lines() {
            // Comments keep their whitespace; only the terminator goes
            let line = line.trim_end_matches(['\r', '\n']);
            if line.trim().is_empty() {
                continue;
            }

            let mut fields = line.splitn(2, '\t');
            let cidr = fields.next().unwrap_or_default().trim();
            let comment = fields.next().unwrap_or_default();

            let item = match Item::parse(cidr, comment) {
                Ok(item) => item,
                Err(e) => {
                    log::error!("Skipping route line '{}': {}", line, e);
                    continue;
                }
            };
            match self.add_item(item) {
                Ok(()) => loaded += 1,
                Err(e) => log::error!("Add route {} failed: {}", cidr, e),
            }
        }

        lock(&self.shared.items).sort();
        log::info!("Loaded {} routes from {}", loaded, path.display());
        Ok(())
    }

    /// Write persistent routes as `CIDR<TAB>COMMENT` lines
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), RouteError> {
        let path = path.as_ref();
        let mut buf = String::new();
        let count = {
            let items = lock(&self.shared.items);
            for item in items.iter() {
                let _ = writeln!(buf, "{}", item);
            }
            items.len()
        };

        fs::write(path, buf)?;
        log::info!("Saved {} routes to {}", count, path.display());
        Ok(())
    }

    /// Stop the eviction thread
    pub fn close(&self) {
        self.scope.close();
    }

    /// Close and wait for the eviction thread to exit
    pub fn join(&self) {
        self.close();
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Route eviction thread panicked");
            }
        }
    }
}

impl Drop for Route {
    fn drop(&mut self) {
        self.scope.close();
    }
}

// ============================================================================
// Eviction
// ============================================================================

/// Remove ephemeral routes as they expire.
///
/// Sleeps until the earliest expiry; a wake-up on `wake` means a new entry
/// may now be first in line.
fn eviction_loop(shared: Arc<Shared>, scope: CancelScope, wake: Receiver<()>) {
    log::debug!("Route eviction loop started");

    loop {
        if scope.is_closed() {
            break;
        }

        let now = Instant::now();
        let (expired, next_expiry) = {
            let mut ephemeral = lock(&shared.ephemeral);
            let expired = ephemeral.pop_expired(now);
            (expired, ephemeral.front().map(|e| e.expires_at))
        };

        if let Some(item) = expired {
            log::info!("Route '{}' is expired", item.cidr());
            if let Err(e) = shared.delete_route(item.cidr()) {
                log::error!("Remove expired route failed: {}", e);
            }
            continue;
        }

        match next_expiry {
            None => select! {
                recv(wake) -> msg => if msg.is_err() { break },
                recv(scope.closed()) -> _ => break,
            },
            Some(at) => select! {
                recv(crossbeam_channel::at(at)) -> _ => {}
                recv(wake) -> msg => if msg.is_err() { break },
                recv(scope.closed()) -> _ => break,
            },
        }
    }

    log::debug!("Route eviction loop stopped");
}
