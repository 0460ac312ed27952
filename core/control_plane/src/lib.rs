//! Tunnel Client Control Plane
//!
//! This crate provides the control-plane data path for the tunnel client:
//! - Packet type tags and the framed packet envelope
//! - Request/response correlation over a single duplex packet channel
//! - Route table management (persistent and ephemeral CIDR entries)
//! - Hierarchical cancellation shared by all background threads
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                    control_plane structure                     │
//! ├───────────────────────────────────────────────────────────────┤
//! │                                                                │
//! │  scope.rs       - CancelScope (fork / close / closed())        │
//! │  packet/        - PacketType, Packet, frame codec              │
//! │  controller.rs  - staging table, read/write/housekeeping loops │
//! │  route/         - RouteTable, EphemeralTable, Route            │
//! │  metrics.rs     - atomic counters, Prometheus text rendering   │
//! │                                                                │
//! └───────────────────────────────────────────────────────────────┘
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod controller;
pub mod metrics;
pub mod packet;
pub mod route;
pub mod scope;

// Re-export commonly used types
pub use controller::{Controller, ControllerConfig, Request};
pub use metrics::ControllerMetrics;
pub use packet::{
    decode_packet,
    decode_packets,
    encode_packet,
    Packet,
    PacketError,
    PacketType,
};
pub use route::{
    format_cidr,
    EphemeralItem,
    EphemeralTable,
    Item,
    Route,
    RouteCommand,
    RouteError,
    RouteTable,
    ShellRouteCommand,
};
pub use scope::CancelScope;
