//! Tunnel Client
//!
//! Control-plane daemon for one tunnel device:
//! - Exchanges framed control packets with the server over UDP
//! - Authenticates with an AUTH request and answers HEARTBEATs
//! - Maintains persistent and ephemeral routes through the device
//! - Saves the route file and reports metrics on SIGINT/SIGTERM

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use control_plane::{CancelScope, Controller, Packet, PacketType, Route, ShellRouteCommand};
use crossbeam_channel::select;
use ring::rand::SystemRandom;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

mod auth;
mod config;
mod device;

use config::ClientConfig;
use device::Device;

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .init();

    let args: Vec<String> = std::env::args().collect();
    let config = ClientConfig::from_args(&args)?;

    log::info!("Tunnel client starting...");
    log::info!("  Server: {}", config.server);
    log::info!("  Device: {}", config.dev_name);
    log::info!(
        "  Routes: {}",
        config
            .route_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".to_string())
    );

    let client = Client::new(config)?;

    // A signal closes the root scope directly, so every blocked thread wakes
    // even when the main loop is stuck
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let signals_handle = signals.handle();
    let root = client.root.clone();
    let signal_thread = thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                log::info!("Received signal {}, shutting down", sig);
                root.close();
            }
        })?;

    client.run();

    signals_handle.close();
    if signal_thread.join().is_err() {
        log::error!("Signal thread panicked");
    }
    client.shutdown();
    Ok(())
}

// ============================================================================
// Client
// ============================================================================

struct Client {
    config: ClientConfig,
    root: CancelScope,
    controller: Controller,
    route: Route,
    device: JoinHandle<()>,
}

impl Client {
    fn new(config: ClientConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let root = CancelScope::new();

        let device = Device::bind(config.bind, config.server)?;
        log::info!("Control channel {} -> {}", device.local_addr()?, config.server);
        let (chans, device_handle) = device.spawn(root.fork())?;

        let controller = Controller::new(
            &root,
            chans.to_device,
            chans.from_device,
            config.controller_config(),
        )?;

        let route = Route::new(&root, config.dev_name.clone(), Arc::new(ShellRouteCommand))?;
        log::info!("Routes go through {}", route.dev_name());
        if let Some(path) = &config.route_file {
            if path.exists() {
                if let Err(e) = route.load(path) {
                    log::error!("Failed to load routes: {}", e);
                }
            }
        }

        Ok(Client {
            config,
            root,
            controller,
            route,
            device: device_handle,
        })
    }

    /// Serve until the root scope closes or the controller stops
    fn run(&self) {
        thread::scope(|s| {
            s.spawn(|| self.authenticate());

            loop {
                select! {
                    recv(self.controller.inbound()) -> msg => match msg {
                        Ok(packet) => self.handle_inbound(packet),
                        Err(_) => break,
                    },
                    recv(self.controller.scope().closed()) -> _ => {
                        if !self.root.is_closed() {
                            log::warn!("Controller stopped");
                        }
                        break;
                    }
                }
            }

            // Unblocks a pending AUTH request
            self.root.close();
        });
    }

    fn authenticate(&self) {
        let rng = SystemRandom::new();
        let payload = match auth::build_auth_payload(&rng, &self.config.token) {
            Ok(p) => p,
            Err(_) => {
                log::error!("Failed to generate AUTH nonce");
                return;
            }
        };

        log::info!("Sending AUTH to {}", self.config.server);
        match self.controller.request(Packet::new(PacketType::AUTH, payload)) {
            Some(resp) => match auth::parse_auth_reply(&resp.payload) {
                Some(reply) if reply.accepted => log::info!("Authenticated: {}", reply.message),
                Some(reply) => log::warn!("Authentication rejected: {}", reply.message),
                None => log::warn!("Empty AUTH reply"),
            },
            None => log::debug!("AUTH abandoned (shutting down)"),
        }
    }

    fn handle_inbound(&self, packet: Packet) {
        match packet.kind {
            PacketType::HEARTBEAT => {
                if let Some(reply) = Packet::reply_to(&packet, Vec::new()) {
                    log::trace!("Answering {}", packet);
                    self.controller.send(reply);
                }
            }
            _ => log::debug!("Unhandled inbound {}", packet),
        }
    }

    fn shutdown(self) {
        self.root.close();
        self.controller.join();
        self.route.join();
        if self.device.join().is_err() {
            log::error!("Device thread panicked");
        }

        if let Some(path) = &self.config.route_file {
            if let Err(e) = self.route.save(path) {
                log::error!("Failed to save routes: {}", e);
            }
        }

        log::info!(
            "Final metrics:\n{}",
            self.controller.metrics().render(self.controller.staging_len())
        );
    }
}
