//! Integration test for the tunnel client binary
//!
//! Plays the server side of the control channel: receives AUTH, answers it,
//! sends a HEARTBEAT, then stops the client with SIGTERM and checks that the
//! route file is written on the way out.

#![cfg(unix)]

use std::fs;
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use control_plane::{decode_packets, encode_packet, Packet, PacketType};

struct ClientProcess {
    child: Child,
}

impl ClientProcess {
    fn start(server: SocketAddr, routes: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let child = Command::new(env!("CARGO_BIN_EXE_tunnel-client"))
            .args([
                "--server",
                &server.to_string(),
                "--bind",
                "127.0.0.1:0",
                "--dev",
                "tun-test",
                "--routes",
                routes.to_str().ok_or("non-utf8 path")?,
                "--token",
                "itest",
            ])
            .env("RUST_LOG", "debug")
            .spawn()?;
        Ok(ClientProcess { child })
    }

    fn terminate(&mut self) -> Option<ExitStatus> {
        Command::new("kill")
            .args(["-TERM", &self.child.id().to_string()])
            .status()
            .ok()?;

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Ok(Some(status)) = self.child.try_wait() {
                return Some(status);
            }
            thread::sleep(Duration::from_millis(50));
        }
        None
    }
}

impl Drop for ClientProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn recv_packet(socket: &UdpSocket) -> (Packet, SocketAddr) {
    let mut buf = [0u8; 2048];
    let (len, from) = socket.recv_from(&mut buf).expect("no packet from client");
    let (mut packets, _) = decode_packets(&buf[..len]);
    assert!(!packets.is_empty(), "datagram held no complete frame");
    (packets.remove(0), from)
}

#[test]
fn test_auth_heartbeat_and_graceful_shutdown() {
    let server = UdpSocket::bind("127.0.0.1:0").unwrap();
    server.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let routes = std::env::temp_dir().join(format!("tunnel-client-routes-{}", std::process::id()));
    fs::remove_file(&routes).ok();

    let mut client = ClientProcess::start(server.local_addr().unwrap(), &routes).unwrap();

    // AUTH arrives first, carrying the token after the nonce
    let (auth, client_addr) = recv_packet(&server);
    assert_eq!(auth.kind, PacketType::AUTH);
    assert!(auth.req_id().is_some());
    assert!(auth.payload.ends_with(b"itest"));

    let reply = Packet::reply_to(&auth, b"\x00welcome".to_vec()).unwrap();
    server.send_to(&encode_packet(&reply).unwrap(), client_addr).unwrap();

    // Server-initiated HEARTBEAT is answered with the same id
    let ping = Packet::with_req_id(PacketType::HEARTBEAT, 1000, Vec::new());
    server.send_to(&encode_packet(&ping).unwrap(), client_addr).unwrap();

    let (pong, _) = recv_packet(&server);
    assert_eq!(pong.kind, PacketType::HEARTBEAT_R);
    assert_eq!(pong.req_id(), Some(1000));

    let status = client.terminate().expect("client did not exit after SIGTERM");
    assert!(status.success());

    // No routes were added, so the saved file is empty
    let saved = fs::read_to_string(&routes).unwrap();
    fs::remove_file(&routes).ok();
    assert!(saved.is_empty());
}
