//! Integration tests for request/response correlation
//!
//! A fake peer thread sits on the far side of the device channels and
//! answers requests in an order chosen by the test.

use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

use control_plane::{CancelScope, Controller, ControllerConfig, Packet, PacketType};
use crossbeam_channel::{Receiver, Sender};

fn start() -> (CancelScope, Controller, Receiver<Packet>, Sender<Packet>) {
    let root = CancelScope::new();
    let (to_device, device_rx) = crossbeam_channel::unbounded();
    let (device_tx, from_device) = crossbeam_channel::unbounded();
    let ctl = Controller::new(&root, to_device, from_device, ControllerConfig::default()).unwrap();
    (root, ctl, device_rx, device_tx)
}

#[test]
fn test_concurrent_requests_get_their_own_response() {
    const CALLS: usize = 16;
    let (_root, ctl, device_rx, device_tx) = start();

    // Peer collects every request, then answers in reverse order
    let peer = thread::spawn(move || {
        let mut reqs = Vec::new();
        while reqs.len() < CALLS {
            reqs.push(device_rx.recv().unwrap());
        }
        for req in reqs.iter().rev() {
            let resp = Packet::reply_to(req, req.payload.clone()).unwrap();
            device_tx.send(resp).unwrap();
        }
    });

    let results: Vec<(Vec<u8>, Option<Packet>)> = thread::scope(|s| {
        let handles: Vec<_> = (0..CALLS)
            .map(|i| {
                let ctl = &ctl;
                s.spawn(move || {
                    let payload = format!("call-{}", i).into_bytes();
                    let resp = ctl.request(Packet::new(PacketType::AUTH, payload.clone()));
                    (payload, resp)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    peer.join().unwrap();

    let mut ids = HashSet::new();
    for (payload, resp) in results {
        let resp = resp.expect("every call should be answered");
        assert_eq!(resp.kind, PacketType::AUTH_R);
        assert_eq!(resp.payload, payload);
        assert!(ids.insert(resp.req_id().unwrap()), "ids must be distinct");
    }
    assert_eq!(ctl.staging_len(), 0);
}

#[test]
fn test_close_releases_all_outstanding_requests() {
    const CALLS: usize = 8;
    let (root, ctl, device_rx, _device_tx) = start();

    let started = Instant::now();
    let results: Vec<Option<Packet>> = thread::scope(|s| {
        let handles: Vec<_> = (0..CALLS)
            .map(|_| {
                let ctl = &ctl;
                s.spawn(move || ctl.request(Packet::new(PacketType::NEWDC, vec![])))
            })
            .collect();

        // Wait until every request reached the device, then shut down
        for _ in 0..CALLS {
            device_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        }
        root.close();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(results.iter().all(|r| r.is_none()));
    assert!(started.elapsed() < Duration::from_secs(5));

    // Every controller thread exits
    ctl.join();
}

#[test]
fn test_duplicate_response_is_ignored() {
    let (_root, ctl, device_rx, device_tx) = start();

    let peer = thread::spawn(move || {
        let req = device_rx.recv().unwrap();
        let resp = Packet::reply_to(&req, b"first".to_vec()).unwrap();
        device_tx.send(resp.clone()).unwrap();
        device_tx.send(resp).unwrap();
        device_tx
    });

    let resp = ctl.request(Packet::new(PacketType::HEARTBEAT, vec![])).unwrap();
    let device_tx = peer.join().unwrap();
    assert_eq!(resp.payload, b"first");

    // Controller keeps working after the duplicate
    device_tx
        .send(Packet::with_req_id(PacketType::HEARTBEAT, 9, vec![]))
        .unwrap();
    let fwd = ctl.inbound().recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(fwd.req_id(), Some(9));
}

#[test]
fn test_peer_request_answered_through_send() {
    let (_root, ctl, device_rx, device_tx) = start();

    device_tx
        .send(Packet::with_req_id(PacketType::HEARTBEAT, 41, b"ping".to_vec()))
        .unwrap();
    let req = ctl.inbound().recv_timeout(Duration::from_secs(1)).unwrap();

    ctl.send(Packet::reply_to(&req, b"pong".to_vec()).unwrap());

    let out = device_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(out.kind, PacketType::HEARTBEAT_R);
    assert_eq!(out.req_id(), Some(41));
    assert_eq!(ctl.staging_len(), 0);
}

#[test]
fn test_requests_staged_in_submission_order() {
    let (_root, ctl, device_rx, _device_tx) = start();

    for _ in 0..5 {
        ctl.send(Packet::new(PacketType::AUTH, vec![]));
    }

    let ids: Vec<u32> = (0..5)
        .map(|_| device_rx.recv_timeout(Duration::from_secs(1)).unwrap().req_id().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}
