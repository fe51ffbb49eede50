//! End-to-end exchanges between a `Server` thread and clients.

#![cfg(unix)]
#![allow(clippy::unwrap_used)]

use std::io::{Read, Write};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use lipc::{ACK, Client, Config, Message, Server};
use tempfile::TempDir;

fn socket_in(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

fn quick() -> Config {
    Config::default().with_timeout(Duration::from_millis(500))
}

#[test]
fn sequential_clients_get_their_responses() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir, "srv.sock");
    let server = Server::new(&path);
    assert!(server.is_valid());

    thread::scope(|s| {
        let srv = s.spawn(|| {
            let mut seen = Vec::new();
            for _ in 0..2 {
                let done = server.listen(|header, message| {
                    seen.push((header.as_bytes().to_vec(), message.as_bytes().to_vec()));
                    if header.as_bytes() == b"bin" {
                        Message::from(vec![1u8])
                    } else {
                        Message::from("Unix Domain Sockets!")
                    }
                });
                assert!(!done.is_error(), "{}", done.as_str());
                assert!(done.is_empty());
            }
            seen
        });

        let client = Client::new(&path);
        let resp = client.send(&Message::from("bin"), &Message::from(vec![0u8]));
        assert!(!resp.is_error(), "{}", resp.as_str());
        assert_eq!(resp.as_bytes(), &[1u8]);

        let resp = client.send(&Message::from(vec![0u8]), &Message::from("Hello?"));
        assert!(!resp.is_error(), "{}", resp.as_str());
        assert_eq!(resp.as_str(), "Unix Domain Sockets!");

        let seen = srv.join().unwrap();
        assert_eq!(
            seen,
            vec![
                (b"bin".to_vec(), vec![0u8]),
                (vec![0u8], b"Hello?".to_vec()),
            ]
        );
    });
}

#[test]
fn large_payload_survives_quiet_window() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir, "big.sock");
    let config = Config::default().with_quiet(Duration::from_millis(50));
    let server = Server::with_config(&path, config);

    let payload: Vec<u8> = (0..200 * 1024).map(|i| (i % 251) as u8).collect();

    thread::scope(|s| {
        s.spawn(|| {
            server.listen(|_, message| Message::from(message.as_bytes().to_vec()))
        });

        let client = Client::with_config(&path, config);
        let resp = client.send(&Message::from("blob"), &Message::from(payload.clone()));
        assert!(!resp.is_error(), "{}", resp.as_str());
        assert_eq!(resp.size(), payload.len());
        assert_eq!(resp.as_bytes(), payload.as_slice());
    });
}

#[test]
fn one_client_shared_between_threads() {
    const SENDERS: usize = 4;

    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir, "shared.sock");
    let server = Server::new(&path);
    let client = Client::new(&path);

    thread::scope(|s| {
        s.spawn(|| {
            for _ in 0..SENDERS {
                let done = server.listen(|header, message| {
                    Message::from(format!("{}:{}", header.as_str(), message.as_str()))
                });
                assert!(!done.is_error(), "{}", done.as_str());
            }
        });

        let senders: Vec<_> = (0..SENDERS)
            .map(|i| {
                let client = &client;
                s.spawn(move || {
                    let resp = client.send(
                        &Message::from(format!("h{i}")),
                        &Message::from(format!("m{i}")),
                    );
                    assert!(!resp.is_error(), "{}", resp.as_str());
                    assert_eq!(resp.as_str(), format!("h{i}:m{i}"));
                })
            })
            .collect();
        for sender in senders {
            sender.join().unwrap();
        }
    });
}

#[test]
fn empty_response_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir, "empty.sock");
    let server = Server::new(&path);

    thread::scope(|s| {
        s.spawn(|| server.listen(|_, _| Message::empty()));

        let resp = Client::new(&path).send(&Message::from("h"), &Message::from("m"));
        assert!(!resp.is_error(), "{}", resp.as_str());
        assert!(resp.is_empty());
    });
}

#[test]
fn stop_listening_unblocks_a_waiting_listen() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir, "stop.sock");
    let server = Server::with_config(
        &path,
        Config::default().with_timeout(Duration::from_secs(10)),
    );

    thread::scope(|s| {
        let waiting = s.spawn(|| {
            let start = Instant::now();
            let done = server.listen(|_, _| unreachable!("handler called for a stop"));
            (done, start.elapsed())
        });

        thread::sleep(Duration::from_millis(100));
        assert!(server.stop_listening());

        let (done, elapsed) = waiting.join().unwrap();
        assert!(done.is_error());
        assert!(elapsed < Duration::from_secs(5));
    });
}

#[test]
fn stop_serves_clients_queued_before_it() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir, "queued.sock");
    let server = Server::new(&path);
    let client = Client::new(&path);

    thread::scope(|s| {
        let srv = s.spawn(|| {
            let mut results = Vec::new();
            for _ in 0..3 {
                let done = server.listen(|header, message| {
                    if header.as_bytes() == b"A" {
                        thread::sleep(Duration::from_millis(300));
                    }
                    Message::from(format!("{}:{}", header.as_str(), message.as_str()))
                });
                results.push(done.as_str().to_owned());
            }
            results
        });

        let first = s.spawn(|| client.send(&Message::from("A"), &Message::from("a")));
        thread::sleep(Duration::from_millis(100));
        // Connects while the handler for A is still running.
        let second = s.spawn(|| {
            Client::new(&path).send(&Message::from("B"), &Message::from("b"))
        });
        thread::sleep(Duration::from_millis(100));
        assert!(server.stop_listening());

        assert_eq!(first.join().unwrap().as_str(), "A:a");
        let second = second.join().unwrap();
        assert!(!second.is_error(), "{}", second.as_str());
        assert_eq!(second.as_str(), "B:b");
        assert_eq!(srv.join().unwrap(), ["", "", "listening stopped"]);
    });
}

#[test]
fn oversized_path_fails_both_roles_fast() {
    let long = format!("/tmp/{}.sock", "x".repeat(lipc::max_path_len()));

    let server = Server::new(&long);
    assert!(!server.is_valid());
    assert!(server.init_error().is_some());

    let start = Instant::now();
    let mut reported = None;
    let done = server.listen(|header, message| {
        assert!(header.is_error());
        reported = Some(message.as_str().to_owned());
        Message::empty()
    });
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(done.is_error());
    assert!(done.as_str().contains(&long));
    assert_eq!(reported.as_deref(), Some(done.as_str()));

    let resp = Client::new(&long).send(&Message::from("h"), &Message::from("m"));
    assert!(resp.is_error());
    assert!(resp.as_str().contains(&long));
}

#[test]
fn unanswered_header_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir, "mute.sock");
    // Bound but never listening: connect succeeds, the ACK never comes.
    let _server = Server::new(&path);

    let start = Instant::now();
    let resp = Client::with_config(&path, quick()).send(&Message::from("h"), &Message::from("m"));
    assert!(resp.is_error());
    assert!(resp.as_str().starts_with("ack recv failed"), "{}", resp.as_str());
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn peer_hangup_is_reported_to_handler() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir, "hangup.sock");
    let server = Server::with_config(&path, quick());

    let mut raw = UnixStream::connect(&path).unwrap();
    raw.write_all(b"header only").unwrap();
    drop(raw);

    let mut reports = Vec::new();
    let done = server.listen(|header, message| {
        reports.push((header.is_error(), message.is_error()));
        Message::from("ignored")
    });
    assert!(done.is_error());
    assert_eq!(reports, vec![(true, true)]);
}

#[test]
fn split_header_is_reassembled() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir, "split.sock");
    let config = Config::default().with_quiet(Duration::from_millis(300));
    let server = Server::with_config(&path, config);

    thread::scope(|s| {
        let srv = s.spawn(|| {
            let mut header = Vec::new();
            let done = server.listen(|h, _| {
                header = h.as_bytes().to_vec();
                Message::from("ok")
            });
            (done, header)
        });

        let mut raw = UnixStream::connect(&path).unwrap();
        raw.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        raw.write_all(b"hea").unwrap();
        thread::sleep(Duration::from_millis(50));
        raw.write_all(b"der").unwrap();

        let mut ack = [0u8; 1];
        raw.read_exact(&mut ack).unwrap();
        assert_eq!(ack[0], ACK);

        raw.write_all(b"payload").unwrap();
        raw.shutdown(std::net::Shutdown::Write).unwrap();
        let mut resp = Vec::new();
        raw.read_to_end(&mut resp).unwrap();
        assert_eq!(resp, b"ok");

        let (done, header) = srv.join().unwrap();
        assert!(!done.is_error(), "{}", done.as_str());
        assert_eq!(header, b"header");
    });
}

#[test]
fn stale_entry_replaced_and_socket_removed_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir, "sub/dir/stale.sock");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"left over").unwrap();

    {
        let server = Server::new(&path);
        assert!(server.is_valid(), "{:?}", server.init_error());
        assert!(std::fs::metadata(&path).unwrap().file_type().is_socket());
    }
    assert!(!path.exists());
}
