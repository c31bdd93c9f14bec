//! End-to-end tests: a real server on loopback, driven by the client library
//! or by raw control frames.

use std::fs;
use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream, UdpSocket};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ferry_client::{ClientConfig, ClientError, ControlClient, Downloads};
use ferry_server::{CatalogEntry, DirCatalog, FileCatalog, Server, ServerConfig, ServerError};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("ferry_server=debug,ferry_transfer=debug,ferry_client=debug")
        .try_init();
}

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("ferry-it-{}-{}", std::process::id(), tag));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

struct Harness {
    server: Arc<Server>,
    thread: Option<JoinHandle<Result<(), ServerError>>>,
    root: PathBuf,
}

impl Harness {
    fn start(tag: &str, catalog: Option<Arc<dyn FileCatalog>>) -> Self {
        Self::start_with_workers(tag, catalog, 4)
    }

    fn start_with_workers(
        tag: &str,
        catalog: Option<Arc<dyn FileCatalog>>,
        workers: usize,
    ) -> Self {
        init_tracing();
        let root = temp_dir(tag);
        let share = root.join("share");
        fs::create_dir_all(&share).unwrap();

        let config = ServerConfig {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            tcp_port: 0,
            udp_port: 0,
            share_dir: share.clone(),
            workers,
            slots: 8,
            ack_timeout: Duration::from_millis(200),
            max_retries: 0,
            advertise_addr: None,
        };
        let catalog = catalog.unwrap_or_else(|| Arc::new(DirCatalog::new(share)));
        let server = Arc::new(Server::bind(config, catalog).unwrap());
        let runner = server.clone();
        let thread = thread::spawn(move || runner.run());
        Self {
            server,
            thread: Some(thread),
            root,
        }
    }

    fn share(&self) -> PathBuf {
        self.root.join("share")
    }

    fn addr(&self) -> SocketAddr {
        self.server.local_addr().unwrap()
    }

    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            server: self.addr(),
            client_addr: "127.0.0.1:0".parse().unwrap(),
            download_dir: self.root.join("downloads"),
            idle_timeout: Some(Duration::from_secs(10)),
            linger: Duration::from_millis(300),
        }
    }

    fn stop(&mut self) -> Result<(), ServerError> {
        self.server.shutdown();
        match self.thread.take() {
            Some(thread) => thread.join().unwrap(),
            None => Ok(()),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = self.stop();
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

#[test]
fn downloads_a_three_chunk_file() {
    let harness = Harness::start("three-chunks", None);
    let data = pattern(2500, 1);
    fs::write(harness.share().join("report.bin"), &data).unwrap();

    let mut control = ControlClient::connect(harness.addr()).unwrap();
    let downloads = Downloads::new(harness.client_config());
    let session_id = downloads.start(&mut control, "report.bin").unwrap();
    assert_eq!(session_id, 1);

    let results = downloads.wait_all();
    assert_eq!(results.len(), 1);
    let report = results.into_iter().next().unwrap().1.unwrap();
    assert_eq!(report.bytes_written, 2500);
    assert_eq!(report.chunks, 3);

    let written = fs::read(harness.root.join("downloads").join("report.bin")).unwrap();
    assert_eq!(written, data);
    control.quit().unwrap();
}

#[test]
fn empty_file_downloads_as_empty() {
    let harness = Harness::start("empty", None);
    fs::write(harness.share().join("empty.txt"), b"").unwrap();

    let mut control = ControlClient::connect(harness.addr()).unwrap();
    let downloads = Downloads::new(harness.client_config());
    downloads.start(&mut control, "empty.txt").unwrap();

    let report = downloads.wait_all().remove(0).1.unwrap();
    assert_eq!(report.bytes_written, 0);
    assert_eq!(report.chunks, 0);
    let written = fs::read(harness.root.join("downloads").join("empty.txt")).unwrap();
    assert!(written.is_empty());
}

#[test]
fn concurrent_sessions_stay_separate() {
    let harness = Harness::start("concurrent", None);
    let files = [
        ("one.bin", pattern(3000, 11)),
        ("two.bin", pattern(4100, 99)),
        ("three.bin", pattern(1024, 5)),
    ];
    for (name, data) in &files {
        fs::write(harness.share().join(name), data).unwrap();
    }

    let mut control = ControlClient::connect(harness.addr()).unwrap();
    let downloads = Downloads::new(harness.client_config());
    let mut ids = Vec::new();
    for (name, _) in &files {
        ids.push(downloads.start(&mut control, name).unwrap());
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 3, "session ids must be distinct");

    for (_, result) in downloads.wait_all() {
        result.unwrap();
    }
    for (name, data) in &files {
        let written = fs::read(harness.root.join("downloads").join(name)).unwrap();
        assert_eq!(&written, data, "{} differs", name);
    }
}

#[test]
fn missing_file_gets_download_error_and_session_continues() {
    let harness = Harness::start("missing", None);
    fs::write(harness.share().join("present.txt"), b"here").unwrap();

    let mut control = ControlClient::connect(harness.addr()).unwrap();
    let endpoint = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 45999);
    let err = control.request_download("absent.txt", endpoint).unwrap_err();
    assert!(matches!(err, ClientError::FileNotFound(ref name) if name == "absent.txt"));

    let err = control.request_download("../share/present.txt", endpoint).unwrap_err();
    assert!(matches!(err, ClientError::FileNotFound(_)));

    // Back in the command loop after an error.
    assert_eq!(control.list_files().unwrap(), vec!["present.txt"]);
}

#[test]
fn client_refuses_path_names_before_asking() {
    let harness = Harness::start("client-refuses", None);
    let mut control = ControlClient::connect(harness.addr()).unwrap();
    let downloads = Downloads::new(harness.client_config());
    let err = downloads.start(&mut control, "../etc/passwd").unwrap_err();
    assert!(matches!(err, ClientError::InvalidFilename(_)));
    assert!(!harness.root.join("etc").exists());
}

struct FixedCatalog(Vec<String>);

impl FileCatalog for FixedCatalog {
    fn list(&self) -> std::io::Result<Vec<String>> {
        Ok(self.0.clone())
    }

    fn lookup(&self, _name: &str) -> Option<CatalogEntry> {
        None
    }
}

#[test]
fn list_response_matches_wire_layout() {
    let catalog = Arc::new(FixedCatalog(vec!["a.txt".into(), "bb.dat".into()]));
    let harness = Harness::start("list-wire", Some(catalog));

    let mut stream = TcpStream::connect(harness.addr()).unwrap();
    stream.write_all(&[0x04]).unwrap();
    let mut frame = [0u8; 26];
    stream.read_exact(&mut frame).unwrap();

    assert_eq!(frame[0], 0x05);
    assert_eq!(u16::from_be_bytes([frame[1], frame[2]]), 2);
    assert_eq!(u32::from_be_bytes(frame[3..7].try_into().unwrap()), 19);
    assert_eq!(&frame[7..11], &5u32.to_be_bytes());
    assert_eq!(&frame[11..16], b"a.txt");
    assert_eq!(&frame[16..20], &6u32.to_be_bytes());
    assert_eq!(&frame[20..26], b"bb.dat");

    // Catalog order, not sorted order.
    let catalog = Arc::new(FixedCatalog(vec!["z".into(), "a".into()]));
    let harness = Harness::start("list-order", Some(catalog));
    let mut control = ControlClient::connect(harness.addr()).unwrap();
    assert_eq!(control.list_files().unwrap(), vec!["z", "a"]);
}

#[test]
fn oversized_listing_is_truncated_and_worker_survives() {
    let names: Vec<String> = (0..65_536).map(|i| format!("file-{:05}", i)).collect();
    let catalog = Arc::new(FixedCatalog(names.clone()));
    let harness = Harness::start_with_workers("huge-list", Some(catalog), 1);

    let mut first = ControlClient::connect(harness.addr()).unwrap();
    let listed = first.list_files().unwrap();
    assert_eq!(listed.len(), u16::MAX as usize);
    assert_eq!(listed[..], names[..u16::MAX as usize]);
    first.quit().unwrap();

    // The single worker is still there to serve the next client.
    let mut second = ControlClient::connect(harness.addr()).unwrap();
    assert_eq!(second.list_files().unwrap().len(), u16::MAX as usize);
    let ctx = harness.server.context().clone();
    second.quit().unwrap();
    assert!(wait_until(Duration::from_secs(2), || ctx.client_count() == 0));
}

#[test]
fn malformed_frame_closes_the_connection() {
    let harness = Harness::start("malformed", Some(Arc::new(FixedCatalog(vec!["x".into()]))));
    let mut stream = TcpStream::connect(harness.addr()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(3))).unwrap();

    // Download request declaring a 5000-byte name, past the 4096 limit.
    let mut frame = vec![0x02, 127, 0, 0, 1, 0, 80];
    frame.extend_from_slice(&5000u32.to_be_bytes());
    stream.write_all(&frame).unwrap();

    let mut buf = [0u8; 16];
    assert_eq!(stream.read(&mut buf).unwrap(), 0, "expected the server to close");
    let ctx = harness.server.context().clone();
    assert!(wait_until(Duration::from_secs(2), || ctx.client_count() == 0));
}

#[test]
fn unknown_command_is_discarded() {
    let harness = Harness::start("unknown", Some(Arc::new(FixedCatalog(vec!["x".into()]))));
    let mut stream = TcpStream::connect(harness.addr()).unwrap();
    stream.write_all(&[0x7f]).unwrap();
    thread::sleep(Duration::from_millis(50));
    stream.write_all(&[0x04]).unwrap();

    let mut frame = [0u8; 12];
    stream.read_exact(&mut frame).unwrap();
    assert_eq!(frame[0], 0x05);
    assert_eq!(&frame[11..], b"x");
}

#[test]
fn busy_endpoint_is_refused() {
    let harness = Harness::start("busy", None);
    fs::write(harness.share().join("slow.bin"), pattern(4096, 3)).unwrap();

    // Never acks, so the first transfer stays in flight.
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let endpoint = match silent.local_addr().unwrap() {
        SocketAddr::V4(v4) => v4,
        SocketAddr::V6(_) => unreachable!(),
    };

    let mut control = ControlClient::connect(harness.addr()).unwrap();
    let offer = control.request_download("slow.bin", endpoint).unwrap();
    assert_eq!(offer.file_size, 4096);
    assert_eq!(offer.server_addr, harness.server.udp_addr().unwrap());

    let err = control.request_download("slow.bin", endpoint).unwrap_err();
    assert!(matches!(err, ClientError::FileNotFound(_)));
}

#[test]
fn unspecified_client_address_uses_peer_ip() {
    let harness = Harness::start("unspecified", None);
    fs::write(harness.share().join("tiny.txt"), b"tiny").unwrap();

    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let port = receiver.local_addr().unwrap().port();

    let mut control = ControlClient::connect(harness.addr()).unwrap();
    let offer = control
        .request_download("tiny.txt", SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
        .unwrap();

    let mut buf = [0u8; 64];
    let (n, from) = receiver.recv_from(&mut buf).unwrap();
    assert_eq!(from, offer.server_addr);
    assert_eq!(n, 20 + 4);
    assert_eq!(&buf[20..24], b"tiny");
    receiver.send_to(&1u32.to_be_bytes(), from).unwrap();
}

#[test]
fn quit_ends_the_session() {
    let harness = Harness::start("quit", None);
    let control = ControlClient::connect(harness.addr()).unwrap();
    let ctx = harness.server.context().clone();
    assert!(wait_until(Duration::from_secs(2), || ctx.client_count() == 1));

    control.quit().unwrap();
    assert!(wait_until(Duration::from_secs(2), || ctx.client_count() == 0));
}

#[test]
fn shutdown_unblocks_idle_clients_and_transfers() {
    let mut harness = Harness::start("shutdown", None);
    fs::write(harness.share().join("stuck.bin"), pattern(2048, 8)).unwrap();

    let _idle = TcpStream::connect(harness.addr()).unwrap();
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let endpoint = match silent.local_addr().unwrap() {
        SocketAddr::V4(v4) => v4,
        SocketAddr::V6(_) => unreachable!(),
    };
    let mut control = ControlClient::connect(harness.addr()).unwrap();
    control.request_download("stuck.bin", endpoint).unwrap();

    let ctx = harness.server.context().clone();
    assert!(wait_until(Duration::from_secs(2), || ctx.transfers().active() == 1));

    let started = Instant::now();
    harness.stop().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(ctx.transfers().active(), 0);
    assert_eq!(ctx.router().active_routes(), 0);
}
