//! End-to-end tests: a compact-backed server on an ephemeral port,
//! driven with raw protocol bytes over TCP.

use riorita_server::{bind, AllowList, ServerConfig, ServerState};
use riorita_storage::{BackendKind, CacheConfig, ResultCache, Storage, StorageConfig};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const MAGIC: u8 = 0x71;
const VERSION: u8 = 1;

const PING: u8 = 1;
const HAS: u8 = 2;
const GET: u8 = 3;
const PUT: u8 = 4;
const DELETE: u8 = 5;

struct TestServer {
    addr: std::net::SocketAddr,
    _dir: TempDir,
}

async fn start_server(allowed: Option<&str>) -> TestServer {
    let dir = TempDir::new().unwrap();
    let storage = Storage::open(BackendKind::Compact, StorageConfig::new(dir.path()))
        .await
        .unwrap();
    let state = Arc::new(ServerState {
        storage,
        cache: ResultCache::new(CacheConfig::default()),
    });
    let server = bind(
        ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            allowed: allowed.map(|spec| AllowList::parse(spec).unwrap()),
        },
        state,
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    TestServer { addr, _dir: dir }
}

fn request(kind: u8, id: u64, key: &[u8], value: Option<&[u8]>) -> Vec<u8> {
    let mut body = vec![MAGIC, VERSION, kind];
    body.extend_from_slice(&id.to_le_bytes());
    body.extend_from_slice(&(key.len() as i32).to_le_bytes());
    body.extend_from_slice(key);
    if let Some(value) = value {
        body.extend_from_slice(&(value.len() as i32).to_le_bytes());
        body.extend_from_slice(value);
    }
    let mut frame = ((body.len() + 4) as i32).to_le_bytes().to_vec();
    frame.extend_from_slice(&body);
    frame
}

#[derive(Debug)]
struct Response {
    id: u64,
    success: bool,
    verdict: bool,
    value: Option<Vec<u8>>,
}

async fn read_response(stream: &mut TcpStream) -> Response {
    let mut size = [0u8; 4];
    stream.read_exact(&mut size).await.unwrap();
    let total = i32::from_le_bytes(size) as usize;
    let mut body = vec![0u8; total - 4];
    stream.read_exact(&mut body).await.unwrap();

    assert_eq!(body[0], MAGIC);
    assert_eq!(body[1], VERSION);
    let id = u64::from_le_bytes(body[2..10].try_into().unwrap());
    let success = body[10] == 1;
    let mut verdict = false;
    let mut value = None;
    if success {
        verdict = body[11] == 1;
        if body.len() > 12 {
            let len = i32::from_le_bytes(body[12..16].try_into().unwrap()) as usize;
            value = Some(body[16..16 + len].to_vec());
        }
    }
    Response {
        id,
        success,
        verdict,
        value,
    }
}

async fn roundtrip(stream: &mut TcpStream, bytes: &[u8]) -> Response {
    stream.write_all(bytes).await.unwrap();
    read_response(stream).await
}

#[tokio::test]
async fn ping() {
    let server = start_server(None).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    let response = roundtrip(&mut stream, &request(PING, 7, b"", None)).await;
    assert_eq!(response.id, 7);
    assert!(response.success);
    assert!(response.verdict);
    assert!(response.value.is_none());
}

#[tokio::test]
async fn put_then_get() {
    let server = start_server(None).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    let payload = [0xDEu8, 0xAD, 0xBE, 0xEF];
    let response = roundtrip(&mut stream, &request(PUT, 1, b"s/k", Some(&payload))).await;
    assert!(response.success && response.verdict);

    let response = roundtrip(&mut stream, &request(GET, 2, b"s/k", None)).await;
    assert_eq!(response.id, 2);
    assert!(response.success && response.verdict);
    assert_eq!(response.value.unwrap(), payload);
}

#[tokio::test]
async fn second_put_is_denied_and_value_survives() {
    let server = start_server(None).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    let response = roundtrip(&mut stream, &request(PUT, 1, b"s/k", Some(b"a"))).await;
    assert!(response.verdict);

    let response = roundtrip(&mut stream, &request(PUT, 2, b"s/k", Some(b"b"))).await;
    assert!(response.success);
    assert!(!response.verdict);

    let response = roundtrip(&mut stream, &request(GET, 3, b"s/k", None)).await;
    assert_eq!(response.value.unwrap(), b"a");
}

#[tokio::test]
async fn delete_then_has_then_reput() {
    let server = start_server(None).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    roundtrip(&mut stream, &request(PUT, 1, b"s/k", Some(b"v"))).await;

    let response = roundtrip(&mut stream, &request(DELETE, 2, b"s/k", None)).await;
    assert!(response.success && response.verdict);

    let response = roundtrip(&mut stream, &request(HAS, 3, b"s/k", None)).await;
    assert!(response.success);
    assert!(!response.verdict);

    let response = roundtrip(&mut stream, &request(PUT, 4, b"s/k", Some(b"c"))).await;
    assert!(response.verdict);

    let response = roundtrip(&mut stream, &request(GET, 5, b"s/k", None)).await;
    assert_eq!(response.value.unwrap(), b"c");
}

#[tokio::test]
async fn get_of_missing_key_is_a_miss() {
    let server = start_server(None).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    let response = roundtrip(&mut stream, &request(GET, 1, b"never/stored", None)).await;
    assert!(response.success);
    assert!(!response.verdict);
    assert!(response.value.is_none());
}

#[tokio::test]
async fn requests_interleave_across_connections() {
    let server = start_server(None).await;
    let mut first = TcpStream::connect(server.addr).await.unwrap();
    let mut second = TcpStream::connect(server.addr).await.unwrap();

    roundtrip(&mut first, &request(PUT, 1, b"s/shared", Some(b"from-first"))).await;
    let response = roundtrip(&mut second, &request(GET, 2, b"s/shared", None)).await;
    assert_eq!(response.value.unwrap(), b"from-first");
}

#[tokio::test]
async fn malformed_magic_closes_connection_without_response() {
    let server = start_server(None).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    let mut bytes = request(PING, 1, b"", None);
    bytes[4] = 0x70; // wrong magic
    stream.write_all(&bytes).await.unwrap();

    let mut buf = [0u8; 16];
    let read = stream.read(&mut buf).await.unwrap();
    assert_eq!(read, 0, "server must close without answering");
}

#[tokio::test]
async fn oversized_declared_frame_closes_connection() {
    let server = start_server(None).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    stream
        .write_all(&((1i32 << 30) + 1).to_le_bytes())
        .await
        .unwrap();

    let mut buf = [0u8; 16];
    let read = stream.read(&mut buf).await.unwrap();
    assert_eq!(read, 0);
}

#[tokio::test]
async fn undersized_declared_frame_closes_connection() {
    let server = start_server(None).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    stream.write_all(&5i32.to_le_bytes()).await.unwrap();

    let mut buf = [0u8; 16];
    let read = stream.read(&mut buf).await.unwrap();
    assert_eq!(read, 0);
}

#[tokio::test]
async fn allow_list_rejects_peer_before_reading() {
    // 203.0.113.0/24 never matches a loopback peer.
    let server = start_server(Some("203.0.113.0/24")).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    // The connection is dropped whether or not we manage to write.
    let _ = stream.write_all(&request(PING, 1, b"", None)).await;
    let mut buf = [0u8; 16];
    match stream.read(&mut buf).await {
        Ok(0) => {}
        Ok(n) => panic!("expected closed connection, read {} bytes", n),
        Err(_) => {}
    }
}

#[tokio::test]
async fn allow_list_admits_loopback() {
    let server = start_server(Some("127.0.0.0/8")).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let response = roundtrip(&mut stream, &request(PING, 1, b"", None)).await;
    assert!(response.verdict);
}

#[tokio::test]
async fn values_survive_server_restart() {
    let dir = TempDir::new().unwrap();

    let start = |root: std::path::PathBuf| async move {
        let storage = Storage::open(BackendKind::Compact, StorageConfig::new(root))
            .await
            .unwrap();
        let state = Arc::new(ServerState {
            storage,
            cache: ResultCache::new(CacheConfig::default()),
        });
        let server = bind(
            ServerConfig {
                bind_addr: "127.0.0.1:0".parse().unwrap(),
                allowed: None,
            },
            state,
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        (addr, tokio::spawn(server.run()))
    };

    let (addr, handle) = start(dir.path().to_path_buf()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    roundtrip(&mut stream, &request(PUT, 1, b"s/k", Some(b"durable"))).await;
    drop(stream);
    handle.abort();

    let (addr, _handle) = start(dir.path().to_path_buf()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let response = roundtrip(&mut stream, &request(GET, 2, b"s/k", None)).await;
    assert!(response.verdict);
    assert_eq!(response.value.unwrap(), b"durable");
}
