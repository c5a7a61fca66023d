use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use waypost::auth::{CredentialStore, Secret};
use waypost::config::Config;
use waypost::filter::{self, Filter, ForwardFilter, HttpFilter, ParseFilter, TunnelFilter};
use waypost::proxy::{Dispatcher, LocalAddrs};
use waypost::server::listener::ListenAddr;
use waypost::server::pool::WorkerPool;
use waypost::server::{Server, Worker};

const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

fn relay_chain() -> Vec<Filter> {
    vec![Filter::Parse(ParseFilter::new(vec![
        HttpFilter::Tunnel(TunnelFilter::new(Dispatcher::default())),
        HttpFilter::Forward(ForwardFilter::new(Dispatcher::default())),
    ]))]
}

fn relay_server(pool_size: usize) -> Server {
    Server::new(WorkerPool::new(pool_size, |id| Worker::new(id, relay_chain())))
}

fn tcp_addr(addr: &ListenAddr) -> String {
    match addr {
        ListenAddr::Tcp(addr) => addr.clone(),
        other => panic!("expected a TCP address, got {}", other),
    }
}

fn loopback() -> ListenAddr {
    ListenAddr::Tcp("127.0.0.1:0".to_string())
}

/// Upstream that accepts connections and keeps them open without answering.
async fn hold_open_upstream() -> (u16, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    (port, handle)
}

async fn open_tunnel(proxy: &str, port: u16) -> TcpStream {
    let mut client = TcpStream::connect(proxy).await.unwrap();
    let request = format!("CONNECT 127.0.0.1:{port} HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\n\r\n");
    client.write_all(request.as_bytes()).await.unwrap();
    client
}

async fn read_status(client: &mut TcpStream) -> Vec<u8> {
    let mut status = vec![0u8; CONNECTION_ESTABLISHED.len()];
    client.read_exact(&mut status).await.unwrap();
    status
}

#[tokio::test]
async fn test_server_answers_health_check_from_config() {
    let cfg = Config::from_yaml(
        "server:\n  listeners: [\"127.0.0.1:0\"]\nworker:\n  pool_size: 2\nfilters:\n  healthcheck:\n    enabled: true\n",
    )
    .unwrap();
    let credentials = Arc::new(CredentialStore::new());
    let local_addrs = LocalAddrs::new();
    let pool = WorkerPool::new(cfg.worker.pool_size, |id| {
        Worker::new(id, filter::chain_from_config(&cfg, credentials.clone(), &local_addrs))
    });
    assert_eq!(pool.capacity(), 2);

    let mut server = Server::new(pool).read_timeout(cfg.read_timeout());
    let addr = server.listen(&cfg.listen_addrs().unwrap()[0]).await.unwrap();

    let mut client = TcpStream::connect(tcp_addr(&addr)).await.unwrap();
    client.write_all(b"GET /healthz HTTP/1.1\r\nHost: proxy\r\n\r\n").await.unwrap();
    let mut response = String::new();
    client.read_to_string(&mut response).await.unwrap();

    assert_eq!(response, "HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nOK\n");
    server.close().await;
}

#[tokio::test]
async fn test_full_pool_stalls_new_connections() {
    let (upstream_port, upstream) = hold_open_upstream().await;

    let mut server = relay_server(2).shutdown_timeout(Duration::from_millis(100));
    let addr = tcp_addr(&server.listen(&loopback()).await.unwrap());

    let mut first = open_tunnel(&addr, upstream_port).await;
    assert_eq!(read_status(&mut first).await, CONNECTION_ESTABLISHED);
    let mut second = open_tunnel(&addr, upstream_port).await;
    assert_eq!(read_status(&mut second).await, CONNECTION_ESTABLISHED);
    assert_eq!(server.pool().available(), 0);

    // Every worker is busy, so the third request is not answered.
    let mut third = open_tunnel(&addr, upstream_port).await;
    let mut status = vec![0u8; CONNECTION_ESTABLISHED.len()];
    let stalled = tokio::time::timeout(Duration::from_millis(200), third.read_exact(&mut status)).await;
    assert!(stalled.is_err(), "third connection was served while the pool was full");

    // Ending the first tunnel frees its worker for the waiting connection.
    drop(first);
    tokio::time::timeout(Duration::from_secs(5), third.read_exact(&mut status))
        .await
        .expect("third connection still waiting for a worker")
        .unwrap();
    assert_eq!(status, CONNECTION_ESTABLISHED);

    server.close().await;
    upstream.abort();
}

#[tokio::test]
async fn test_close_waits_for_in_flight_requests() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = upstream.local_addr().unwrap().port();
    let (accepted_tx, accepted_rx) = oneshot::channel();
    let origin = tokio::spawn(async move {
        let (mut socket, _) = upstream.accept().await.unwrap();
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "upstream closed before the head arrived");
            head.extend_from_slice(&buf[..n]);
        }
        accepted_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nslow")
            .await
            .unwrap();
    });

    let mut server = relay_server(1).shutdown_timeout(Duration::from_secs(5));
    let addr = tcp_addr(&server.listen(&loopback()).await.unwrap());

    let mut client = TcpStream::connect(&addr).await.unwrap();
    let request = format!("GET http://127.0.0.1:{port}/ HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\n\r\n");
    client.write_all(request.as_bytes()).await.unwrap();
    accepted_rx.await.unwrap();
    assert_eq!(server.in_flight(), 1);

    let closing = tokio::spawn(server.close());

    let mut response = String::new();
    client.read_to_string(&mut response).await.unwrap();
    assert_eq!(response, "HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nslow");

    closing.await.unwrap();
    origin.await.unwrap();
    assert!(TcpStream::connect(&addr).await.is_err(), "listener still accepting after close");
}

#[tokio::test]
async fn test_close_aborts_relays_after_timeout() {
    let (upstream_port, upstream) = hold_open_upstream().await;

    let mut server = relay_server(1).shutdown_timeout(Duration::from_millis(100));
    let addr = tcp_addr(&server.listen(&loopback()).await.unwrap());

    let mut client = open_tunnel(&addr, upstream_port).await;
    assert_eq!(read_status(&mut client).await, CONNECTION_ESTABLISHED);

    tokio::time::timeout(Duration::from_secs(5), server.close())
        .await
        .expect("close did not abort the open tunnel");

    // The aborted worker closed the client side.
    let mut rest = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);
    upstream.abort();
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_listener_serves_and_removes_socket() {
    use tokio::net::UnixStream;
    use waypost::filter::HealthCheckFilter;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("waypost.sock");

    let pool = WorkerPool::new(1, |id| {
        let mut chain = vec![Filter::HealthCheck(HealthCheckFilter::new("GET", "/healthz"))];
        chain.extend(relay_chain());
        Worker::new(id, chain)
    });
    let mut server = Server::new(pool);
    let addr = server.listen(&ListenAddr::Unix(path.clone())).await.unwrap();
    assert_eq!(addr, ListenAddr::Unix(path.clone()));
    assert!(path.exists());

    let mut client = UnixStream::connect(&path).await.unwrap();
    client.write_all(b"GET /healthz HTTP/1.1\r\n\r\n").await.unwrap();
    let mut response = String::new();
    client.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));

    server.close().await;
    assert!(!path.exists());
}

/// Starts a server built from `yaml` the way `serve` builds it.
async fn server_from_config(yaml: &str) -> (Server, String) {
    let cfg = Config::from_yaml(yaml).unwrap();
    let credentials: CredentialStore = cfg
        .filters
        .auth
        .users
        .iter()
        .map(|(user, pass)| (user.clone(), Secret::Plaintext(pass.clone())))
        .collect();
    let credentials = Arc::new(credentials);
    let local_addrs = LocalAddrs::new();
    let pool = WorkerPool::new(cfg.worker.pool_size, |id| {
        Worker::new(id, filter::chain_from_config(&cfg, credentials.clone(), &local_addrs))
    });

    let mut server = Server::new(pool).local_addrs(local_addrs);
    let addr = server.listen(&cfg.listen_addrs().unwrap()[0]).await.unwrap();
    (server, tcp_addr(&addr))
}

async fn exchange(proxy: &str, request: &str) -> String {
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_string(&mut response))
        .await
        .expect("no response from proxy")
        .unwrap();
    response
}

#[tokio::test]
async fn test_requests_to_own_listener_are_refused() {
    let (server, addr) =
        server_from_config("server:\n  listeners: [\"127.0.0.1:0\"]\nworker:\n  pool_size: 1\n").await;

    let response = exchange(&addr, &format!("GET http://{addr}/ HTTP/1.1\r\nHost: {addr}\r\n\r\n")).await;
    assert!(response.starts_with("HTTP/1.1 508 Loop Detected\r\n"), "{}", response);

    let response = exchange(&addr, &format!("CONNECT {addr} HTTP/1.1\r\nHost: {addr}\r\n\r\n")).await;
    assert!(response.starts_with("HTTP/1.1 508 Loop Detected\r\n"), "{}", response);

    // The single worker is still free for ordinary traffic.
    let response = exchange(&addr, "GET /nohost HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{}", response);
    server.close().await;
}

#[tokio::test]
async fn test_wildcard_listener_refuses_loopback_target() {
    let (server, addr) =
        server_from_config("server:\n  listeners: [\"0.0.0.0:0\"]\nworker:\n  pool_size: 2\n").await;
    let port = addr.rsplit_once(':').unwrap().1;
    let loopback = format!("127.0.0.1:{port}");

    let response = exchange(&loopback, &format!("CONNECT {loopback} HTTP/1.1\r\n\r\n")).await;
    assert!(response.starts_with("HTTP/1.1 508 Loop Detected\r\n"), "{}", response);
    server.close().await;
}

#[tokio::test]
async fn test_configured_auth_realm_in_challenge() {
    let yaml = "server:\n  listeners: [\"127.0.0.1:0\"]\nworker:\n  pool_size: 1\n  connect_timeout: 1\n\
                filters:\n  auth:\n    enabled: true\n    realm: corp\n    users:\n      alice: wonderland\n";
    let (server, addr) = server_from_config(yaml).await;

    let response = exchange(&addr, "CONNECT example.com:443 HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 407 "), "{}", response);
    assert!(response.contains("Proxy-Authenticate: Basic realm=\"corp\"\r\n"), "{}", response);
    server.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_listener_replaces_stale_socket_only() {
    let dir = tempfile::tempdir().unwrap();

    let stale = dir.path().join("stale.sock");
    drop(std::os::unix::net::UnixListener::bind(&stale).unwrap());
    assert!(stale.exists());
    let mut server = relay_server(1);
    server.listen(&ListenAddr::Unix(stale.clone())).await.unwrap();
    server.close().await;

    let regular = dir.path().join("waypost.sock");
    std::fs::write(&regular, "keep me").unwrap();
    let mut server = relay_server(1);
    let err = server.listen(&ListenAddr::Unix(regular.clone())).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
    assert_eq!(std::fs::read_to_string(&regular).unwrap(), "keep me");
    server.close().await;
}
