//! End-to-end tests over real TCP sockets: connect, rename, private and
//! global messages, and every way a session can end.

use std::net::SocketAddr;
use std::time::Duration;

use line_chat::{ChatServer, Logger, ServerConfig, SessionRegistry};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::broadcast;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(150);

struct TestServer {
    addr: SocketAddr,
    registry: SessionRegistry,
    _shutdown: broadcast::Sender<()>,
}

/// Start a server on a random local port.
async fn start_server(atomic_rename: bool) -> TestServer {
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        atomic_rename,
        ..ServerConfig::default()
    };
    let server = ChatServer::bind(config, Logger).await.expect("bind");
    let addr = server.local_addr().expect("local addr");
    let registry = server.registry();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(server.serve(shutdown_rx));

    TestServer {
        addr,
        registry,
        _shutdown: shutdown_tx,
    }
}

struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    /// Connect and consume the welcome line, returning the assigned name.
    async fn connect(server: &TestServer) -> (Self, String) {
        let stream = TcpStream::connect(server.addr).await.expect("connect");
        let (reader, writer) = stream.into_split();
        let mut client = TestClient {
            lines: BufReader::new(reader).lines(),
            writer,
        };

        let welcome = client.recv().await;
        let name = welcome
            .strip_prefix("Welcome. Your temporary username is '")
            .and_then(|rest| rest.strip_suffix("'."))
            .unwrap_or_else(|| panic!("unexpected welcome: {welcome}"))
            .to_string();
        (client, name)
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("send");
    }

    async fn recv(&mut self) -> String {
        timeout(WAIT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .expect("read failed")
            .expect("connection closed")
    }

    /// Nothing arrives within a short window.
    async fn assert_silent(&mut self) {
        if let Ok(Ok(Some(line))) = timeout(QUIET, self.lines.next_line()).await {
            panic!("unexpected line: {line}");
        }
    }

    /// The server closes the connection.
    async fn assert_closed(&mut self) {
        let next = timeout(WAIT, self.lines.next_line())
            .await
            .expect("timed out waiting for close");
        assert!(matches!(next, Ok(None) | Err(_)), "expected EOF, got {next:?}");
    }
}

async fn wait_for_identities(registry: &SessionRegistry, expected: &[&str]) {
    let expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let names = registry.identities().await;
        if names == expected {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("registry holds {names:?}, expected {expected:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn rename_private_and_global_scenario() {
    let server = start_server(false).await;

    let (mut a, a_name) = TestClient::connect(&server).await;
    assert_eq!(a_name, "usuario1");
    let (mut b, b_name) = TestClient::connect(&server).await;
    assert_eq!(b_name, "usuario2");
    assert_eq!(a.recv().await, "usuario2 has joined the chat.");

    a.send("change-userName alice").await;
    assert_eq!(a.recv().await, "Your name is now: alice");
    assert_eq!(b.recv().await, "User usuario1 is now known as alice");
    wait_for_identities(&server.registry, &["alice", "usuario2"]).await;

    b.send("send-msg alice hello").await;
    assert_eq!(a.recv().await, "[private from usuario2]: hello");
    assert_eq!(b.recv().await, "Message sent to alice: hello");

    b.send("global-msg hi all").await;
    assert_eq!(a.recv().await, "[usuario2]: hi all");
    assert_eq!(b.recv().await, "Global message sent.");

    a.assert_silent().await;
    b.assert_silent().await;
}

#[tokio::test]
async fn global_reaches_everyone_but_the_sender() {
    let server = start_server(false).await;
    let (mut a, _) = TestClient::connect(&server).await;
    let (mut b, _) = TestClient::connect(&server).await;
    let (mut c, _) = TestClient::connect(&server).await;
    assert_eq!(a.recv().await, "usuario2 has joined the chat.");
    assert_eq!(a.recv().await, "usuario3 has joined the chat.");
    assert_eq!(b.recv().await, "usuario3 has joined the chat.");

    a.send("global-msg   spaced   out ").await;
    assert_eq!(a.recv().await, "Global message sent.");
    assert_eq!(b.recv().await, "[usuario1]: spaced   out ");
    assert_eq!(c.recv().await, "[usuario1]: spaced   out ");
    a.assert_silent().await;
}

#[tokio::test]
async fn rename_conflict_leaves_both_names() {
    for atomic in [false, true] {
        let server = start_server(atomic).await;
        let (mut a, _) = TestClient::connect(&server).await;
        let (mut b, _) = TestClient::connect(&server).await;
        assert_eq!(a.recv().await, "usuario2 has joined the chat.");

        a.send("change-userName alice").await;
        assert_eq!(a.recv().await, "Your name is now: alice");
        assert_eq!(b.recv().await, "User usuario1 is now known as alice");

        b.send("change-userName alice").await;
        assert_eq!(b.recv().await, "The name 'alice' is already in use.");
        a.assert_silent().await;
        wait_for_identities(&server.registry, &["alice", "usuario2"]).await;
    }
}

#[tokio::test]
async fn rename_to_own_name_is_confirmed() {
    let server = start_server(false).await;
    let (mut a, _) = TestClient::connect(&server).await;

    a.send("change-userName usuario1").await;
    assert_eq!(a.recv().await, "Your name is now: usuario1");
    wait_for_identities(&server.registry, &["usuario1"]).await;
}

#[tokio::test]
async fn private_to_unknown_user() {
    let server = start_server(false).await;
    let (mut a, _) = TestClient::connect(&server).await;
    let (mut b, _) = TestClient::connect(&server).await;
    assert_eq!(a.recv().await, "usuario2 has joined the chat.");

    a.send("send-msg ghost are you there").await;
    assert_eq!(a.recv().await, "User not found: ghost");
    a.assert_silent().await;
    b.assert_silent().await;
}

#[tokio::test]
async fn protocol_errors_keep_the_session_open() {
    let server = start_server(false).await;
    let (mut a, _) = TestClient::connect(&server).await;

    a.send("dance").await;
    assert_eq!(
        a.recv().await,
        "Command not recognized. Use: change-userName, send-msg, global-msg, salir"
    );
    a.send("change-userName").await;
    assert_eq!(a.recv().await, "Usage: change-userName <newName>");
    a.send("change-userName two words").await;
    assert_eq!(a.recv().await, "Invalid name. Avoid spaces.");
    a.send("send-msg usuario1").await;
    assert_eq!(a.recv().await, "Usage: send-msg <targetUser> <message>");
    a.send("global-msg").await;
    assert_eq!(a.recv().await, "Usage: global-msg <message>");

    a.send("send-msg usuario1 note to self").await;
    assert_eq!(a.recv().await, "[private from usuario1]: note to self");
    assert_eq!(a.recv().await, "Message sent to usuario1: note to self");
    wait_for_identities(&server.registry, &["usuario1"]).await;
}

#[tokio::test]
async fn salir_closes_and_announces_once() {
    let server = start_server(false).await;
    let (mut a, _) = TestClient::connect(&server).await;
    let (mut b, _) = TestClient::connect(&server).await;
    assert_eq!(a.recv().await, "usuario2 has joined the chat.");

    a.send("SALIR").await;
    a.assert_closed().await;
    assert_eq!(b.recv().await, "usuario1 has left the chat.");
    b.assert_silent().await;
    wait_for_identities(&server.registry, &["usuario2"]).await;
}

#[tokio::test]
async fn eof_is_a_disconnect() {
    let server = start_server(false).await;
    let (mut a, _) = TestClient::connect(&server).await;
    let (b, _) = TestClient::connect(&server).await;
    assert_eq!(a.recv().await, "usuario2 has joined the chat.");

    drop(b);
    assert_eq!(a.recv().await, "usuario2 has left the chat.");
    a.assert_silent().await;
    wait_for_identities(&server.registry, &["usuario1"]).await;
}

#[tokio::test]
async fn renamed_session_leaves_under_its_new_name() {
    let server = start_server(false).await;
    let (mut a, _) = TestClient::connect(&server).await;
    let (mut b, _) = TestClient::connect(&server).await;
    assert_eq!(a.recv().await, "usuario2 has joined the chat.");

    b.send("change-userName bob").await;
    assert_eq!(b.recv().await, "Your name is now: bob");
    assert_eq!(a.recv().await, "User usuario2 is now known as bob");

    b.send("salir").await;
    assert_eq!(a.recv().await, "bob has left the chat.");
    wait_for_identities(&server.registry, &["usuario1"]).await;
}

#[tokio::test]
async fn default_names_are_never_reused() {
    let server = start_server(false).await;
    let (a, a_name) = TestClient::connect(&server).await;
    assert_eq!(a_name, "usuario1");
    drop(a);
    wait_for_identities(&server.registry, &[]).await;

    let (_b, b_name) = TestClient::connect(&server).await;
    assert_eq!(b_name, "usuario2");
}

#[tokio::test]
async fn default_name_skips_a_claimed_one() {
    let server = start_server(false).await;
    let (mut a, _) = TestClient::connect(&server).await;

    a.send("change-userName usuario2").await;
    assert_eq!(a.recv().await, "Your name is now: usuario2");

    let (_b, b_name) = TestClient::connect(&server).await;
    assert_eq!(b_name, "usuario3");
    assert_eq!(a.recv().await, "usuario3 has joined the chat.");
    wait_for_identities(&server.registry, &["usuario2", "usuario3"]).await;
}
