use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

use piazza::notify::NotificationService;
use piazza::proto::{write_frame, FrameReader, Operation, Reply, Request, Status};
use piazza::server::{Dispatcher, Server};
use piazza::store::Store;

struct Harness {
    addr: SocketAddr,
    store: Arc<Store>,
    _stop: watch::Sender<bool>,
}

async fn spawn_server() -> Harness {
    let store = Arc::new(Store::new(4));
    let beacon: SocketAddr = "127.0.0.1:9".parse().unwrap();
    let notifications = Arc::new(NotificationService::new(Arc::clone(&store), beacon));
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&store), notifications));
    let server = Server::bind("127.0.0.1:0".parse().unwrap(), dispatcher, 2)
        .await
        .expect("bind test server");
    let addr = server.local_addr().unwrap();
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(server.run(stop_rx));
    Harness {
        addr,
        store,
        _stop: stop_tx,
    }
}

struct Client {
    frames: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (reader, writer) = stream.into_split();
        Self {
            frames: FrameReader::new(reader),
            writer,
        }
    }

    async fn send(&mut self, op: Operation, user: &str, args: &[&str]) -> Reply {
        write_frame(&mut self.writer, &Request::encode(op, user, args))
            .await
            .expect("write request");
        let payload = timeout(Duration::from_secs(5), self.frames.next())
            .await
            .expect("reply within deadline")
            .expect("read reply")
            .expect("connection stayed open");
        Reply::decode(&payload).expect("decodable reply")
    }

    /// Next raw frame; used for event pushes, which are not replies.
    async fn next_frame(&mut self) -> String {
        timeout(Duration::from_secs(5), self.frames.next())
            .await
            .expect("frame within deadline")
            .expect("read frame")
            .expect("connection stayed open")
    }

    async fn sign_up(&mut self, user: &str) {
        let reply = self.send(Operation::Register, user, &["pw", "tech"]).await;
        assert_eq!(reply.status, Status::Success, "{:?}", reply);
        let reply = self.send(Operation::Login, user, &["pw"]).await;
        assert_eq!(reply.status, Status::Success, "{:?}", reply);
    }
}

#[tokio::test]
async fn register_login_post_vote_feed_roundtrip() {
    let harness = spawn_server().await;

    let mut alice = Client::connect(harness.addr).await;
    alice.sign_up("alice").await;
    let mut bob = Client::connect(harness.addr).await;
    bob.sign_up("bob").await;

    let reply = bob.send(Operation::Follow, "bob", &["alice"]).await;
    assert_eq!(reply.status, Status::Success);

    let reply = alice
        .send(Operation::CreatePost, "alice", &["Hi", "World"])
        .await;
    assert_eq!(reply.status, Status::Success);
    assert_eq!(reply.data, "1");

    let reply = bob.send(Operation::Vote, "bob", &["1", "+1"]).await;
    assert_eq!(reply.status, Status::Success);
    let reply = bob.send(Operation::Vote, "bob", &["1", "+1"]).await;
    assert_eq!(reply.status, Status::DuplicateVote);

    let reply = bob.send(Operation::Feed, "bob", &[]).await;
    assert_eq!(reply.status, Status::Success);
    assert_eq!(reply.data, "1:alice:Hi");

    let reply = alice.send(Operation::Blog, "alice", &[]).await;
    assert_eq!(reply.status, Status::Success);
    assert_eq!(reply.data, "1:alice:Hi");

    // Discovery rides on the shared registration tag.
    let reply = bob.send(Operation::Discover, "bob", &[]).await;
    assert_eq!(reply.status, Status::Success);
    assert_eq!(reply.data, "alice");
}

#[tokio::test]
async fn follow_events_are_pushed_to_the_live_session() {
    let harness = spawn_server().await;

    let mut alice = Client::connect(harness.addr).await;
    alice.sign_up("alice").await;
    let mut bob = Client::connect(harness.addr).await;
    bob.sign_up("bob").await;

    let reply = bob.send(Operation::Follow, "bob", &["alice"]).await;
    assert_eq!(reply.status, Status::Success);
    assert_eq!(alice.next_frame().await, "FOLLOW;bob;");

    let reply = bob.send(Operation::Unfollow, "bob", &["alice"]).await;
    assert_eq!(reply.status, Status::Success);
    assert_eq!(alice.next_frame().await, "UNFOLLOW;bob;");
}

#[tokio::test]
async fn login_seeds_followers_and_admits_one_session() {
    let harness = spawn_server().await;

    // bob follows alice while she is offline; no event is deliverable, but
    // the edge lands in the store.
    let mut bob = Client::connect(harness.addr).await;
    bob.sign_up("bob").await;
    let reply = bob
        .send(Operation::Register, "alice", &["pw", "tech"])
        .await;
    assert_eq!(reply.status, Status::Success);
    let reply = bob.send(Operation::Follow, "bob", &["alice"]).await;
    assert_eq!(reply.status, Status::Success);

    let mut alice = Client::connect(harness.addr).await;
    let reply = alice.send(Operation::Login, "alice", &["pw"]).await;
    assert_eq!(reply.status, Status::Success);
    assert_eq!(reply.data, "bob");

    // A second connection cannot log alice in while the first holds the
    // session.
    let mut intruder = Client::connect(harness.addr).await;
    let reply = intruder.send(Operation::Login, "alice", &["pw"]).await;
    assert_eq!(reply.status, Status::AlreadyLogged);

    // Dropping the first connection releases the slot.
    drop(alice);
    let mut admitted = false;
    for _ in 0..40 {
        let reply = intruder.send(Operation::Login, "alice", &["pw"]).await;
        if reply.status == Status::Success {
            admitted = true;
            break;
        }
        assert_eq!(reply.status, Status::AlreadyLogged);
        sleep(Duration::from_millis(50)).await;
    }
    assert!(admitted, "session slot never released after disconnect");
}

#[tokio::test]
async fn request_split_across_partial_writes_dispatches_once() {
    let harness = spawn_server().await;

    let stream = TcpStream::connect(harness.addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut frames = FrameReader::new(reader);

    let payload = Request::encode(Operation::Register, "carol", &["pw", "tech"]);
    let mut wire = (payload.len() as u32).to_le_bytes().to_vec();
    wire.extend_from_slice(payload.as_bytes());

    // Three writes at arbitrary byte boundaries, with pauses so each lands
    // as its own read on the server side.
    writer.write_all(&wire[..3]).await.unwrap();
    writer.flush().await.unwrap();
    sleep(Duration::from_millis(20)).await;
    writer.write_all(&wire[3..11]).await.unwrap();
    writer.flush().await.unwrap();
    sleep(Duration::from_millis(20)).await;
    writer.write_all(&wire[11..]).await.unwrap();
    writer.flush().await.unwrap();

    let reply = Reply::decode(&frames.next().await.unwrap().unwrap()).unwrap();
    assert_eq!(reply.status, Status::Success);

    // Exactly one registration happened.
    assert_eq!(harness.store.user_count(), 1);
    let reply2 = {
        write_frame(
            &mut writer,
            &Request::encode(Operation::Register, "carol", &["pw", "tech"]),
        )
        .await
        .unwrap();
        Reply::decode(&frames.next().await.unwrap().unwrap()).unwrap()
    };
    assert_eq!(reply2.status, Status::Failure);
}

#[tokio::test]
async fn oversized_frame_closes_only_that_connection() {
    let harness = spawn_server().await;

    let stream = TcpStream::connect(harness.addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut frames = FrameReader::new(reader);

    // A length header far past the limit is a protocol error.
    writer
        .write_all(&(10 * 1024 * 1024u32).to_le_bytes())
        .await
        .unwrap();
    writer.flush().await.unwrap();
    let closed = timeout(Duration::from_secs(5), frames.next())
        .await
        .expect("server should close the connection");
    assert!(matches!(closed, Ok(None) | Err(_)));

    // The listener and the other reactors keep serving.
    let mut healthy = Client::connect(harness.addr).await;
    healthy.sign_up("dave").await;
}

#[tokio::test]
async fn protocol_errors_come_back_as_statuses() {
    let harness = spawn_server().await;
    let mut client = Client::connect(harness.addr).await;

    // Not logged in yet.
    let reply = client.send(Operation::Feed, "alice", &[]).await;
    assert_eq!(reply.status, Status::NotLogged);

    // Unknown operation name.
    write_frame(&mut client.writer, "SHOUT\u{1f}alice")
        .await
        .unwrap();
    let reply = Reply::decode(&client.next_frame().await).unwrap();
    assert_eq!(reply.status, Status::OperationNotSupported);

    // Wrong password, then a proper login still works on this connection.
    client
        .send(Operation::Register, "alice", &["pw", "tech"])
        .await;
    let reply = client.send(Operation::Login, "alice", &["nope"]).await;
    assert_eq!(reply.status, Status::WrongCredential);
    let reply = client.send(Operation::Login, "alice", &["pw"]).await;
    assert_eq!(reply.status, Status::Success);
}
