//! End-to-end discovery tests over real multicast sockets.
//!
//! These tests register services on the host's interfaces and expect to
//! see their own announcements back through the multicast loop.
//!
//! **Requires:**
//! - A network interface with multicast (loopback alone is not enough on
//!   some platforms)
//! - Feature flag: `integration-live`
//!
//! Run with:
//! ```sh
//! cargo test --test live_discovery --features integration-live -- --test-threads=1
//! ```

#![cfg(feature = "integration-live")]

use std::time::Duration;

use hickory_proto::op::{Message, MessageType};
use hickory_proto::rr::RecordType;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use lanbeacon::{register, Resolver, ServiceEntry, ServiceStream};

/// Wait for the next entry matching `instance` with the wanted liveness.
async fn wait_for(
    stream: &mut ServiceStream,
    instance: &str,
    withdrawn: bool,
    limit: Duration,
) -> ServiceEntry {
    timeout(limit, async {
        loop {
            match stream.recv().await {
                Some(e) if e.record.instance == instance && (e.ttl == 0) == withdrawn => {
                    break e;
                }
                Some(_) => continue,
                None => panic!("stream closed before {instance} was seen"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {instance} (withdrawn={withdrawn})"))
}

#[tokio::test]
async fn browse_sees_registration_then_goodbye() {
    let registration = register(
        "LiveBrowse",
        "_lanbeacon-test._tcp",
        "",
        8080,
        vec!["path=/".to_string()],
        vec![],
        0,
    )
    .expect("registration failed");

    let cancel = CancellationToken::new();
    let mut stream = Resolver::new()
        .browse("_lanbeacon-test._tcp", "", &cancel)
        .expect("browse failed");

    let entry = wait_for(&mut stream, "LiveBrowse", false, Duration::from_secs(3)).await;
    assert_eq!(entry.port, 8080);
    assert_eq!(entry.text, vec!["path=/".to_string()]);
    assert_eq!(entry.record.domain, "local");
    assert!(
        !entry.addrs_v4.is_empty() || !entry.addrs_v6.is_empty(),
        "entry has no addresses"
    );

    registration.shutdown().await;

    let gone = wait_for(&mut stream, "LiveBrowse", true, Duration::from_secs(1)).await;
    assert_eq!(gone.ttl, 0);

    cancel.cancel();
    assert!(timeout(Duration::from_secs(1), async {
        while stream.recv().await.is_some() {}
    })
    .await
    .is_ok());
}

#[tokio::test]
async fn lookup_resolves_single_instance() {
    let registration = register(
        "LiveLookup",
        "_lanbeacon-test._tcp",
        "",
        9090,
        vec!["v=1".to_string()],
        vec![],
        0,
    )
    .expect("registration failed");

    let cancel = CancellationToken::new();
    let mut stream = Resolver::new()
        .lookup("LiveLookup", "_lanbeacon-test._tcp", "", &cancel)
        .expect("lookup failed");

    let entry = wait_for(&mut stream, "LiveLookup", false, Duration::from_secs(3)).await;
    assert_eq!(entry.port, 9090);

    // At most one entry: the stream closes after the result.
    assert!(
        matches!(timeout(Duration::from_secs(1), stream.recv()).await, Ok(None)),
        "lookup stream did not close after its result"
    );

    registration.shutdown().await;
}

/// A raw multicast observer on port 5353, decoupled from the library's
/// socket layer.
async fn observer_v4() -> tokio::net::UdpSocket {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).unwrap();
    socket.set_reuse_address(true).unwrap();
    #[cfg(unix)]
    socket.set_reuse_port(true).unwrap();
    socket
        .bind(&std::net::SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, lanbeacon::MDNS_PORT).into())
        .unwrap();
    socket.set_nonblocking(true).unwrap();
    let sock = tokio::net::UdpSocket::from_std(std::net::UdpSocket::from(socket)).unwrap();

    for iface in if_addrs::get_if_addrs().unwrap_or_default() {
        if let if_addrs::IfAddr::V4(a) = iface.addr {
            let _ = sock.join_multicast_v4(lanbeacon::MDNS_GROUP_V4, a.ip);
        }
    }
    sock
}

/// Whether `msg` is a TXT-only announcement for `name` carrying `value`.
fn is_txt_announcement(msg: &Message, name: &str, value: &[u8]) -> bool {
    if msg.message_type() != MessageType::Response || msg.answers().len() != 1 {
        return false;
    }
    let rec = &msg.answers()[0];
    if rec.record_type() != RecordType::TXT
        || !rec.mdns_cache_flush()
        || rec.name().to_utf8() != name
    {
        return false;
    }
    match rec.data() {
        Some(hickory_proto::rr::RData::TXT(txt)) => {
            txt.txt_data().len() == 1 && &*txt.txt_data()[0] == value
        }
        _ => false,
    }
}

#[tokio::test]
async fn set_text_announces_exactly_once() {
    let observer = observer_v4().await;

    let registration = register(
        "LiveSetText",
        "_lanbeacon-test._tcp",
        "",
        7070,
        vec!["v=1".to_string()],
        vec![],
        0,
    )
    .expect("registration failed");

    // Let the probe/announce phase pass so its packets are not confused
    // with the TXT announcement (those carry the full answer set).
    tokio::time::sleep(Duration::from_millis(500)).await;

    registration.set_text(vec!["v=2".to_string()]).await;

    let instance_name = "LiveSetText._lanbeacon-test._tcp.local.";
    let mut seen = 0;
    let mut buf = vec![0u8; 65_536];
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, observer.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => {
                if let Ok(msg) = Message::from_vec(&buf[..len]) {
                    if is_txt_announcement(&msg, instance_name, b"v=2") {
                        seen += 1;
                    }
                }
            }
            Ok(Err(_)) | Err(_) => break,
        }
    }
    assert_eq!(seen, 1, "expected exactly one TXT announcement");

    registration.shutdown().await;
}
