//! Start a hub on an ephemeral port, drive it over a socket, stop it and
//! check what was persisted.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use troof_hub::{HubConfig, HubError, HubNode};
use troof_nullables::NullSigner;
use troof_presence::EnrollmentCode;
use troof_store::{JsonFileStore, KeyStore};
use troof_types::ParticipantId;

fn config(dir: &std::path::Path) -> HubConfig {
    troof_utils::init_tracing();
    HubConfig {
        listen_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        data_dir: dir.to_path_buf(),
        enrollment: vec![EnrollmentCode {
            code: "CISO-2025".into(),
            participant_id: "ciso".into(),
            display_name: "CISO".into(),
        }],
        ..HubConfig::default()
    }
}

async fn next_of_type<S>(ws: &mut S, kind: &str) -> Value
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .expect("socket error");
        if let Message::Text(text) = frame {
            let value: Value = serde_json::from_str(&text).unwrap();
            if value["type"] == kind {
                return value;
            }
        }
    }
}

#[tokio::test]
async fn registered_keys_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let signer = NullSigner::generate();

    let mut node = HubNode::new(config(dir.path())).unwrap();
    let addr = node.start().await.unwrap();
    assert_eq!(node.local_addr(), Some(addr));

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws.send(Message::Text(
        json!({"type": "role", "role": "sender", "enrollCode": "CISO-2025"}).to_string(),
    ))
    .await
    .unwrap();
    let hello = loop {
        let hello = next_of_type(&mut ws, "hello").await;
        if hello["role"] == "sender" {
            break hello;
        }
    };
    assert_eq!(hello["participantId"], "ciso");

    ws.send(Message::Text(
        json!({"type": "register_pubkey", "pem": signer.public_pem()}).to_string(),
    ))
    .await
    .unwrap();

    let ciso = ParticipantId::new("ciso");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while node.hub().participants().iter().all(|p| !p.has_key) {
        assert!(tokio::time::Instant::now() < deadline, "key never registered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    drop(ws);
    node.stop().await.unwrap();

    let stored = JsonFileStore::open(dir.path()).unwrap().load_keys().unwrap();
    assert_eq!(stored.get(&ciso), Some(&signer.public_pem()));

    let restarted = HubNode::new(config(dir.path())).unwrap();
    assert!(restarted.hub().observer_snapshot().iter().any(|e| e.kind() == "pubkey_pem"));
}

#[tokio::test]
async fn start_twice_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let mut node = HubNode::new(config(dir.path())).unwrap();
    node.start().await.unwrap();
    assert!(matches!(node.start().await, Err(HubError::AlreadyStarted)));
    node.stop().await.unwrap();
}

#[test]
fn invalid_config_is_rejected_before_opening_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&dir.path().join("never"));
    config.params.bucket_capacity = 0;
    assert!(matches!(HubNode::new(config), Err(HubError::Config(_))));
    assert!(!dir.path().join("never").exists());
}
