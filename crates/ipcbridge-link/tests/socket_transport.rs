#![cfg(unix)]

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ipcbridge_frame::{FrameConfig, FrameError, MessageReader, MessageWriter};
use ipcbridge_link::{DataMessage, LinkConfig, MessageCallback, SocketTransport, Transport};
use ipcbridge_transport::SocketListener;

fn socket_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("ipcbridge-it-{}-{}", std::process::id(), name));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("svc.sock")
}

fn config(path: &PathBuf) -> LinkConfig {
    LinkConfig::default()
        .with_socket_path(path)
        .with_reconnect_interval(Duration::from_millis(20))
}

#[test]
fn inbound_messages_reach_callbacks() {
    let path = socket_path("inbound");
    let listener = SocketListener::bind(&path).unwrap();
    let transport = SocketTransport::start(config(&path)).unwrap();

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let callback: MessageCallback = Arc::new(move |message: &DataMessage| {
        let _ = tx.lock().unwrap().send(message.clone());
    });
    transport.register_callback("it", callback);

    let server = listener.accept().unwrap();
    assert!(transport.wait_connected(Duration::from_secs(2)));

    let mut writer = MessageWriter::for_stream(server, FrameConfig::default()).unwrap();
    writer
        .write_message(&DataMessage::copy_from(7, 9, b"status"))
        .unwrap();

    let received = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!((received.group, received.id), (7, 9));
    assert_eq!(received.payload.as_ref(), b"status");
}

#[test]
fn immediate_and_delayed_sends_reach_service() {
    let path = socket_path("outbound");
    let listener = SocketListener::bind(&path).unwrap();
    let transport = SocketTransport::start(config(&path)).unwrap();

    let server = listener.accept().unwrap();
    assert!(transport.wait_connected(Duration::from_secs(2)));
    let mut reader = MessageReader::for_stream(server, FrameConfig::default()).unwrap();

    let start = Instant::now();
    transport.send_delayed(DataMessage::copy_from(1, 2, b"later"), Duration::from_millis(80));
    transport
        .try_send(&DataMessage::copy_from(1, 1, b"now"))
        .unwrap();

    let first = reader.read_message().unwrap();
    let second = reader.read_message().unwrap();
    assert_eq!(first.payload.as_ref(), b"now");
    assert_eq!(second.payload.as_ref(), b"later");
    assert!(start.elapsed() >= Duration::from_millis(80));
    assert_eq!(transport.pending_delayed(), 0);
}

#[test]
fn reconnects_after_service_restart() {
    let path = socket_path("restart");
    let transport = SocketTransport::start(config(&path)).unwrap();
    assert!(!transport.is_connected());

    {
        let listener = SocketListener::bind(&path).unwrap();
        let server = listener.accept().unwrap();
        assert!(transport.wait_connected(Duration::from_secs(2)));
        server.shutdown().unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(2);
    while transport.is_connected() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(!transport.is_connected());

    let listener = SocketListener::bind(&path).unwrap();
    let _server = listener.accept().unwrap();
    assert!(transport.wait_connected(Duration::from_secs(2)));
}

#[test]
fn dropped_from_its_own_callback_shuts_down_without_joining_itself() {
    let path = socket_path("self-drop");
    let listener = SocketListener::bind(&path).unwrap();
    let transport = SocketTransport::start(config(&path)).unwrap();

    let slot: Arc<Mutex<Option<SocketTransport>>> = Arc::default();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let callback_slot = Arc::clone(&slot);
    let callback: MessageCallback = Arc::new(move |_message: &DataMessage| {
        let owned = callback_slot.lock().unwrap().take();
        drop(owned);
        let _ = tx.lock().unwrap().send(());
    });
    transport.register_callback("self-drop", callback);

    let server = listener.accept().unwrap();
    assert!(transport.wait_connected(Duration::from_secs(2)));
    *slot.lock().unwrap() = Some(transport);

    let mut writer =
        MessageWriter::for_stream(server.try_clone().unwrap(), FrameConfig::default()).unwrap();
    writer
        .write_message(&DataMessage::copy_from(1, 1, b"bye"))
        .unwrap();

    rx.recv_timeout(Duration::from_secs(2))
        .expect("callback should return after dropping the transport");
    let mut reader = MessageReader::for_stream(server, FrameConfig::default()).unwrap();
    assert!(matches!(
        reader.read_message(),
        Err(FrameError::ConnectionClosed)
    ));
}
