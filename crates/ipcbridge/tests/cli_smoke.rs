#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use ipcbridge_frame::{FrameConfig, MessageReader};
use ipcbridge_transport::{connect, IpcStream};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/ipcbridge-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_for_connect(path: &Path, timeout: Duration) -> IpcStream {
    let start = Instant::now();
    loop {
        if let Ok(stream) = connect(path) {
            return stream;
        }
        if start.elapsed() >= timeout {
            panic!("connect timeout");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

#[test]
fn version_prints_crate_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_ipcbridge"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("ipcbridge "));
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn send_without_service_returns_124() {
    let missing = unique_temp_dir("missing").join("absent.sock");

    let output = Command::new(env!("CARGO_BIN_EXE_ipcbridge"))
        .arg("--log-level")
        .arg("error")
        .arg("send")
        .arg(&missing)
        .arg("-g")
        .arg("1")
        .arg("-i")
        .arg("1")
        .arg("--connect-timeout")
        .arg("200ms")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(124));
}

#[test]
fn hub_relays_sent_message_to_other_clients() {
    let dir = unique_temp_dir("hub");
    let sock_path = dir.join("hub.sock");

    let hub = Command::new(env!("CARGO_BIN_EXE_ipcbridge"))
        .arg("--log-level")
        .arg("error")
        .arg("--format")
        .arg("json")
        .arg("hub")
        .arg(&sock_path)
        .arg("--count")
        .arg("1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("hub should start");

    let receiver = wait_for_connect(&sock_path, Duration::from_secs(3));
    let mut reader = MessageReader::for_stream(
        receiver,
        FrameConfig {
            read_timeout: Some(Duration::from_secs(5)),
            ..FrameConfig::default()
        },
    )
    .expect("reader should wrap stream");
    // Give the hub time to register the receiver before anything is sent.
    thread::sleep(Duration::from_millis(200));

    let sent = Command::new(env!("CARGO_BIN_EXE_ipcbridge"))
        .arg("--log-level")
        .arg("error")
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg(&sock_path)
        .arg("--group")
        .arg("0x10")
        .arg("--id")
        .arg("7")
        .arg("--data")
        .arg("ping")
        .output()
        .expect("send should run");
    assert!(sent.status.success());
    let stdout = String::from_utf8_lossy(&sent.stdout);
    assert!(stdout.contains("\"event\":\"sent\""));

    let message = reader.read_message().expect("receiver should get relay");
    assert_eq!((message.group, message.id), (0x10, 7));
    assert_eq!(message.payload.as_ref(), b"ping");

    let output = hub.wait_with_output().expect("hub should exit");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"event\":\"relayed\""));
    assert!(stdout.contains("\"payload\":\"ping\""));

    let _ = std::fs::remove_dir_all(&dir);
}
