//! Serial line bridge.
//!
//! Consumes already-decoded text lines from device readers and mirrors the
//! latest line per device into every room under the reserved `serialData`
//! key. Port setup (baud rates, locking) lives outside this process; the
//! configured paths are expected to produce delimiter-separated lines.

use crate::rooms::Rooms;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Reserved key carrying per-device serial values.
pub const SERIAL_KEY: &str = "serialData";

/// Event emitted by a device reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialEvent {
    /// A complete line was read from a device.
    Line { device: String, line: String },
    /// The device went away; its entry must be withdrawn.
    Closed { device: String },
}

/// Consume serial events and fan them out to every room.
pub async fn run(rooms: Arc<Rooms>, mut rx: mpsc::Receiver<SerialEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            SerialEvent::Line { device, line } => {
                debug!("Serial {}: {:?}", device, line);
                for room in rooms.active().await {
                    room.mutate(|tree| write_line(tree, &device, &line)).await;
                }
            }
            SerialEvent::Closed { device } => {
                info!("Serial device {} closed", device);
                for room in rooms.active().await {
                    room.mutate(|tree| remove_device(tree, &device)).await;
                }
            }
        }
    }
}

fn write_line(tree: &mut Value, device: &str, line: &str) -> bool {
    let Some(obj) = tree.as_object_mut() else {
        return false;
    };
    let serial = obj.entry(SERIAL_KEY).or_insert_with(|| json!({}));
    let Some(serial) = serial.as_object_mut() else {
        return false;
    };
    serial.insert(device.to_string(), Value::String(line.to_string()));
    true
}

/// Returns true only when the device actually had an entry, so rooms that
/// never saw the device are not rebroadcast.
fn remove_device(tree: &mut Value, device: &str) -> bool {
    tree.as_object_mut()
        .and_then(|obj| obj.get_mut(SERIAL_KEY))
        .and_then(Value::as_object_mut)
        .and_then(|serial| serial.remove(device))
        .is_some()
}

/// Read delimiter-separated lines from a device path until EOF or error.
pub async fn read_device(path: String, delimiter: String, tx: mpsc::Sender<SerialEvent>) {
    let delimiter = delimiter.as_bytes().first().copied().unwrap_or(b'\n');
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            warn!("Cannot open serial device {}: {}", path, e);
            return;
        }
    };
    info!("Reading serial device {}", path);

    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(delimiter, &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() == Some(&delimiter) {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches('\r')
                    .to_string();
                let event = SerialEvent::Line {
                    device: path.clone(),
                    line,
                };
                if tx.send(event).await.is_err() {
                    return; // bridge is gone
                }
            }
            Err(e) => {
                warn!("Serial read error on {}: {}", path, e);
                break;
            }
        }
    }
    let _ = tx.send(SerialEvent::Closed { device: path }).await;
}
