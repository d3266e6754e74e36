//! WebSocket server: room joins and patch traffic.

use crate::config::Config;
use crate::rooms::Rooms;
use crate::{serial, tracking};
use futures_util::{SinkExt, StreamExt};
use protocol::ClientMessage;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Connection tracking state (shared across connection handlers).
struct ConnectionState {
    /// Number of connections per IP address.
    ip_connections: HashMap<IpAddr, usize>,
    /// Total number of connections.
    total_connections: usize,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            ip_connections: HashMap::new(),
            total_connections: 0,
        }
    }

    /// Try to add a connection, returns true if allowed.
    fn try_add_connection(&mut self, ip: IpAddr, max_total: usize, max_per_ip: usize) -> bool {
        if self.total_connections >= max_total {
            return false;
        }
        let current = self.ip_connections.get(&ip).copied().unwrap_or(0);
        if current >= max_per_ip {
            return false;
        }
        *self.ip_connections.entry(ip).or_insert(0) += 1;
        self.total_connections += 1;
        true
    }

    /// Remove a connection.
    fn remove_connection(&mut self, ip: IpAddr) {
        if let Some(count) = self.ip_connections.get_mut(&ip) {
            if *count > 0 {
                *count -= 1;
                self.total_connections = self.total_connections.saturating_sub(1);
            }
            if *count == 0 {
                self.ip_connections.remove(&ip);
            }
        }
    }
}

/// Run the schema-sync server.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on ws://{}", addr);

    let rooms = Arc::new(Rooms::new(config.rooms.max_rooms));

    // Tracking ingestion (process-global, fans out to all rooms)
    if config.tracking.enabled {
        let rooms = Arc::clone(&rooms);
        let tracking_config = config.tracking.clone();
        tokio::spawn(async move {
            if let Err(e) = tracking::run(rooms, tracking_config).await {
                error!("Tracking listener failed: {}", e);
            }
        });
    }

    // Serial line bridge
    if !config.serial.devices.is_empty() {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(serial::run(Arc::clone(&rooms), rx));
        for device in config.serial.devices.clone() {
            let delimiter = config.serial.delimiter.clone();
            tokio::spawn(serial::read_device(device, delimiter, tx.clone()));
        }
    }

    // Idle-room sweeper
    if config.rooms.idle_ttl_secs > 0 {
        let rooms = Arc::clone(&rooms);
        let ttl = Duration::from_secs(config.rooms.idle_ttl_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ttl.min(Duration::from_secs(60)));
            loop {
                interval.tick().await;
                rooms.sweep_idle(ttl).await;
            }
        });
    }

    let conn_state = Arc::new(RwLock::new(ConnectionState::new()));
    let max_connections = config.server.max_connections;
    let ip_limit = config.server.ip_limit;

    loop {
        let (stream, addr) = listener.accept().await?;
        let ip = addr.ip();

        {
            let mut state = conn_state.write().await;
            if !state.try_add_connection(ip, max_connections, ip_limit) {
                warn!("Connection rejected (limit reached): {}", addr);
                continue;
            }
        }

        let rooms = Arc::clone(&rooms);
        let conn_state = Arc::clone(&conn_state);
        tokio::spawn(async move {
            let result = handle_connection(stream, addr, rooms).await;

            {
                let mut state = conn_state.write().await;
                state.remove_connection(addr.ip());
            }

            if let Err(e) = result {
                debug!("Connection from {} ended: {}", addr, e);
            }
        });
    }
}

/// Handle a single WebSocket connection for the lifetime of its room
/// membership.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    rooms: Arc<Rooms>,
) -> anyhow::Result<()> {
    let mut requested_room = None;
    let ws_stream = accept_hdr_async(stream, |req: &Request, resp: Response| {
        requested_room = room_from_query(req.uri().query());
        Ok(resp)
    })
    .await?;
    let room_id = requested_room.unwrap_or_else(|| "default".to_string());

    let Some(room) = rooms.get_or_create(&room_id).await else {
        warn!("Rejecting {}: room limit reached", addr);
        return Ok(());
    };
    info!("Client {} joined room {:?}", addr, room.id);

    // subscribe before the initial snapshot so nothing in between is lost
    let mut rx = room.subscribe();
    let (mut write, mut read) = ws_stream.split();
    write.send(Message::Text(room.encoded_snapshot().await)).await?;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(text.as_str()) {
                            Ok(ClientMessage::Schema { patch }) => {
                                if let Err(e) = room.apply_patch(&patch).await {
                                    warn!(
                                        "Dropped patch from {} in room {:?}: {}",
                                        addr, room.id, e
                                    );
                                }
                            }
                            Err(e) => {
                                warn!("Ignoring malformed message from {}: {}", addr, e);
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        write.send(Message::Pong(payload)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Client {} left room {:?}", addr, room.id);
                        break;
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    _ => {}
                }
            }
            frame = rx.recv() => {
                match frame {
                    Ok(payload) => {
                        write.send(Message::Text(payload)).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // frames carry full trees, so resync with the latest
                        warn!("Client {} lagged {} frame(s), resyncing", addr, skipped);
                        write.send(Message::Text(room.encoded_snapshot().await)).await?;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    Ok(())
}

fn room_from_query(query: Option<&str>) -> Option<String> {
    query?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "room" && !value.is_empty()).then(|| percent_decode(value))
    })
}

/// Decode `%XX` escapes and `+` in a query value. Malformed escapes pass
/// through verbatim.
fn percent_decode(value: &str) -> String {
    fn hex(b: u8) -> Option<u8> {
        (b as char).to_digit(16).map(|d| d as u8)
    }

    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                if let (Some(hi), Some(lo)) = (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                    out.push(hi << 4 | lo);
                    i += 3;
                    continue;
                }
                out.push(b'%');
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
