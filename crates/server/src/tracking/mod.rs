//! TUIO tracking ingestion.
//!
//! Decodes the OSC datagram stream into per-class entity buckets and
//! projects throttled snapshots into every active room under the reserved
//! `tuio` key. Producers are process-global, so the snapshot is not scoped
//! to a single room.

pub mod publisher;

use crate::config::TrackingConfig;
use crate::rooms::Rooms;
use protocol::osc;
use protocol::tuio::{EntityClass, TrackedEntity, TuioEvent};
use publisher::ThrottledPublisher;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

/// Reserved key in every room tree carrying the tracking snapshot.
pub const TUIO_KEY: &str = "tuio";

/// Per-class bucket: tracked entities plus the last seen frame number.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassBucket {
    pub data: Vec<TrackedEntity>,
    pub fseq: i32,
}

/// Stateful decoder for the TUIO message stream.
///
/// Message framing (alive -> set* -> fseq) is the producer's business; a
/// `set` for a brand-new session ahead of any `alive` is accepted.
#[derive(Debug)]
pub struct TrackingDecoder {
    classes: HashMap<EntityClass, ClassBucket>,
    max_entities: usize,
}

impl TrackingDecoder {
    pub fn new(max_entities: usize) -> Self {
        Self {
            classes: HashMap::new(),
            max_entities,
        }
    }

    /// Apply one decoded event. Returns true when the event marked a fresh
    /// frame boundary, the trigger for considering publication.
    pub fn apply(&mut self, event: TuioEvent) -> bool {
        match event {
            TuioEvent::Alive { class, session_ids } => {
                if let Some(bucket) = self.classes.get_mut(&class) {
                    let roster: HashSet<i32> = session_ids.into_iter().collect();
                    let before = bucket.data.len();
                    bucket.data.retain(|e| roster.contains(&e.session_id));
                    if bucket.data.len() != before {
                        trace!(
                            "{}: removed {} stale entities",
                            class.tag(),
                            before - bucket.data.len()
                        );
                    }
                    if bucket.data.is_empty() {
                        self.classes.remove(&class);
                    }
                }
                false
            }
            TuioEvent::Set { class, entity } => {
                let bucket = self.classes.entry(class).or_default();
                if let Some(existing) = bucket
                    .data
                    .iter_mut()
                    .find(|e| e.session_id == entity.session_id)
                {
                    if *existing != entity {
                        trace!("{}: session {} changed", class.tag(), entity.session_id);
                        *existing = entity;
                    }
                } else if bucket.data.len() < self.max_entities {
                    bucket.data.push(entity);
                } else {
                    warn!(
                        "{}: entity cap {} reached, ignoring session {}",
                        class.tag(),
                        self.max_entities,
                        entity.session_id
                    );
                }
                false
            }
            TuioEvent::Fseq { class, frame } => {
                let bucket = self.classes.entry(class).or_default();
                if bucket.fseq == frame {
                    false // duplicate or retransmitted frame marker
                } else {
                    bucket.fseq = frame;
                    true
                }
            }
        }
    }

    /// Bucket for one class, if it currently tracks anything.
    pub fn class(&self, class: EntityClass) -> Option<&ClassBucket> {
        self.classes.get(&class)
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Multi-class snapshot as a JSON tree keyed by class tag.
    pub fn snapshot(&self) -> Value {
        serde_json::to_value(&self.classes).unwrap_or_default()
    }
}

/// Listen for TUIO datagrams and publish decoded snapshots.
pub async fn run(rooms: Arc<Rooms>, config: TrackingConfig) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(format!("{}:{}", config.bind, config.port)).await?;
    info!(
        "Tracking listener on udp://{}:{} (throttle {}ms)",
        config.bind, config.port, config.throttle_ms
    );

    let mut decoder = TrackingDecoder::new(config.max_entities);
    let mut publisher = ThrottledPublisher::new(Duration::from_millis(config.throttle_ms));
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let (len, peer) = socket.recv_from(&mut buf).await?;
        let messages = match osc::parse_packet(&buf[..len]) {
            Ok(messages) => messages,
            Err(e) => {
                debug!("Dropping malformed datagram from {}: {}", peer, e);
                continue;
            }
        };

        let mut frame_boundary = false;
        for msg in &messages {
            match TuioEvent::from_osc(msg) {
                Ok(Some(event)) => frame_boundary |= decoder.apply(event),
                Ok(None) => {}
                Err(e) => trace!("Skipping message {:?}: {}", msg.address, e),
            }
        }

        if frame_boundary && publisher.should_publish(Instant::now()) {
            publish(&rooms, decoder.snapshot()).await;
        }
    }
}

/// Write the snapshot into every active room and rebroadcast.
async fn publish(rooms: &Rooms, snapshot: Value) {
    for room in rooms.active().await {
        let snapshot = snapshot.clone();
        room.mutate(move |tree| {
            let Some(obj) = tree.as_object_mut() else {
                return false;
            };
            obj.insert(TUIO_KEY.to_string(), snapshot);
            true
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::tuio::{Acceleration, Position, Velocity};

    fn cursor(session_id: i32, x: f32, y: f32) -> TrackedEntity {
        TrackedEntity {
            session_id,
            class_id: None,
            position: Position { x, y },
            z: None,
            angle_degrees: None,
            velocity: Velocity {
                x: 0.0,
                y: 0.0,
                z: None,
                angle: 0.0,
            },
            acceleration: Acceleration {
                linear: 0.0,
                angular: 0.0,
            },
            dimensions: None,
        }
    }

    fn set(decoder: &mut TrackingDecoder, entity: TrackedEntity) {
        decoder.apply(TuioEvent::Set {
            class: EntityClass::Cursor2D,
            entity,
        });
    }

    #[test]
    fn alive_removes_sessions_absent_from_roster() {
        let mut decoder = TrackingDecoder::new(64);
        set(&mut decoder, cursor(1, 0.1, 0.1));
        set(&mut decoder, cursor(5, 0.5, 0.5));
        set(&mut decoder, cursor(9, 0.9, 0.9));

        decoder.apply(TuioEvent::Alive {
            class: EntityClass::Cursor2D,
            session_ids: vec![5],
        });

        let bucket = decoder.class(EntityClass::Cursor2D).unwrap();
        assert_eq!(bucket.data.len(), 1);
        assert_eq!(bucket.data[0].session_id, 5);
    }

    #[test]
    fn empty_roster_drops_the_bucket() {
        let mut decoder = TrackingDecoder::new(64);
        set(&mut decoder, cursor(1, 0.1, 0.1));

        decoder.apply(TuioEvent::Alive {
            class: EntityClass::Cursor2D,
            session_ids: vec![],
        });

        assert!(decoder.class(EntityClass::Cursor2D).is_none());
        assert!(decoder.is_empty());
    }

    #[test]
    fn alive_for_unknown_class_is_a_no_op() {
        let mut decoder = TrackingDecoder::new(64);
        decoder.apply(TuioEvent::Alive {
            class: EntityClass::Object3D,
            session_ids: vec![1, 2],
        });
        assert!(decoder.is_empty());
    }

    #[test]
    fn set_updates_existing_entity_in_place() {
        let mut decoder = TrackingDecoder::new(64);
        set(&mut decoder, cursor(7, 0.1, 0.1));
        set(&mut decoder, cursor(7, 0.8, 0.2));

        let bucket = decoder.class(EntityClass::Cursor2D).unwrap();
        assert_eq!(bucket.data.len(), 1);
        assert_eq!(bucket.data[0].position, Position { x: 0.8, y: 0.2 });
    }

    #[test]
    fn set_before_alive_is_accepted() {
        let mut decoder = TrackingDecoder::new(64);
        set(&mut decoder, cursor(3, 0.3, 0.3));
        assert_eq!(decoder.class(EntityClass::Cursor2D).unwrap().data.len(), 1);
    }

    #[test]
    fn entity_cap_ignores_new_sessions() {
        let mut decoder = TrackingDecoder::new(2);
        set(&mut decoder, cursor(1, 0.1, 0.1));
        set(&mut decoder, cursor(2, 0.2, 0.2));
        set(&mut decoder, cursor(3, 0.3, 0.3));

        let bucket = decoder.class(EntityClass::Cursor2D).unwrap();
        assert_eq!(bucket.data.len(), 2);
        // updates to known sessions still land
        set(&mut decoder, cursor(1, 0.9, 0.9));
        let bucket = decoder.class(EntityClass::Cursor2D).unwrap();
        assert_eq!(bucket.data[0].position.x, 0.9);
    }

    #[test]
    fn fseq_signals_frame_boundary_once() {
        let mut decoder = TrackingDecoder::new(64);
        assert!(decoder.apply(TuioEvent::Fseq {
            class: EntityClass::Cursor2D,
            frame: 7,
        }));
        // retransmission of the same frame marker
        assert!(!decoder.apply(TuioEvent::Fseq {
            class: EntityClass::Cursor2D,
            frame: 7,
        }));
        assert!(decoder.apply(TuioEvent::Fseq {
            class: EntityClass::Cursor2D,
            frame: 8,
        }));
    }

    #[test]
    fn snapshot_is_keyed_by_class_tag() {
        let mut decoder = TrackingDecoder::new(64);
        set(&mut decoder, cursor(4, 0.4, 0.4));
        decoder.apply(TuioEvent::Fseq {
            class: EntityClass::Cursor2D,
            frame: 12,
        });

        let snapshot = decoder.snapshot();
        assert_eq!(snapshot["2Dcur"]["fseq"], 12);
        assert_eq!(snapshot["2Dcur"]["data"][0]["sessionId"], 4);
    }

    #[tokio::test]
    async fn publish_lands_in_every_room_and_rebroadcasts() {
        let rooms = Arc::new(Rooms::new(8));
        let r1 = rooms.get_or_create("r1").await.unwrap();
        let r2 = rooms.get_or_create("r2").await.unwrap();
        let mut rx1 = r1.subscribe();

        let mut decoder = TrackingDecoder::new(64);
        set(&mut decoder, cursor(4, 0.4, 0.4));
        decoder.apply(TuioEvent::Fseq {
            class: EntityClass::Cursor2D,
            frame: 1,
        });
        publish(&rooms, decoder.snapshot()).await;

        let frame = rx1.recv().await.unwrap();
        let broadcast: Value = serde_json::from_str(frame.as_str()).unwrap();
        assert_eq!(broadcast["data"][TUIO_KEY]["2Dcur"]["data"][0]["sessionId"], 4);
        assert_eq!(r2.snapshot().await[TUIO_KEY]["2Dcur"]["fseq"], 1);
    }
}
