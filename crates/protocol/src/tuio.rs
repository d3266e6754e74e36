//! TUIO message decoding on top of OSC.
//!
//! Addresses are `/tuio/<class>`; the first argument names the message kind
//! (`alive`, `set`, `fseq`). Argument offsets for `set` are derived from the
//! class shape rather than hand-written per profile, see [`SetOffsets`].

use crate::osc::{OscArg, OscMessage};
use crate::ProtocolError;
use serde::{Deserialize, Serialize};

/// Entity classes defined by the TUIO profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityClass {
    #[serde(rename = "2Dcur")]
    Cursor2D,
    #[serde(rename = "2Dobj")]
    Object2D,
    #[serde(rename = "2Dblb")]
    Blob2D,
    #[serde(rename = "25Dcur")]
    Cursor25D,
    #[serde(rename = "25Dobj")]
    Object25D,
    #[serde(rename = "25Dblb")]
    Blob25D,
    #[serde(rename = "3Dcur")]
    Cursor3D,
    #[serde(rename = "3Dobj")]
    Object3D,
    #[serde(rename = "3Dblb")]
    Blob3D,
}

impl EntityClass {
    /// Resolve a class from a full OSC address pattern.
    pub fn from_address(address: &str) -> Result<Self, ProtocolError> {
        let tag = address
            .strip_prefix("/tuio/")
            .ok_or_else(|| ProtocolError::UnknownAddress(address.to_string()))?;
        Self::from_tag(tag).ok_or_else(|| ProtocolError::UnknownClass(tag.to_string()))
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "2Dcur" => EntityClass::Cursor2D,
            "2Dobj" => EntityClass::Object2D,
            "2Dblb" => EntityClass::Blob2D,
            "25Dcur" => EntityClass::Cursor25D,
            "25Dobj" => EntityClass::Object25D,
            "25Dblb" => EntityClass::Blob25D,
            "3Dcur" => EntityClass::Cursor3D,
            "3Dobj" => EntityClass::Object3D,
            "3Dblb" => EntityClass::Blob3D,
            _ => return None,
        })
    }

    pub fn tag(self) -> &'static str {
        match self {
            EntityClass::Cursor2D => "2Dcur",
            EntityClass::Object2D => "2Dobj",
            EntityClass::Blob2D => "2Dblb",
            EntityClass::Cursor25D => "25Dcur",
            EntityClass::Object25D => "25Dobj",
            EntityClass::Blob25D => "25Dblb",
            EntityClass::Cursor3D => "3Dcur",
            EntityClass::Object3D => "3Dobj",
            EntityClass::Blob3D => "3Dblb",
        }
    }

    /// Object profiles carry a class/component id right after the session id.
    pub fn has_class_id(self) -> bool {
        matches!(
            self,
            EntityClass::Object2D | EntityClass::Object25D | EntityClass::Object3D
        )
    }

    /// 2.5D and 3D profiles carry a depth coordinate after the position.
    pub fn has_depth(self) -> bool {
        !matches!(
            self,
            EntityClass::Cursor2D | EntityClass::Object2D | EntityClass::Blob2D
        )
    }

    pub fn is_3d(self) -> bool {
        matches!(
            self,
            EntityClass::Cursor3D | EntityClass::Object3D | EntityClass::Blob3D
        )
    }

    /// Blob profiles carry optional geometry at the end of the list.
    pub fn is_blob(self) -> bool {
        matches!(
            self,
            EntityClass::Blob2D | EntityClass::Blob25D | EntityClass::Blob3D
        )
    }
}

/// Normalized position, [0,1] per the wire contract (not re-validated here).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f32>,
    pub angle: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Acceleration {
    pub linear: f32,
    pub angular: f32,
}

/// Blob geometry. A field is present only when the wire argument was; absent
/// arguments are omitted, not zeroed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<f32>,
}

/// Full state of one tracked entity, unique per session id within a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEntity {
    pub session_id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<i32>,
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle_degrees: Option<f32>,
    pub velocity: Velocity,
    pub acceleration: Acceleration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
}

/// A decoded TUIO message.
#[derive(Debug, Clone, PartialEq)]
pub enum TuioEvent {
    /// Complete roster of currently-live session ids for the class.
    Alive {
        class: EntityClass,
        session_ids: Vec<i32>,
    },
    /// Full state for one entity.
    Set {
        class: EntityClass,
        entity: TrackedEntity,
    },
    /// Frame-end marker.
    Fseq { class: EntityClass, frame: i32 },
}

impl TuioEvent {
    /// Decode an OSC message into a TUIO event.
    ///
    /// Returns `Ok(None)` for kinds that are valid TUIO but carry nothing we
    /// track (`source` and friends).
    pub fn from_osc(msg: &OscMessage) -> Result<Option<Self>, ProtocolError> {
        let class = EntityClass::from_address(&msg.address)?;
        let kind = msg
            .args
            .first()
            .and_then(OscArg::as_str)
            .ok_or(ProtocolError::TruncatedMessage("tuio"))?;

        match kind {
            "alive" => {
                let session_ids = msg.args[1..].iter().filter_map(OscArg::as_i32).collect();
                Ok(Some(TuioEvent::Alive { class, session_ids }))
            }
            "set" => decode_set(class, &msg.args).map(Some),
            "fseq" => {
                let frame = msg
                    .args
                    .get(1)
                    .and_then(OscArg::as_i32)
                    .ok_or(ProtocolError::TruncatedMessage("fseq"))?;
                Ok(Some(TuioEvent::Fseq { class, frame }))
            }
            _ => Ok(None),
        }
    }
}

/// Cursor handing out consecutive argument slots.
struct SlotCursor(usize);

impl SlotCursor {
    fn required(&mut self) -> usize {
        let slot = self.0;
        self.0 += 1;
        slot
    }

    fn optional(&mut self, present: bool) -> Option<usize> {
        present.then(|| self.required())
    }
}

/// Argument slot offsets for a `set` message.
///
/// Slot 0 is the message kind. Each field a class carries consumes exactly
/// one slot, shifting everything after it; offsets therefore fall out of the
/// class shape instead of per-profile branches.
#[derive(Debug, Clone, Copy)]
struct SetOffsets {
    session: usize,
    class_id: Option<usize>,
    x: usize,
    y: usize,
    z: Option<usize>,
    angle: Option<usize>,
    vel_x: usize,
    vel_y: usize,
    vel_z: Option<usize>,
    vel_angle: usize,
    accel_linear: usize,
    accel_angular: usize,
    width: Option<usize>,
    height: Option<usize>,
    depth: Option<usize>,
    area: Option<usize>,
}

impl SetOffsets {
    fn for_class(class: EntityClass) -> Self {
        let mut cursor = SlotCursor(1);
        Self {
            session: cursor.required(),
            class_id: cursor.optional(class.has_class_id()),
            x: cursor.required(),
            y: cursor.required(),
            z: cursor.optional(class.has_depth()),
            angle: cursor.optional(class.has_class_id()),
            vel_x: cursor.required(),
            vel_y: cursor.required(),
            vel_z: cursor.optional(class.is_3d()),
            vel_angle: cursor.required(),
            accel_linear: cursor.required(),
            accel_angular: cursor.required(),
            width: cursor.optional(class.is_blob()),
            height: cursor.optional(class.is_blob()),
            depth: cursor.optional(class.is_blob() && class.is_3d()),
            area: cursor.optional(class.is_blob()),
        }
    }
}

fn decode_set(class: EntityClass, args: &[OscArg]) -> Result<TuioEvent, ProtocolError> {
    let off = SetOffsets::for_class(class);
    let int = |slot: usize| args.get(slot).and_then(OscArg::as_i32);
    let float = |slot: usize| args.get(slot).and_then(OscArg::as_f32);

    let session_id = int(off.session).ok_or(ProtocolError::TruncatedMessage("set"))?;
    let x = float(off.x).ok_or(ProtocolError::TruncatedMessage("set"))?;
    let y = float(off.y).ok_or(ProtocolError::TruncatedMessage("set"))?;

    let entity = TrackedEntity {
        session_id,
        class_id: off.class_id.map(|slot| int(slot).unwrap_or(0)),
        position: Position { x, y },
        z: off.z.and_then(float),
        // wire angle is radians; published angle is degrees
        angle_degrees: off.angle.map(|slot| float(slot).unwrap_or(0.0).to_degrees()),
        velocity: Velocity {
            x: float(off.vel_x).unwrap_or(0.0),
            y: float(off.vel_y).unwrap_or(0.0),
            z: off.vel_z.map(|slot| float(slot).unwrap_or(0.0)),
            angle: float(off.vel_angle).unwrap_or(0.0),
        },
        acceleration: Acceleration {
            linear: float(off.accel_linear).unwrap_or(0.0),
            angular: float(off.accel_angular).unwrap_or(0.0),
        },
        dimensions: class.is_blob().then(|| Dimensions {
            width: off.width.and_then(float),
            height: off.height.and_then(float),
            depth: off.depth.and_then(float),
            area: off.area.and_then(float),
        }),
    };
    Ok(TuioEvent::Set { class, entity })
}
