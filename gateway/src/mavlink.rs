//! Robust MAVLink v2 frame parser/encoder and command-kind classification.
//!
//! Implements the public MAVLink v2 wire header and the CRC-16/MCRF4XX
//! checksum (`crc_accumulate`, matching the reference C implementation bit
//! for bit). AEGIS does not extend the dialect, and payload field layouts
//! for the small set of command messages it inspects are a self-consistent
//! simplified encoding local to this codec (only message identity, the
//! embedded MAV_CMD id, and a handful of named parameters are needed for
//! classification and bounds checking — the full dialect is an external
//! assumption per the gateway's scope).

use dashmap::DashMap;
use std::collections::HashMap;
use std::net::SocketAddr;

pub const MAGIC_V2: u8 = 0xFD;
pub const HEADER_LEN: usize = 10; // magic + len + incompat + compat + seq + sysid + compid + msgid(3)
const MAX_PAYLOAD: usize = 255;
const MAX_PEER_BUFFER: usize = 8192;
const SIGNATURE_LEN: usize = 13;
const INCOMPAT_SIGNED: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Heartbeat,
    CommandLong,
    CommandInt,
    SetMode,
    SetPositionTargetLocalNed,
    SetPositionTargetGlobalInt,
    SetAttitudeTarget,
    MissionItem,
    MissionItemInt,
    MissionCount,
    MissionClearAll,
    ParamSet,
    ManualControl,
    GpsRawInt,
    Unknown(u32),
}

impl MessageType {
    fn from_id(id: u32) -> Self {
        match id {
            0 => MessageType::Heartbeat,
            76 => MessageType::CommandLong,
            75 => MessageType::CommandInt,
            11 => MessageType::SetMode,
            84 => MessageType::SetPositionTargetLocalNed,
            86 => MessageType::SetPositionTargetGlobalInt,
            82 => MessageType::SetAttitudeTarget,
            39 => MessageType::MissionItem,
            73 => MessageType::MissionItemInt,
            44 => MessageType::MissionCount,
            45 => MessageType::MissionClearAll,
            23 => MessageType::ParamSet,
            69 => MessageType::ManualControl,
            24 => MessageType::GpsRawInt,
            other => MessageType::Unknown(other),
        }
    }

    fn wire_id(&self) -> u32 {
        match self {
            MessageType::Heartbeat => 0,
            MessageType::CommandLong => 76,
            MessageType::CommandInt => 75,
            MessageType::SetMode => 11,
            MessageType::SetPositionTargetLocalNed => 84,
            MessageType::SetPositionTargetGlobalInt => 86,
            MessageType::SetAttitudeTarget => 82,
            MessageType::MissionItem => 39,
            MessageType::MissionItemInt => 73,
            MessageType::MissionCount => 44,
            MessageType::MissionClearAll => 45,
            MessageType::ParamSet => 23,
            MessageType::ManualControl => 69,
            MessageType::GpsRawInt => 24,
            MessageType::Unknown(id) => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Navigation,
    ModeChange,
    ArmDisarm,
    TakeoffLand,
    MissionUpdate,
    ParameterChange,
    Emergency,
    TelemetryRequest,
    Manual,
    Unknown,
}

/// MAV_CMD ids carried in the `command` field of COMMAND_LONG/COMMAND_INT.
mod mav_cmd {
    pub const NAV_WAYPOINT: u16 = 16;
    pub const NAV_RETURN_TO_LAUNCH: u16 = 20;
    pub const NAV_LAND: u16 = 21;
    pub const NAV_TAKEOFF: u16 = 22;
    pub const COMPONENT_ARM_DISARM: u16 = 400;
    pub const DO_SET_MODE: u16 = 176;
}

/// Exposes `NAV_TAKEOFF`'s wire id for detectors that need to distinguish
/// takeoff from land within a `TakeoffLand`-classified command.
pub fn mav_cmd_takeoff() -> u16 {
    mav_cmd::NAV_TAKEOFF
}

/// Exposes `NAV_RETURN_TO_LAUNCH`'s wire id, used by the gateway to
/// synthesize a failsafe RTL `COMMAND_LONG` on egress.
pub fn mav_cmd_rtl() -> u16 {
    mav_cmd::NAV_RETURN_TO_LAUNCH
}

fn classify_command_id(cmd: u16) -> CommandKind {
    match cmd {
        mav_cmd::NAV_WAYPOINT => CommandKind::Navigation,
        mav_cmd::NAV_RETURN_TO_LAUNCH => CommandKind::Emergency,
        mav_cmd::NAV_LAND | mav_cmd::NAV_TAKEOFF => CommandKind::TakeoffLand,
        mav_cmd::COMPONENT_ARM_DISARM => CommandKind::ArmDisarm,
        mav_cmd::DO_SET_MODE => CommandKind::ModeChange,
        _ => CommandKind::Unknown,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Number(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            ParamValue::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedCommand {
    pub message_type: MessageType,
    pub message_id: u32,
    pub source_system: u8,
    pub source_component: u8,
    pub command_kind: CommandKind,
    pub params: HashMap<String, ParamValue>,
    pub ingress_timestamp_ns: u64,
}

impl ParsedCommand {
    pub fn param_f64(&self, name: &str) -> Option<f64> {
        self.params.get(name).and_then(|v| v.as_f64())
    }

    /// Cheap content hash used for semantic replay-dedup (kind + numeric params).
    pub fn content_hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut h = std::collections::hash_map::DefaultHasher::new();
        self.message_id.hash(&mut h);
        let mut keys: Vec<&String> = self.params.keys().collect();
        keys.sort();
        for k in keys {
            k.hash(&mut h);
            match &self.params[k] {
                ParamValue::Number(n) => n.to_bits().hash(&mut h),
                ParamValue::Text(s) => s.hash(&mut h),
            }
        }
        h.finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    BufferOverflow,
    BadChecksum,
    Truncated,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::BufferOverflow => write!(f, "per-peer parse buffer overflow"),
            ParseError::BadChecksum => write!(f, "checksum mismatch"),
            ParseError::Truncated => write!(f, "truncated frame"),
        }
    }
}

/// CRC-16/MCRF4XX accumulator, matching the MAVLink reference implementation.
pub fn crc_accumulate(data: u8, crc: &mut u16) {
    let mut tmp = data ^ (*crc as u8);
    tmp ^= tmp << 4;
    *crc = (*crc >> 8) ^ ((tmp as u16) << 8) ^ ((tmp as u16) << 3) ^ (tmp as u16 >> 4);
}

pub fn crc_compute(header_tail: &[u8], payload: &[u8], crc_extra: u8) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in header_tail {
        crc_accumulate(b, &mut crc);
    }
    for &b in payload {
        crc_accumulate(b, &mut crc);
    }
    crc_accumulate(crc_extra, &mut crc);
    crc
}

fn crc_extra_for(id: u32) -> u8 {
    // Per-message seed, analogous to MAVLink's CRC_EXTRA table. These are
    // self-consistent within this codec (no third party exchanges frames
    // with this gateway) rather than the upstream dialect's published table.
    (id.wrapping_mul(37).wrapping_add(11) % 251) as u8
}

/// Buffers partial frames per source address and yields complete frames.
pub struct FrameParser {
    peer_buffers: DashMap<SocketAddr, Vec<u8>>,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            peer_buffers: DashMap::new(),
        }
    }

    /// Feeds newly received bytes from `peer` and returns every
    /// successfully- or unsuccessfully-parsed frame found so far.
    pub fn feed(
        &self,
        peer: SocketAddr,
        bytes: &[u8],
        now_ns: u64,
    ) -> Vec<Result<ParsedCommand, ParseError>> {
        let mut buf = self.peer_buffers.entry(peer).or_default();
        buf.extend_from_slice(bytes);
        if buf.len() > MAX_PEER_BUFFER {
            buf.clear();
            return vec![Err(ParseError::BufferOverflow)];
        }

        let mut out = Vec::new();
        loop {
            match try_parse_one(&buf) {
                ParseOutcome::Need => break,
                ParseOutcome::Consumed { len, result } => {
                    if let Some(result) = result {
                        out.push(result.map(|mut p| {
                            p.ingress_timestamp_ns = now_ns;
                            p
                        }));
                    }
                    buf.drain(0..len);
                }
            }
        }
        out
    }

    /// Like [`feed`](Self::feed), but also returns the exact wire bytes of
    /// each successfully-parsed frame so the gateway can forward an
    /// `accept`ed command's original bytes unchanged on egress.
    /// Frames that fail to parse carry no bytes worth keeping.
    pub fn feed_framed(
        &self,
        peer: SocketAddr,
        bytes: &[u8],
        now_ns: u64,
    ) -> Vec<(Vec<u8>, Result<ParsedCommand, ParseError>)> {
        let mut buf = self.peer_buffers.entry(peer).or_default();
        buf.extend_from_slice(bytes);
        if buf.len() > MAX_PEER_BUFFER {
            buf.clear();
            return vec![(Vec::new(), Err(ParseError::BufferOverflow))];
        }

        let mut out = Vec::new();
        loop {
            match try_parse_one(&buf) {
                ParseOutcome::Need => break,
                ParseOutcome::Consumed { len, result } => {
                    if let Some(result) = result {
                        let frame_bytes = buf[0..len].to_vec();
                        out.push((
                            frame_bytes,
                            result.map(|mut p| {
                                p.ingress_timestamp_ns = now_ns;
                                p
                            }),
                        ));
                    }
                    buf.drain(0..len);
                }
            }
        }
        out
    }

    pub fn reset_peer(&self, peer: &SocketAddr) {
        self.peer_buffers.remove(peer);
    }
}

enum ParseOutcome {
    Need,
    Consumed {
        len: usize,
        result: Option<Result<ParsedCommand, ParseError>>,
    },
}

fn try_parse_one(buf: &[u8]) -> ParseOutcome {
    // Resync to the next magic byte, dropping garbage ahead of it.
    let Some(start) = buf.iter().position(|&b| b == MAGIC_V2) else {
        return if buf.is_empty() {
            ParseOutcome::Need
        } else {
            ParseOutcome::Consumed {
                len: buf.len(),
                result: None,
            }
        };
    };
    if start > 0 {
        return ParseOutcome::Consumed {
            len: start,
            result: None,
        };
    }
    if buf.len() < HEADER_LEN {
        return ParseOutcome::Need;
    }

    let payload_len = buf[1] as usize;
    let incompat_flags = buf[2];
    let signed = incompat_flags & INCOMPAT_SIGNED != 0;
    let tail_len = 2 + if signed { SIGNATURE_LEN } else { 0 };
    let total_len = HEADER_LEN + payload_len + tail_len;

    if payload_len > MAX_PAYLOAD {
        // Not a sane v2 frame at this offset; drop the magic byte and resync.
        return ParseOutcome::Consumed {
            len: 1,
            result: Some(Err(ParseError::Truncated)),
        };
    }
    if buf.len() < total_len {
        return ParseOutcome::Need;
    }

    let seq = buf[4];
    let sysid = buf[5];
    let compid = buf[6];
    let msgid = (buf[7] as u32) | ((buf[8] as u32) << 8) | ((buf[9] as u32) << 16);
    let payload = &buf[HEADER_LEN..HEADER_LEN + payload_len];
    let crc_lo = buf[HEADER_LEN + payload_len];
    let crc_hi = buf[HEADER_LEN + payload_len + 1];
    let got_crc = (crc_lo as u16) | ((crc_hi as u16) << 8);

    let header_tail = &buf[1..HEADER_LEN]; // len..msgid, excludes magic
    let expect_crc = crc_compute(header_tail, payload, crc_extra_for(msgid));

    let _ = seq;
    if got_crc != expect_crc {
        return ParseOutcome::Consumed {
            len: total_len,
            result: Some(Err(ParseError::BadChecksum)),
        };
    }

    let result = decode_payload(msgid, sysid, compid, payload);
    ParseOutcome::Consumed {
        len: total_len,
        result: Some(Ok(result)),
    }
}

fn decode_payload(msgid: u32, sysid: u8, compid: u8, payload: &[u8]) -> ParsedCommand {
    let message_type = MessageType::from_id(msgid);
    let mut params = HashMap::new();

    let command_kind = match message_type {
        MessageType::Heartbeat => CommandKind::TelemetryRequest,
        MessageType::GpsRawInt => CommandKind::TelemetryRequest,
        MessageType::SetMode => {
            if let Some(mode) = read_u32(payload, 0) {
                params.insert("custom_mode".into(), ParamValue::Number(mode as f64));
            }
            CommandKind::ModeChange
        }
        MessageType::CommandLong => {
            let command = read_u16(payload, 28).unwrap_or(0);
            for (i, name) in ["param1", "param2", "param3", "param4", "param5", "param6", "param7"]
                .iter()
                .enumerate()
            {
                if let Some(v) = read_f32(payload, i * 4) {
                    params.insert((*name).into(), ParamValue::Number(v as f64));
                }
            }
            params.insert("command".into(), ParamValue::Number(command as f64));
            classify_command_id(command)
        }
        MessageType::CommandInt => {
            let command = read_u16(payload, 16).unwrap_or(0);
            for (i, name) in ["param1", "param2", "param3", "param4"].iter().enumerate() {
                if let Some(v) = read_f32(payload, i * 4) {
                    params.insert((*name).into(), ParamValue::Number(v as f64));
                }
            }
            if let (Some(x), Some(y)) = (read_i32(payload, 18), read_i32(payload, 22)) {
                params.insert("lat".into(), ParamValue::Number(x as f64 / 1e7));
                params.insert("lon".into(), ParamValue::Number(y as f64 / 1e7));
            }
            if let Some(z) = read_f32(payload, 26) {
                params.insert("alt".into(), ParamValue::Number(z as f64));
            }
            params.insert("command".into(), ParamValue::Number(command as f64));
            classify_command_id(command)
        }
        MessageType::SetPositionTargetLocalNed | MessageType::SetPositionTargetGlobalInt => {
            if let (Some(vx), Some(vy), Some(vz)) = (
                read_f32(payload, 4),
                read_f32(payload, 8),
                read_f32(payload, 12),
            ) {
                params.insert("vx".into(), ParamValue::Number(vx as f64));
                params.insert("vy".into(), ParamValue::Number(vy as f64));
                params.insert("vz".into(), ParamValue::Number(vz as f64));
            }
            CommandKind::Navigation
        }
        MessageType::SetAttitudeTarget => {
            if let Some(thrust) = read_f32(payload, 20) {
                params.insert("throttle".into(), ParamValue::Number(thrust as f64));
            }
            CommandKind::Navigation
        }
        MessageType::MissionItem
        | MessageType::MissionItemInt
        | MessageType::MissionCount
        | MessageType::MissionClearAll => CommandKind::MissionUpdate,
        MessageType::ParamSet => {
            if let Some(v) = read_f32(payload, 0) {
                params.insert("param_value".into(), ParamValue::Number(v as f64));
            }
            CommandKind::ParameterChange
        }
        MessageType::ManualControl => {
            for (i, name) in ["x", "y", "z", "r"].iter().enumerate() {
                if let Some(v) = read_i16(payload, i * 2) {
                    params.insert((*name).into(), ParamValue::Number(v as f64));
                }
            }
            CommandKind::Manual
        }
        MessageType::Unknown(_) => CommandKind::Unknown,
    };

    ParsedCommand {
        message_type,
        message_id: msgid,
        source_system: sysid,
        source_component: compid,
        command_kind,
        params,
        ingress_timestamp_ns: 0,
    }
}

fn read_f32(b: &[u8], off: usize) -> Option<f32> {
    b.get(off..off + 4).map(|s| f32::from_le_bytes(s.try_into().unwrap()))
}
fn read_u32(b: &[u8], off: usize) -> Option<u32> {
    b.get(off..off + 4).map(|s| u32::from_le_bytes(s.try_into().unwrap()))
}
fn read_i32(b: &[u8], off: usize) -> Option<i32> {
    b.get(off..off + 4).map(|s| i32::from_le_bytes(s.try_into().unwrap()))
}
fn read_u16(b: &[u8], off: usize) -> Option<u16> {
    b.get(off..off + 2).map(|s| u16::from_le_bytes(s.try_into().unwrap()))
}
fn read_i16(b: &[u8], off: usize) -> Option<i16> {
    b.get(off..off + 2).map(|s| i16::from_le_bytes(s.try_into().unwrap()))
}

/// Encodes a minimal COMMAND_LONG frame, used by the gateway to emit
/// synthetic failsafe commands (e.g. RTL) on egress.
pub fn encode_command_long(
    seq: u8,
    sysid: u8,
    compid: u8,
    command: u16,
    params: [f32; 7],
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(33);
    for p in params {
        payload.extend_from_slice(&p.to_le_bytes());
    }
    payload.extend_from_slice(&command.to_le_bytes());
    payload.push(1); // target_system
    payload.push(1); // target_component
    payload.push(0); // confirmation

    encode_frame(seq, sysid, compid, 76, &payload)
}

pub fn encode_frame(seq: u8, sysid: u8, compid: u8, msgid: u32, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + 2);
    frame.push(MAGIC_V2);
    frame.push(payload.len() as u8);
    frame.push(0); // incompat_flags
    frame.push(0); // compat_flags
    frame.push(seq);
    frame.push(sysid);
    frame.push(compid);
    frame.push((msgid & 0xFF) as u8);
    frame.push(((msgid >> 8) & 0xFF) as u8);
    frame.push(((msgid >> 16) & 0xFF) as u8);
    frame.extend_from_slice(payload);

    let header_tail = &frame[1..HEADER_LEN];
    let crc = crc_compute(header_tail, payload, crc_extra_for(msgid));
    frame.push((crc & 0xFF) as u8);
    frame.push(((crc >> 8) & 0xFF) as u8);
    frame
}

/// Rebuilds a frame with the same seq/sysid/compid/msgid as `original` but a
/// replaced payload, recomputing the CRC. Used by the gateway to forward a
/// `constrain`-decided command with clamped parameter bytes rather than the
/// original wire bytes, so a constrained command still forwards something
/// the FC can execute instead of being dropped outright.
pub fn reencode_with_payload(original: &[u8], new_payload: &[u8]) -> Option<Vec<u8>> {
    if original.len() < HEADER_LEN {
        return None;
    }
    let seq = original[4];
    let sysid = original[5];
    let compid = original[6];
    let msgid = (original[7] as u32) | ((original[8] as u32) << 8) | ((original[9] as u32) << 16);
    Some(encode_frame(seq, sysid, compid, msgid, new_payload))
}

/// Byte offset of a `CommandInt`/`SetAttitudeTarget` payload field within
/// the payload region, matching `decode_payload`'s own offsets. Returns
/// `(offset, width)` where width is 4 for an f32/i32 field.
pub fn payload_field_offset(message_type: MessageType, field: &str) -> Option<usize> {
    match (message_type, field) {
        (MessageType::CommandInt, "lat") => Some(18),
        (MessageType::CommandInt, "lon") => Some(22),
        (MessageType::CommandInt, "alt") => Some(26),
        (MessageType::SetAttitudeTarget, "throttle") => Some(20),
        _ => None,
    }
}
