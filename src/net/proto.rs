//! Mesh message schemas and CBOR encoding.
//!
//! Every TCP frame carries an [`Envelope`]: sender identity, sender address,
//! a vector-clock stamp, and one tagged [`Message`]. The encoding is a
//! self-describing CBOR map with a string `kind` tag; unknown kinds and
//! trailing bytes are rejected. UDP presence beacons use the smaller
//! [`Beacon`] record with the same conventions.

use std::convert::Infallible;
use std::net::IpAddr;

use minicbor::data::Type;
use minicbor::{Decoder, Encoder};
use thiserror::Error;
use uuid::Uuid;

use crate::core::{NodeId, RepeatMode, Track, TrackId, VectorClock};

/// Wire envelope for every TCP message.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub sender: NodeId,
    pub sender_ip: IpAddr,
    pub clock: VectorClock,
    pub message: Message,
}

/// Complete replicated-state snapshot sent to late joiners.
#[derive(Clone, Debug, PartialEq)]
pub struct FullState {
    pub playlist: Vec<Track>,
    pub current_track: Option<Track>,
    pub position_seconds: f64,
    pub duration_seconds: f64,
    pub is_playing: bool,
    pub shuffle: bool,
    pub repeat_mode: RepeatMode,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// First frame on any new connection; also sent as a reply so both
    /// sides learn `{id, name, port}`.
    Hello {
        tcp_port: u16,
        display_name: String,
        is_reply: bool,
    },
    /// Host -> newcomer: who the leader is.
    Welcome { leader: NodeId },
    /// Campaigner -> higher-ranked peer.
    Election { uptime_secs: u64 },
    /// Higher-ranked peer acknowledges a campaign and commits to taking over.
    Answer,
    /// Winner -> all.
    Coordinator { leader: NodeId },
    /// Host liveness, 1 Hz.
    Heartbeat,
    /// Newcomer -> Host.
    RequestState,
    /// Host -> newcomer: full snapshot.
    FullState(Box<FullState>),
    /// Any peer -> all: append a track.
    QueueAdd { track: Track },
    /// Host -> all: remove by id.
    QueueRemove { track_id: TrackId },
    /// Host -> all: empty the playlist.
    QueueClear,
    /// Host -> all: the current track changed (`None` at queue end).
    NowPlaying { track: Option<Track> },
    /// Host -> all: position/duration/playing, 1 Hz while active.
    PlaybackSync {
        position_seconds: f64,
        duration_seconds: f64,
        is_playing: bool,
    },
    /// Host -> all: toggles changed.
    PlaybackStatus {
        is_playing: bool,
        shuffle: bool,
        repeat_mode: RepeatMode,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Hello,
    Welcome,
    Election,
    Answer,
    Coordinator,
    Heartbeat,
    RequestState,
    FullState,
    QueueAdd,
    QueueRemove,
    QueueClear,
    NowPlaying,
    PlaybackSync,
    PlaybackStatus,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Hello => "HELLO",
            MessageKind::Welcome => "WELCOME",
            MessageKind::Election => "ELECTION",
            MessageKind::Answer => "ANSWER",
            MessageKind::Coordinator => "COORDINATOR",
            MessageKind::Heartbeat => "HEARTBEAT",
            MessageKind::RequestState => "REQUEST_STATE",
            MessageKind::FullState => "FULL_STATE",
            MessageKind::QueueAdd => "QUEUE_ADD",
            MessageKind::QueueRemove => "QUEUE_REMOVE",
            MessageKind::QueueClear => "QUEUE_CLEAR",
            MessageKind::NowPlaying => "NOW_PLAYING",
            MessageKind::PlaybackSync => "PLAYBACK_SYNC",
            MessageKind::PlaybackStatus => "PLAYBACK_STATUS",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "HELLO" => Some(MessageKind::Hello),
            "WELCOME" => Some(MessageKind::Welcome),
            "ELECTION" => Some(MessageKind::Election),
            "ANSWER" => Some(MessageKind::Answer),
            "COORDINATOR" => Some(MessageKind::Coordinator),
            "HEARTBEAT" => Some(MessageKind::Heartbeat),
            "REQUEST_STATE" => Some(MessageKind::RequestState),
            "FULL_STATE" => Some(MessageKind::FullState),
            "QUEUE_ADD" => Some(MessageKind::QueueAdd),
            "QUEUE_REMOVE" => Some(MessageKind::QueueRemove),
            "QUEUE_CLEAR" => Some(MessageKind::QueueClear),
            "NOW_PLAYING" => Some(MessageKind::NowPlaying),
            "PLAYBACK_SYNC" => Some(MessageKind::PlaybackSync),
            "PLAYBACK_STATUS" => Some(MessageKind::PlaybackStatus),
            _ => None,
        }
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Hello { .. } => MessageKind::Hello,
            Message::Welcome { .. } => MessageKind::Welcome,
            Message::Election { .. } => MessageKind::Election,
            Message::Answer => MessageKind::Answer,
            Message::Coordinator { .. } => MessageKind::Coordinator,
            Message::Heartbeat => MessageKind::Heartbeat,
            Message::RequestState => MessageKind::RequestState,
            Message::FullState(_) => MessageKind::FullState,
            Message::QueueAdd { .. } => MessageKind::QueueAdd,
            Message::QueueRemove { .. } => MessageKind::QueueRemove,
            Message::QueueClear => MessageKind::QueueClear,
            Message::NowPlaying { .. } => MessageKind::NowPlaying,
            Message::PlaybackSync { .. } => MessageKind::PlaybackSync,
            Message::PlaybackStatus { .. } => MessageKind::PlaybackStatus,
        }
    }

    /// Whether this kind participates in vector-clock causal delivery.
    ///
    /// Causal kinds increment the sender's own clock entry before they are
    /// transmitted; everything else is control-plane and applies in receipt
    /// order.
    pub fn is_causal(&self) -> bool {
        matches!(
            self.kind(),
            MessageKind::QueueAdd
                | MessageKind::QueueRemove
                | MessageKind::QueueClear
                | MessageKind::FullState
        )
    }
}

/// UDP presence beacon.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Beacon {
    pub node_id: NodeId,
    pub ip: IpAddr,
    pub tcp_port: u16,
}

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("cbor encode: {0}")]
    Encode(#[from] minicbor::encode::Error<Infallible>),
    #[error("cbor decode: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("indefinite-length CBOR not allowed")]
    IndefiniteLength,
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },
    #[error("unknown message kind: {0}")]
    UnknownKind(String),
    #[error("trailing bytes after message body")]
    TrailingBytes,
}

type EncoderTo<'a> = Encoder<&'a mut Vec<u8>>;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, ProtoError> {
    let mut buf = Vec::new();
    let mut e = Encoder::new(&mut buf);
    e.map(5)?;
    e.str("sender")?.str(envelope.sender.as_str())?;
    e.str("ip")?.str(&envelope.sender_ip.to_string())?;
    e.str("kind")?.str(envelope.message.kind().as_str())?;
    e.str("clock")?;
    encode_clock(&mut e, &envelope.clock)?;
    e.str("body")?;
    encode_body(&mut e, &envelope.message)?;
    Ok(buf)
}

fn encode_clock(e: &mut EncoderTo<'_>, clock: &VectorClock) -> Result<(), ProtoError> {
    e.map(clock.len() as u64)?;
    for (id, count) in clock.iter() {
        e.str(id.as_str())?.u64(count)?;
    }
    Ok(())
}

fn encode_body(e: &mut EncoderTo<'_>, message: &Message) -> Result<(), ProtoError> {
    match message {
        Message::Hello {
            tcp_port,
            display_name,
            is_reply,
        } => {
            e.map(3)?;
            e.str("tcp_port")?.u16(*tcp_port)?;
            e.str("name")?.str(display_name)?;
            e.str("reply")?.bool(*is_reply)?;
        }
        Message::Welcome { leader } => {
            e.map(1)?;
            e.str("leader")?.str(leader.as_str())?;
        }
        Message::Election { uptime_secs } => {
            e.map(1)?;
            e.str("uptime")?.u64(*uptime_secs)?;
        }
        Message::Answer | Message::Heartbeat | Message::RequestState | Message::QueueClear => {
            e.map(0)?;
        }
        Message::Coordinator { leader } => {
            e.map(1)?;
            e.str("leader")?.str(leader.as_str())?;
        }
        Message::FullState(state) => {
            e.map(7)?;
            e.str("playlist")?;
            e.array(state.playlist.len() as u64)?;
            for track in &state.playlist {
                encode_track(e, track)?;
            }
            e.str("current")?;
            encode_opt_track(e, state.current_track.as_ref())?;
            e.str("position")?.f64(state.position_seconds)?;
            e.str("duration")?.f64(state.duration_seconds)?;
            e.str("playing")?.bool(state.is_playing)?;
            e.str("shuffle")?.bool(state.shuffle)?;
            e.str("repeat")?.str(state.repeat_mode.as_str())?;
        }
        Message::QueueAdd { track } => {
            e.map(1)?;
            e.str("track")?;
            encode_track(e, track)?;
        }
        Message::QueueRemove { track_id } => {
            e.map(1)?;
            e.str("track_id")?.str(&track_id.to_string())?;
        }
        Message::NowPlaying { track } => {
            e.map(1)?;
            e.str("track")?;
            encode_opt_track(e, track.as_ref())?;
        }
        Message::PlaybackSync {
            position_seconds,
            duration_seconds,
            is_playing,
        } => {
            e.map(3)?;
            e.str("position")?.f64(*position_seconds)?;
            e.str("duration")?.f64(*duration_seconds)?;
            e.str("playing")?.bool(*is_playing)?;
        }
        Message::PlaybackStatus {
            is_playing,
            shuffle,
            repeat_mode,
        } => {
            e.map(3)?;
            e.str("playing")?.bool(*is_playing)?;
            e.str("shuffle")?.bool(*shuffle)?;
            e.str("repeat")?.str(repeat_mode.as_str())?;
        }
    }
    Ok(())
}

fn encode_track(e: &mut EncoderTo<'_>, track: &Track) -> Result<(), ProtoError> {
    e.map(6)?;
    e.str("id")?.str(&track.id.to_string())?;
    e.str("title")?.str(&track.title)?;
    e.str("artist")?.str(&track.artist)?;
    e.str("path")?.str(&track.file_path)?;
    e.str("added_by")?.str(track.added_by.as_str())?;
    e.str("added_at")?.u64(track.added_at_ms)?;
    Ok(())
}

fn encode_opt_track(e: &mut EncoderTo<'_>, track: Option<&Track>) -> Result<(), ProtoError> {
    match track {
        Some(track) => encode_track(e, track),
        None => {
            e.null()?;
            Ok(())
        }
    }
}

pub fn encode_beacon(beacon: &Beacon) -> Result<Vec<u8>, ProtoError> {
    let mut buf = Vec::new();
    let mut e = Encoder::new(&mut buf);
    e.map(4)?;
    e.str("kind")?.str("HELLO")?;
    e.str("id")?.str(beacon.node_id.as_str())?;
    e.str("ip")?.str(&beacon.ip.to_string())?;
    e.str("port")?.u16(beacon.tcp_port)?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, ProtoError> {
    let mut d = Decoder::new(bytes);
    expect_map(&mut d, 5, "envelope")?;

    expect_key(&mut d, "sender")?;
    let sender = NodeId::new(d.str()?);

    expect_key(&mut d, "ip")?;
    let sender_ip = parse_ip(d.str()?, "ip")?;

    expect_key(&mut d, "kind")?;
    let raw_kind = d.str()?;
    let kind = MessageKind::parse(raw_kind)
        .ok_or_else(|| ProtoError::UnknownKind(raw_kind.to_string()))?;

    expect_key(&mut d, "clock")?;
    let clock = decode_clock(&mut d)?;

    expect_key(&mut d, "body")?;
    let message = decode_body(&mut d, kind)?;

    if d.position() != bytes.len() {
        return Err(ProtoError::TrailingBytes);
    }

    Ok(Envelope {
        sender,
        sender_ip,
        clock,
        message,
    })
}

fn decode_clock(d: &mut Decoder<'_>) -> Result<VectorClock, ProtoError> {
    let len = d.map()?.ok_or(ProtoError::IndefiniteLength)?;
    let mut entries = Vec::with_capacity(len.min(256) as usize);
    for _ in 0..len {
        let id = NodeId::new(d.str()?);
        let count = d.u64()?;
        entries.push((id, count));
    }
    Ok(entries.into_iter().collect())
}

fn decode_body(d: &mut Decoder<'_>, kind: MessageKind) -> Result<Message, ProtoError> {
    match kind {
        MessageKind::Hello => {
            expect_map(d, 3, "body")?;
            expect_key(d, "tcp_port")?;
            let tcp_port = d.u16()?;
            expect_key(d, "name")?;
            let display_name = d.str()?.to_string();
            expect_key(d, "reply")?;
            let is_reply = d.bool()?;
            Ok(Message::Hello {
                tcp_port,
                display_name,
                is_reply,
            })
        }
        MessageKind::Welcome => {
            expect_map(d, 1, "body")?;
            expect_key(d, "leader")?;
            Ok(Message::Welcome {
                leader: NodeId::new(d.str()?),
            })
        }
        MessageKind::Election => {
            expect_map(d, 1, "body")?;
            expect_key(d, "uptime")?;
            Ok(Message::Election {
                uptime_secs: d.u64()?,
            })
        }
        MessageKind::Answer => {
            expect_map(d, 0, "body")?;
            Ok(Message::Answer)
        }
        MessageKind::Coordinator => {
            expect_map(d, 1, "body")?;
            expect_key(d, "leader")?;
            Ok(Message::Coordinator {
                leader: NodeId::new(d.str()?),
            })
        }
        MessageKind::Heartbeat => {
            expect_map(d, 0, "body")?;
            Ok(Message::Heartbeat)
        }
        MessageKind::RequestState => {
            expect_map(d, 0, "body")?;
            Ok(Message::RequestState)
        }
        MessageKind::FullState => {
            expect_map(d, 7, "body")?;
            expect_key(d, "playlist")?;
            let len = d.array()?.ok_or(ProtoError::IndefiniteLength)?;
            let mut playlist = Vec::with_capacity(len.min(1024) as usize);
            for _ in 0..len {
                playlist.push(decode_track(d)?);
            }
            expect_key(d, "current")?;
            let current_track = decode_opt_track(d)?;
            expect_key(d, "position")?;
            let position_seconds = d.f64()?;
            expect_key(d, "duration")?;
            let duration_seconds = d.f64()?;
            expect_key(d, "playing")?;
            let is_playing = d.bool()?;
            expect_key(d, "shuffle")?;
            let shuffle = d.bool()?;
            expect_key(d, "repeat")?;
            let repeat_mode = parse_repeat(d.str()?)?;
            Ok(Message::FullState(Box::new(FullState {
                playlist,
                current_track,
                position_seconds,
                duration_seconds,
                is_playing,
                shuffle,
                repeat_mode,
            })))
        }
        MessageKind::QueueAdd => {
            expect_map(d, 1, "body")?;
            expect_key(d, "track")?;
            Ok(Message::QueueAdd {
                track: decode_track(d)?,
            })
        }
        MessageKind::QueueRemove => {
            expect_map(d, 1, "body")?;
            expect_key(d, "track_id")?;
            Ok(Message::QueueRemove {
                track_id: parse_track_id(d.str()?)?,
            })
        }
        MessageKind::QueueClear => {
            expect_map(d, 0, "body")?;
            Ok(Message::QueueClear)
        }
        MessageKind::NowPlaying => {
            expect_map(d, 1, "body")?;
            expect_key(d, "track")?;
            Ok(Message::NowPlaying {
                track: decode_opt_track(d)?,
            })
        }
        MessageKind::PlaybackSync => {
            expect_map(d, 3, "body")?;
            expect_key(d, "position")?;
            let position_seconds = d.f64()?;
            expect_key(d, "duration")?;
            let duration_seconds = d.f64()?;
            expect_key(d, "playing")?;
            let is_playing = d.bool()?;
            Ok(Message::PlaybackSync {
                position_seconds,
                duration_seconds,
                is_playing,
            })
        }
        MessageKind::PlaybackStatus => {
            expect_map(d, 3, "body")?;
            expect_key(d, "playing")?;
            let is_playing = d.bool()?;
            expect_key(d, "shuffle")?;
            let shuffle = d.bool()?;
            expect_key(d, "repeat")?;
            let repeat_mode = parse_repeat(d.str()?)?;
            Ok(Message::PlaybackStatus {
                is_playing,
                shuffle,
                repeat_mode,
            })
        }
    }
}

fn decode_track(d: &mut Decoder<'_>) -> Result<Track, ProtoError> {
    expect_map(d, 6, "track")?;
    expect_key(d, "id")?;
    let id = parse_track_id(d.str()?)?;
    expect_key(d, "title")?;
    let title = d.str()?.to_string();
    expect_key(d, "artist")?;
    let artist = d.str()?.to_string();
    expect_key(d, "path")?;
    let file_path = d.str()?.to_string();
    expect_key(d, "added_by")?;
    let added_by = NodeId::new(d.str()?);
    expect_key(d, "added_at")?;
    let added_at_ms = d.u64()?;
    Ok(Track {
        id,
        title,
        artist,
        file_path,
        added_by,
        added_at_ms,
    })
}

fn decode_opt_track(d: &mut Decoder<'_>) -> Result<Option<Track>, ProtoError> {
    if d.datatype()? == Type::Null {
        d.null()?;
        Ok(None)
    } else {
        Ok(Some(decode_track(d)?))
    }
}

pub fn decode_beacon(bytes: &[u8]) -> Result<Beacon, ProtoError> {
    let mut d = Decoder::new(bytes);
    expect_map(&mut d, 4, "beacon")?;
    expect_key(&mut d, "kind")?;
    let kind = d.str()?;
    if kind != "HELLO" {
        return Err(ProtoError::UnknownKind(kind.to_string()));
    }
    expect_key(&mut d, "id")?;
    let node_id = NodeId::new(d.str()?);
    expect_key(&mut d, "ip")?;
    let ip = parse_ip(d.str()?, "ip")?;
    expect_key(&mut d, "port")?;
    let tcp_port = d.u16()?;
    Ok(Beacon {
        node_id,
        ip,
        tcp_port,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn expect_map(d: &mut Decoder<'_>, len: u64, field: &'static str) -> Result<(), ProtoError> {
    match d.map()? {
        Some(n) if n == len => Ok(()),
        Some(n) => Err(ProtoError::InvalidField {
            field,
            reason: format!("expected map of {len} entries, got {n}"),
        }),
        None => Err(ProtoError::IndefiniteLength),
    }
}

fn expect_key(d: &mut Decoder<'_>, expected: &'static str) -> Result<(), ProtoError> {
    let got = d.str()?;
    if got == expected {
        Ok(())
    } else {
        Err(ProtoError::InvalidField {
            field: expected,
            reason: format!("unexpected key {got:?}"),
        })
    }
}

fn parse_ip(raw: &str, field: &'static str) -> Result<IpAddr, ProtoError> {
    raw.parse().map_err(|_| ProtoError::InvalidField {
        field,
        reason: format!("not an ip address: {raw:?}"),
    })
}

fn parse_track_id(raw: &str) -> Result<TrackId, ProtoError> {
    Uuid::parse_str(raw)
        .map(TrackId::from_uuid)
        .map_err(|_| ProtoError::InvalidField {
            field: "track_id",
            reason: format!("not a uuid: {raw:?}"),
        })
}

fn parse_repeat(raw: &str) -> Result<RepeatMode, ProtoError> {
    match raw {
        "off" => Ok(RepeatMode::Off),
        "all" => Ok(RepeatMode::All),
        "one" => Ok(RepeatMode::One),
        other => Err(ProtoError::InvalidField {
            field: "repeat",
            reason: format!("unknown repeat mode {other:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn envelope(message: Message) -> Envelope {
        let mut clock = VectorClock::new();
        clock.increment(&NodeId::new("a1b2c3d4"));
        Envelope {
            sender: NodeId::new("a1b2c3d4"),
            sender_ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)),
            clock,
            message,
        }
    }

    fn track() -> Track {
        Track::from_path("/music/song.mp3", NodeId::new("a1b2c3d4"))
    }

    #[test]
    fn envelope_roundtrip_all_kinds() {
        let full = FullState {
            playlist: vec![track(), track()],
            current_track: Some(track()),
            position_seconds: 42.5,
            duration_seconds: 180.0,
            is_playing: true,
            shuffle: false,
            repeat_mode: RepeatMode::All,
        };
        let messages = vec![
            Message::Hello {
                tcp_port: 5001,
                display_name: "alice".into(),
                is_reply: false,
            },
            Message::Welcome {
                leader: NodeId::new("a1b2c3d4"),
            },
            Message::Election { uptime_secs: 600 },
            Message::Answer,
            Message::Coordinator {
                leader: NodeId::new("a1b2c3d4"),
            },
            Message::Heartbeat,
            Message::RequestState,
            Message::FullState(Box::new(full)),
            Message::QueueAdd { track: track() },
            Message::QueueRemove {
                track_id: TrackId::random(),
            },
            Message::QueueClear,
            Message::NowPlaying { track: None },
            Message::NowPlaying {
                track: Some(track()),
            },
            Message::PlaybackSync {
                position_seconds: 10.0,
                duration_seconds: 200.0,
                is_playing: false,
            },
            Message::PlaybackStatus {
                is_playing: true,
                shuffle: true,
                repeat_mode: RepeatMode::One,
            },
        ];

        for message in messages {
            let env = envelope(message);
            let bytes = encode_envelope(&env).unwrap();
            let decoded = decode_envelope(&bytes).unwrap();
            assert_eq!(decoded, env);
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let env = envelope(Message::Heartbeat);
        let mut bytes = encode_envelope(&env).unwrap();
        // Corrupt the kind tag in place: HEARTBEAT -> XEARTBEAT.
        let pos = bytes
            .windows(9)
            .position(|w| w == b"HEARTBEAT")
            .expect("kind tag present");
        bytes[pos] = b'X';
        assert!(matches!(
            decode_envelope(&bytes),
            Err(ProtoError::UnknownKind(_))
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let env = envelope(Message::Heartbeat);
        let mut bytes = encode_envelope(&env).unwrap();
        bytes.push(0x00);
        assert!(matches!(
            decode_envelope(&bytes),
            Err(ProtoError::TrailingBytes)
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_envelope(&[0xff, 0x00, 0x13, 0x37]).is_err());
    }

    #[test]
    fn causal_kinds() {
        assert!(Message::QueueAdd { track: track() }.is_causal());
        assert!(
            Message::QueueRemove {
                track_id: TrackId::random()
            }
            .is_causal()
        );
        assert!(Message::QueueClear.is_causal());
        assert!(
            Message::FullState(Box::new(FullState {
                playlist: vec![],
                current_track: None,
                position_seconds: 0.0,
                duration_seconds: 0.0,
                is_playing: false,
                shuffle: false,
                repeat_mode: RepeatMode::Off,
            }))
            .is_causal()
        );
        assert!(!Message::Heartbeat.is_causal());
        assert!(!Message::Answer.is_causal());
        assert!(
            !Message::Hello {
                tcp_port: 1,
                display_name: String::new(),
                is_reply: false
            }
            .is_causal()
        );
    }

    #[test]
    fn beacon_roundtrip() {
        let beacon = Beacon {
            node_id: NodeId::new("a1b2c3d4"),
            ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)),
            tcp_port: 5002,
        };
        let bytes = encode_beacon(&beacon).unwrap();
        assert_eq!(decode_beacon(&bytes).unwrap(), beacon);
    }

    #[test]
    fn beacon_rejects_foreign_kind() {
        let mut buf = Vec::new();
        let mut e = Encoder::new(&mut buf);
        e.map(4).unwrap();
        e.str("kind").unwrap().str("GOODBYE").unwrap();
        e.str("id").unwrap().str("x").unwrap();
        e.str("ip").unwrap().str("127.0.0.1").unwrap();
        e.str("port").unwrap().u16(1).unwrap();
        assert!(matches!(
            decode_beacon(&buf),
            Err(ProtoError::UnknownKind(_))
        ));
    }
}
