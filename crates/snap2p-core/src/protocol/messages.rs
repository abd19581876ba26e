// ============================================
// File: crates/snap2p-core/src/protocol/messages.rs
// ============================================
//! # Control Message Catalogue
//!
//! ## Creation Reason
//! Defines every control message exchanged between snap2p peers and the
//! canonical encoding of each, built on the map codec.
//!
//! ## Main Functionality
//! - `Message`: tagged union of all control messages
//! - `ErrorCode`: wire-stable protocol error codes
//! - `encode_message` / `decode_message` / `peek_tag`
//!
//! ## Message Catalogue
//! | Tag  | Name | Fields (short keys) |
//! |------|------|---------------------|
//! | 0x01 | HELLO | v, pk, n, ts, vis, cap |
//! | 0x02 | AUTH | att, hd |
//! | 0x03 | AUTH_OK | p, sid |
//! | 0x04 | AUTH_FAIL | ec, r? |
//! | 0x10 | OPEN_STREAM | sid, l? |
//! | 0x11 | CLOSE_STREAM | sid, ec? |
//! | 0x12 | STREAM_DATA | sid, d, f? |
//! | 0x20 | PING | seq, ts |
//! | 0x21 | PONG | seq, ts |
//! | 0x30 | KNOCK | it |
//! | 0x31 | KNOCK_RESPONSE | a |
//! | 0xFF | ERROR | ec, r? |
//!
//! Every message is a canonical map carrying its numeric tag under the
//! key `t`. Unknown fields are skipped on decode (and therefore dropped
//! on re-encode); an unknown tag is `UnsupportedTag`. Absent optional
//! booleans mean `false`.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Keys within each map MUST be written in UTF-8 byte order
//! - Tags 0x13-0x1F are reserved for future flow-control messages
//! - `ErrorCode` values are wire-stable: never renumber
//!
//! ## Last Modified
//! v0.1.0 - Initial message catalogue

use bytes::{Bytes, BytesMut};

use snap2p_common::types::Visibility;

use crate::error::{CoreError, Result};
use crate::protocol::codec::{
    put_array_header, put_bool, put_bytes, put_int, put_map_header, put_text, put_uint, Decoder,
};

// ============================================
// Constants
// ============================================

/// Current protocol version carried in HELLO.
pub const PROTOCOL_VERSION: u32 = 1;

/// Minimum invite-token length in bytes.
pub const INVITE_TOKEN_MIN: usize = 16;

/// Maximum invite-token length in bytes.
pub const INVITE_TOKEN_MAX: usize = 32;

/// Message tags.
pub mod tag {
    /// HELLO control message.
    pub const HELLO: u64 = 0x01;
    /// AUTH control message.
    pub const AUTH: u64 = 0x02;
    /// AUTH_OK control message.
    pub const AUTH_OK: u64 = 0x03;
    /// AUTH_FAIL control message.
    pub const AUTH_FAIL: u64 = 0x04;
    /// OPEN_STREAM control message.
    pub const OPEN_STREAM: u64 = 0x10;
    /// CLOSE_STREAM control message.
    pub const CLOSE_STREAM: u64 = 0x11;
    /// STREAM_DATA control message.
    pub const STREAM_DATA: u64 = 0x12;
    /// PING keepalive.
    pub const PING: u64 = 0x20;
    /// PONG keepalive reply.
    pub const PONG: u64 = 0x21;
    /// KNOCK stealth pre-auth.
    pub const KNOCK: u64 = 0x30;
    /// KNOCK_RESPONSE stealth pre-auth reply.
    pub const KNOCK_RESPONSE: u64 = 0x31;
    /// ERROR notification.
    pub const ERROR: u64 = 0xff;
}

// ============================================
// ErrorCode
// ============================================

/// Wire-stable protocol error codes.
///
/// Carried in AUTH_FAIL, CLOSE_STREAM and ERROR messages; values never
/// change across protocol revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    /// Unknown message tag or protocol version.
    VersionUnsupported = 1,
    /// Generic authentication failure.
    AuthFailed = 2,
    /// Remote principal not in the allowlist.
    NotAllowed = 3,
    /// STEALTH listener received no KNOCK.
    InviteRequired = 4,
    /// KNOCK token not recognized, expired, or exhausted.
    InvalidToken = 5,
    /// Attestation failed structural/signature/binding checks.
    AttestationInvalid = 6,
    /// Attestation expiry passed (skew adjusted).
    AttestationExpired = 7,
    /// Noise or I/O failure during the handshake.
    HandshakeFailed = 8,
    /// Stream id already in use.
    StreamIdInUse = 9,
    /// Stream id not found.
    StreamNotFound = 10,
    /// Stream already closed.
    StreamClosed = 11,
    /// Inbound stream refused by policy.
    StreamRefused = 12,
    /// Stream capacity reached.
    ResourceExhausted = 13,
    /// Transport closed.
    ConnectionClosed = 14,
    /// Operation timed out.
    Timeout = 15,
    /// Frame exceeds the size limit.
    MessageTooLarge = 16,
    /// Framing or codec failure.
    InvalidMessage = 17,
    /// Anything unclassified.
    Internal = 18,
}

impl ErrorCode {
    /// Returns the wire value of this code.
    #[must_use]
    pub const fn code(&self) -> u64 {
        *self as u64
    }

    /// Maps a wire value to an `ErrorCode`.
    ///
    /// Unknown values collapse to `Internal` so that peers speaking a
    /// newer revision still surface a typed error.
    #[must_use]
    pub const fn from_wire(value: u64) -> Self {
        match value {
            1 => Self::VersionUnsupported,
            2 => Self::AuthFailed,
            3 => Self::NotAllowed,
            4 => Self::InviteRequired,
            5 => Self::InvalidToken,
            6 => Self::AttestationInvalid,
            7 => Self::AttestationExpired,
            8 => Self::HandshakeFailed,
            9 => Self::StreamIdInUse,
            10 => Self::StreamNotFound,
            11 => Self::StreamClosed,
            12 => Self::StreamRefused,
            13 => Self::ResourceExhausted,
            14 => Self::ConnectionClosed,
            15 => Self::Timeout,
            16 => Self::MessageTooLarge,
            17 => Self::InvalidMessage,
            _ => Self::Internal,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::VersionUnsupported => "VERSION_UNSUPPORTED",
            Self::AuthFailed => "AUTH_FAILED",
            Self::NotAllowed => "NOT_ALLOWED",
            Self::InviteRequired => "INVITE_REQUIRED",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::AttestationInvalid => "ATTESTATION_INVALID",
            Self::AttestationExpired => "ATTESTATION_EXPIRED",
            Self::HandshakeFailed => "HANDSHAKE_FAILED",
            Self::StreamIdInUse => "STREAM_ID_IN_USE",
            Self::StreamNotFound => "STREAM_NOT_FOUND",
            Self::StreamClosed => "STREAM_CLOSED",
            Self::StreamRefused => "STREAM_REFUSED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::ConnectionClosed => "CONNECTION_CLOSED",
            Self::Timeout => "TIMEOUT",
            Self::MessageTooLarge => "MESSAGE_TOO_LARGE",
            Self::InvalidMessage => "INVALID_MESSAGE",
            Self::Internal => "INTERNAL",
        };
        f.write_str(name)
    }
}

// ============================================
// Message Structs
// ============================================

/// HELLO (0x01): first encrypted control message after Noise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// Protocol version (must be 1).
    pub version: u32,
    /// Sender's Ed25519 node public key.
    pub node_public_key: [u8; 32],
    /// Fresh random nonce.
    pub nonce: [u8; 32],
    /// Unix seconds at send time.
    pub timestamp: i64,
    /// Sender's visibility policy.
    pub visibility: Visibility,
    /// Advertised capability strings (may be empty).
    pub capabilities: Vec<String>,
}

/// AUTH (0x02): carries the serialized node-key attestation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auth {
    /// Serialized `NodeKeyAttestation`.
    pub attestation: Bytes,
    /// Reserved opaque extension data (currently empty).
    pub handshake_data: Bytes,
}

/// AUTH_OK (0x03): authentication acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOk {
    /// Principal string of the authenticated peer.
    pub principal: String,
    /// Session identifier (responder-chosen, initiator-echoed).
    pub session_id: [u8; 32],
}

/// AUTH_FAIL (0x04): authentication rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFail {
    /// Why authentication failed.
    pub error_code: ErrorCode,
    /// Optional human-readable detail.
    pub reason: Option<String>,
}

/// OPEN_STREAM (0x10): open a multiplexed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenStream {
    /// Stream id; parity matches the opener's role.
    pub stream_id: u64,
    /// Opaque debugging label.
    pub label: Option<String>,
}

/// CLOSE_STREAM (0x11): close a multiplexed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseStream {
    /// Stream id being closed.
    pub stream_id: u64,
    /// Error cause, absent for orderly close.
    pub error_code: Option<ErrorCode>,
}

/// STREAM_DATA (0x12): stream payload chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamData {
    /// Target stream id.
    pub stream_id: u64,
    /// Payload bytes (may be empty for a bare FIN).
    pub data: Bytes,
    /// End-of-stream marker for the sender's write side.
    pub fin: bool,
}

/// PING (0x20): keepalive probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    /// Monotonic probe sequence.
    pub sequence: u64,
    /// Unix seconds at send time.
    pub timestamp: i64,
}

/// PONG (0x21): keepalive reply echoing the probe sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong {
    /// Echoed probe sequence.
    pub sequence: u64,
    /// Unix seconds at reply time.
    pub timestamp: i64,
}

/// KNOCK (0x30): plaintext stealth pre-auth carrying an invite token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Knock {
    /// Opaque invite token (16-32 bytes).
    pub invite_token: Bytes,
}

/// KNOCK_RESPONSE (0x31): stealth pre-auth verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnockResponse {
    /// Whether the handshake may proceed.
    pub allowed: bool,
}

/// ERROR (0xFF): post-handshake error notification before teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    /// Error classification.
    pub error_code: ErrorCode,
    /// Optional human-readable detail.
    pub reason: Option<String>,
}

// ============================================
// Message Union
// ============================================

/// Tagged union of every control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// HELLO (0x01).
    Hello(Hello),
    /// AUTH (0x02).
    Auth(Auth),
    /// AUTH_OK (0x03).
    AuthOk(AuthOk),
    /// AUTH_FAIL (0x04).
    AuthFail(AuthFail),
    /// OPEN_STREAM (0x10).
    OpenStream(OpenStream),
    /// CLOSE_STREAM (0x11).
    CloseStream(CloseStream),
    /// STREAM_DATA (0x12).
    StreamData(StreamData),
    /// PING (0x20).
    Ping(Ping),
    /// PONG (0x21).
    Pong(Pong),
    /// KNOCK (0x30).
    Knock(Knock),
    /// KNOCK_RESPONSE (0x31).
    KnockResponse(KnockResponse),
    /// ERROR (0xFF).
    Error(ErrorMessage),
}

impl Message {
    /// Returns the wire tag of this message.
    #[must_use]
    pub const fn tag(&self) -> u64 {
        match self {
            Self::Hello(_) => tag::HELLO,
            Self::Auth(_) => tag::AUTH,
            Self::AuthOk(_) => tag::AUTH_OK,
            Self::AuthFail(_) => tag::AUTH_FAIL,
            Self::OpenStream(_) => tag::OPEN_STREAM,
            Self::CloseStream(_) => tag::CLOSE_STREAM,
            Self::StreamData(_) => tag::STREAM_DATA,
            Self::Ping(_) => tag::PING,
            Self::Pong(_) => tag::PONG,
            Self::Knock(_) => tag::KNOCK,
            Self::KnockResponse(_) => tag::KNOCK_RESPONSE,
            Self::Error(_) => tag::ERROR,
        }
    }

    /// Returns the message name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Hello(_) => "HELLO",
            Self::Auth(_) => "AUTH",
            Self::AuthOk(_) => "AUTH_OK",
            Self::AuthFail(_) => "AUTH_FAIL",
            Self::OpenStream(_) => "OPEN_STREAM",
            Self::CloseStream(_) => "CLOSE_STREAM",
            Self::StreamData(_) => "STREAM_DATA",
            Self::Ping(_) => "PING",
            Self::Pong(_) => "PONG",
            Self::Knock(_) => "KNOCK",
            Self::KnockResponse(_) => "KNOCK_RESPONSE",
            Self::Error(_) => "ERROR",
        }
    }
}

// ============================================
// Encoding
// ============================================

/// Encodes a control message into its canonical bytes.
#[must_use]
pub fn encode_message(msg: &Message) -> Bytes {
    let mut buf = BytesMut::with_capacity(64);
    // Keys within each arm are written in UTF-8 byte order.
    match msg {
        Message::Hello(m) => {
            put_map_header(&mut buf, 6);
            put_text(&mut buf, "cap");
            put_array_header(&mut buf, m.capabilities.len());
            for cap in &m.capabilities {
                put_text(&mut buf, cap);
            }
            put_text(&mut buf, "n");
            put_bytes(&mut buf, &m.nonce);
            put_text(&mut buf, "pk");
            put_bytes(&mut buf, &m.node_public_key);
            put_text(&mut buf, "t");
            put_uint(&mut buf, tag::HELLO);
            put_text(&mut buf, "ts");
            put_int(&mut buf, m.timestamp);
            put_text(&mut buf, "v");
            put_uint(&mut buf, u64::from(m.version));
            put_text(&mut buf, "vis");
            put_uint(&mut buf, m.visibility.code());
        }
        Message::Auth(m) => {
            put_map_header(&mut buf, 3);
            put_text(&mut buf, "att");
            put_bytes(&mut buf, &m.attestation);
            put_text(&mut buf, "hd");
            put_bytes(&mut buf, &m.handshake_data);
            put_text(&mut buf, "t");
            put_uint(&mut buf, tag::AUTH);
        }
        Message::AuthOk(m) => {
            put_map_header(&mut buf, 3);
            put_text(&mut buf, "p");
            put_text(&mut buf, &m.principal);
            put_text(&mut buf, "sid");
            put_bytes(&mut buf, &m.session_id);
            put_text(&mut buf, "t");
            put_uint(&mut buf, tag::AUTH_OK);
        }
        Message::AuthFail(m) => {
            put_map_header(&mut buf, 2 + usize::from(m.reason.is_some()));
            put_text(&mut buf, "ec");
            put_uint(&mut buf, m.error_code.code());
            if let Some(reason) = &m.reason {
                put_text(&mut buf, "r");
                put_text(&mut buf, reason);
            }
            put_text(&mut buf, "t");
            put_uint(&mut buf, tag::AUTH_FAIL);
        }
        Message::OpenStream(m) => {
            put_map_header(&mut buf, 2 + usize::from(m.label.is_some()));
            if let Some(label) = &m.label {
                put_text(&mut buf, "l");
                put_text(&mut buf, label);
            }
            put_text(&mut buf, "sid");
            put_uint(&mut buf, m.stream_id);
            put_text(&mut buf, "t");
            put_uint(&mut buf, tag::OPEN_STREAM);
        }
        Message::CloseStream(m) => {
            put_map_header(&mut buf, 2 + usize::from(m.error_code.is_some()));
            if let Some(code) = m.error_code {
                put_text(&mut buf, "ec");
                put_uint(&mut buf, code.code());
            }
            put_text(&mut buf, "sid");
            put_uint(&mut buf, m.stream_id);
            put_text(&mut buf, "t");
            put_uint(&mut buf, tag::CLOSE_STREAM);
        }
        Message::StreamData(m) => {
            put_map_header(&mut buf, 3 + usize::from(m.fin));
            put_text(&mut buf, "d");
            put_bytes(&mut buf, &m.data);
            if m.fin {
                put_text(&mut buf, "f");
                put_bool(&mut buf, true);
            }
            put_text(&mut buf, "sid");
            put_uint(&mut buf, m.stream_id);
            put_text(&mut buf, "t");
            put_uint(&mut buf, tag::STREAM_DATA);
        }
        Message::Ping(m) => {
            put_map_header(&mut buf, 3);
            put_text(&mut buf, "seq");
            put_uint(&mut buf, m.sequence);
            put_text(&mut buf, "t");
            put_uint(&mut buf, tag::PING);
            put_text(&mut buf, "ts");
            put_int(&mut buf, m.timestamp);
        }
        Message::Pong(m) => {
            put_map_header(&mut buf, 3);
            put_text(&mut buf, "seq");
            put_uint(&mut buf, m.sequence);
            put_text(&mut buf, "t");
            put_uint(&mut buf, tag::PONG);
            put_text(&mut buf, "ts");
            put_int(&mut buf, m.timestamp);
        }
        Message::Knock(m) => {
            put_map_header(&mut buf, 2);
            put_text(&mut buf, "it");
            put_bytes(&mut buf, &m.invite_token);
            put_text(&mut buf, "t");
            put_uint(&mut buf, tag::KNOCK);
        }
        Message::KnockResponse(m) => {
            put_map_header(&mut buf, 2);
            put_text(&mut buf, "a");
            put_bool(&mut buf, m.allowed);
            put_text(&mut buf, "t");
            put_uint(&mut buf, tag::KNOCK_RESPONSE);
        }
        Message::Error(m) => {
            put_map_header(&mut buf, 2 + usize::from(m.reason.is_some()));
            put_text(&mut buf, "ec");
            put_uint(&mut buf, m.error_code.code());
            if let Some(reason) = &m.reason {
                put_text(&mut buf, "r");
                put_text(&mut buf, reason);
            }
            put_text(&mut buf, "t");
            put_uint(&mut buf, tag::ERROR);
        }
    }
    buf.freeze()
}

// ============================================
// Decoding
// ============================================

/// Reads the `t` tag out of an encoded message without fully decoding it.
pub fn peek_tag(payload: &[u8]) -> Result<u64> {
    let mut d = Decoder::new(payload);
    let entries = d.read_map_len()?;
    for _ in 0..entries {
        let key = d.read_text()?;
        if key == "t" {
            return d.read_uint();
        }
        d.skip_value()?;
    }
    Err(CoreError::malformed("message has no tag"))
}

/// Decodes a control message from its canonical bytes.
///
/// Unknown fields are skipped; unknown tags raise `UnsupportedTag`
/// (which maps to `VERSION_UNSUPPORTED` on the wire).
pub fn decode_message(payload: &[u8]) -> Result<Message> {
    match peek_tag(payload)? {
        tag::HELLO => decode_hello(payload).map(Message::Hello),
        tag::AUTH => decode_auth(payload).map(Message::Auth),
        tag::AUTH_OK => decode_auth_ok(payload).map(Message::AuthOk),
        tag::AUTH_FAIL => decode_auth_fail(payload).map(Message::AuthFail),
        tag::OPEN_STREAM => decode_open_stream(payload).map(Message::OpenStream),
        tag::CLOSE_STREAM => decode_close_stream(payload).map(Message::CloseStream),
        tag::STREAM_DATA => decode_stream_data(payload).map(Message::StreamData),
        tag::PING => decode_ping(payload).map(Message::Ping),
        tag::PONG => decode_pong(payload).map(Message::Pong),
        tag::KNOCK => decode_knock(payload).map(Message::Knock),
        tag::KNOCK_RESPONSE => decode_knock_response(payload).map(Message::KnockResponse),
        tag::ERROR => decode_error(payload).map(Message::Error),
        other => Err(CoreError::UnsupportedTag(other)),
    }
}

fn missing(field: &str) -> CoreError {
    CoreError::malformed(format!("missing field '{field}'"))
}

fn decode_hello(payload: &[u8]) -> Result<Hello> {
    let mut d = Decoder::new(payload);
    let entries = d.read_map_len()?;

    let mut version = None;
    let mut node_public_key = None;
    let mut nonce = None;
    let mut timestamp = None;
    let mut visibility = None;
    let mut capabilities = None;

    for _ in 0..entries {
        match d.read_text()? {
            "v" => version = Some(u32::try_from(d.read_uint()?).map_err(|_| {
                CoreError::malformed("version out of u32 range")
            })?),
            "pk" => node_public_key = Some(d.read_bytes_fixed::<32>()?),
            "n" => nonce = Some(d.read_bytes_fixed::<32>()?),
            "ts" => timestamp = Some(d.read_int()?),
            "vis" => {
                let code = d.read_uint()?;
                visibility = Some(
                    Visibility::from_code(code)
                        .ok_or_else(|| CoreError::malformed("unknown visibility code"))?,
                );
            }
            "cap" => {
                let count = d.read_array_len()?;
                let mut caps = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    caps.push(d.read_text()?.to_owned());
                }
                capabilities = Some(caps);
            }
            _ => d.skip_value()?,
        }
    }

    Ok(Hello {
        version: version.ok_or_else(|| missing("v"))?,
        node_public_key: node_public_key.ok_or_else(|| missing("pk"))?,
        nonce: nonce.ok_or_else(|| missing("n"))?,
        timestamp: timestamp.ok_or_else(|| missing("ts"))?,
        visibility: visibility.ok_or_else(|| missing("vis"))?,
        capabilities: capabilities.ok_or_else(|| missing("cap"))?,
    })
}

fn decode_auth(payload: &[u8]) -> Result<Auth> {
    let mut d = Decoder::new(payload);
    let entries = d.read_map_len()?;

    let mut attestation = None;
    let mut handshake_data = None;

    for _ in 0..entries {
        match d.read_text()? {
            "att" => attestation = Some(Bytes::copy_from_slice(d.read_bytes()?)),
            "hd" => handshake_data = Some(Bytes::copy_from_slice(d.read_bytes()?)),
            _ => d.skip_value()?,
        }
    }

    Ok(Auth {
        attestation: attestation.ok_or_else(|| missing("att"))?,
        handshake_data: handshake_data.ok_or_else(|| missing("hd"))?,
    })
}

fn decode_auth_ok(payload: &[u8]) -> Result<AuthOk> {
    let mut d = Decoder::new(payload);
    let entries = d.read_map_len()?;

    let mut principal = None;
    let mut session_id = None;

    for _ in 0..entries {
        match d.read_text()? {
            "p" => principal = Some(d.read_text()?.to_owned()),
            "sid" => session_id = Some(d.read_bytes_fixed::<32>()?),
            _ => d.skip_value()?,
        }
    }

    Ok(AuthOk {
        principal: principal.ok_or_else(|| missing("p"))?,
        session_id: session_id.ok_or_else(|| missing("sid"))?,
    })
}

fn decode_auth_fail(payload: &[u8]) -> Result<AuthFail> {
    let (error_code, reason) = decode_code_and_reason(payload)?;
    Ok(AuthFail { error_code, reason })
}

fn decode_error(payload: &[u8]) -> Result<ErrorMessage> {
    let (error_code, reason) = decode_code_and_reason(payload)?;
    Ok(ErrorMessage { error_code, reason })
}

fn decode_code_and_reason(payload: &[u8]) -> Result<(ErrorCode, Option<String>)> {
    let mut d = Decoder::new(payload);
    let entries = d.read_map_len()?;

    let mut error_code = None;
    let mut reason = None;

    for _ in 0..entries {
        match d.read_text()? {
            "ec" => error_code = Some(ErrorCode::from_wire(d.read_uint()?)),
            "r" => reason = Some(d.read_text()?.to_owned()),
            _ => d.skip_value()?,
        }
    }

    Ok((error_code.ok_or_else(|| missing("ec"))?, reason))
}

fn decode_open_stream(payload: &[u8]) -> Result<OpenStream> {
    let mut d = Decoder::new(payload);
    let entries = d.read_map_len()?;

    let mut stream_id = None;
    let mut label = None;

    for _ in 0..entries {
        match d.read_text()? {
            "sid" => stream_id = Some(d.read_uint()?),
            "l" => label = Some(d.read_text()?.to_owned()),
            _ => d.skip_value()?,
        }
    }

    Ok(OpenStream {
        stream_id: stream_id.ok_or_else(|| missing("sid"))?,
        label,
    })
}

fn decode_close_stream(payload: &[u8]) -> Result<CloseStream> {
    let mut d = Decoder::new(payload);
    let entries = d.read_map_len()?;

    let mut stream_id = None;
    let mut error_code = None;

    for _ in 0..entries {
        match d.read_text()? {
            "sid" => stream_id = Some(d.read_uint()?),
            "ec" => error_code = Some(ErrorCode::from_wire(d.read_uint()?)),
            _ => d.skip_value()?,
        }
    }

    Ok(CloseStream {
        stream_id: stream_id.ok_or_else(|| missing("sid"))?,
        error_code,
    })
}

fn decode_stream_data(payload: &[u8]) -> Result<StreamData> {
    let mut d = Decoder::new(payload);
    let entries = d.read_map_len()?;

    let mut stream_id = None;
    let mut data = None;
    let mut fin = false;

    for _ in 0..entries {
        match d.read_text()? {
            "sid" => stream_id = Some(d.read_uint()?),
            "d" => data = Some(Bytes::copy_from_slice(d.read_bytes()?)),
            "f" => fin = d.read_bool()?,
            _ => d.skip_value()?,
        }
    }

    Ok(StreamData {
        stream_id: stream_id.ok_or_else(|| missing("sid"))?,
        data: data.ok_or_else(|| missing("d"))?,
        fin,
    })
}

fn decode_ping(payload: &[u8]) -> Result<Ping> {
    let (sequence, timestamp) = decode_seq_and_ts(payload)?;
    Ok(Ping {
        sequence,
        timestamp,
    })
}

fn decode_pong(payload: &[u8]) -> Result<Pong> {
    let (sequence, timestamp) = decode_seq_and_ts(payload)?;
    Ok(Pong {
        sequence,
        timestamp,
    })
}

fn decode_seq_and_ts(payload: &[u8]) -> Result<(u64, i64)> {
    let mut d = Decoder::new(payload);
    let entries = d.read_map_len()?;

    let mut sequence = None;
    let mut timestamp = None;

    for _ in 0..entries {
        match d.read_text()? {
            "seq" => sequence = Some(d.read_uint()?),
            "ts" => timestamp = Some(d.read_int()?),
            _ => d.skip_value()?,
        }
    }

    Ok((
        sequence.ok_or_else(|| missing("seq"))?,
        timestamp.ok_or_else(|| missing("ts"))?,
    ))
}

fn decode_knock(payload: &[u8]) -> Result<Knock> {
    let mut d = Decoder::new(payload);
    let entries = d.read_map_len()?;

    let mut invite_token = None;

    for _ in 0..entries {
        match d.read_text()? {
            "it" => {
                let bytes = d.read_bytes()?;
                if bytes.len() < INVITE_TOKEN_MIN || bytes.len() > INVITE_TOKEN_MAX {
                    return Err(CoreError::malformed(format!(
                        "invite token length {} not in [{INVITE_TOKEN_MIN}, {INVITE_TOKEN_MAX}]",
                        bytes.len()
                    )));
                }
                invite_token = Some(Bytes::copy_from_slice(bytes));
            }
            _ => d.skip_value()?,
        }
    }

    Ok(Knock {
        invite_token: invite_token.ok_or_else(|| missing("it"))?,
    })
}

fn decode_knock_response(payload: &[u8]) -> Result<KnockResponse> {
    let mut d = Decoder::new(payload);
    let entries = d.read_map_len()?;

    let mut allowed = None;

    for _ in 0..entries {
        match d.read_text()? {
            "a" => allowed = Some(d.read_bool()?),
            _ => d.skip_value()?,
        }
    }

    Ok(KnockResponse {
        allowed: allowed.ok_or_else(|| missing("a"))?,
    })
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::{put_map_header, put_text, put_uint};

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::Hello(Hello {
                version: PROTOCOL_VERSION,
                node_public_key: [0x11; 32],
                nonce: [0x22; 32],
                timestamp: 1_700_000_000,
                visibility: Visibility::Stealth,
                capabilities: vec!["px-1".into(), "alias".into()],
            }),
            Message::Auth(Auth {
                attestation: Bytes::from_static(b"attestation-bytes"),
                handshake_data: Bytes::new(),
            }),
            Message::AuthOk(AuthOk {
                principal: "stacks:SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7".into(),
                session_id: [0x33; 32],
            }),
            Message::AuthFail(AuthFail {
                error_code: ErrorCode::NotAllowed,
                reason: Some("not on the list".into()),
            }),
            Message::OpenStream(OpenStream {
                stream_id: 4,
                label: Some("echo".into()),
            }),
            Message::OpenStream(OpenStream {
                stream_id: u64::MAX - 1,
                label: None,
            }),
            Message::CloseStream(CloseStream {
                stream_id: 4,
                error_code: Some(ErrorCode::StreamIdInUse),
            }),
            Message::CloseStream(CloseStream {
                stream_id: 5,
                error_code: None,
            }),
            Message::StreamData(StreamData {
                stream_id: 4,
                data: Bytes::from_static(b"hello"),
                fin: false,
            }),
            Message::StreamData(StreamData {
                stream_id: 4,
                data: Bytes::new(),
                fin: true,
            }),
            Message::Ping(Ping {
                sequence: 7,
                timestamp: 1_700_000_001,
            }),
            Message::Pong(Pong {
                sequence: 7,
                timestamp: 1_700_000_002,
            }),
            Message::Knock(Knock {
                invite_token: Bytes::from_static(&[0xab; 32]),
            }),
            Message::KnockResponse(KnockResponse { allowed: true }),
            Message::Error(ErrorMessage {
                error_code: ErrorCode::Internal,
                reason: None,
            }),
        ]
    }

    #[test]
    fn test_roundtrip_all_messages() {
        for msg in sample_messages() {
            let encoded = encode_message(&msg);
            let decoded = decode_message(&encoded).unwrap();
            assert_eq!(msg, decoded, "roundtrip failed for {}", msg.name());

            // Deterministic: re-encoding the decoded message yields
            // identical bytes.
            let reencoded = encode_message(&decoded);
            assert_eq!(encoded, reencoded, "bytes unstable for {}", msg.name());
        }
    }

    #[test]
    fn test_peek_tag() {
        let msg = Message::Ping(Ping {
            sequence: 1,
            timestamp: 0,
        });
        assert_eq!(peek_tag(&encode_message(&msg)).unwrap(), tag::PING);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut buf = BytesMut::new();
        put_map_header(&mut buf, 1);
        put_text(&mut buf, "t");
        put_uint(&mut buf, 0x77);

        assert!(matches!(
            decode_message(&buf),
            Err(CoreError::UnsupportedTag(0x77))
        ));
    }

    #[test]
    fn test_unknown_fields_dropped() {
        // A HELLO from a hypothetical newer revision with an extra
        // "xyz" field decodes into the known-field structure.
        let hello = Hello {
            version: 1,
            node_public_key: [0x01; 32],
            nonce: [0x02; 32],
            timestamp: 1_700_000_000,
            visibility: Visibility::Public,
            capabilities: vec![],
        };

        let mut buf = BytesMut::new();
        put_map_header(&mut buf, 8);
        put_text(&mut buf, "cap");
        put_array_header(&mut buf, 0);
        put_text(&mut buf, "n");
        put_bytes(&mut buf, &hello.nonce);
        put_text(&mut buf, "pk");
        put_bytes(&mut buf, &hello.node_public_key);
        put_text(&mut buf, "t");
        put_uint(&mut buf, tag::HELLO);
        put_text(&mut buf, "ts");
        put_int(&mut buf, hello.timestamp);
        put_text(&mut buf, "v");
        put_uint(&mut buf, 1);
        put_text(&mut buf, "vis");
        put_uint(&mut buf, 0);
        put_text(&mut buf, "xyz");
        put_bytes(&mut buf, b"future extension");

        let decoded = decode_message(&buf).unwrap();
        assert_eq!(decoded, Message::Hello(hello));
    }

    #[test]
    fn test_missing_required_field_rejected() {
        // PING without its sequence.
        let mut buf = BytesMut::new();
        put_map_header(&mut buf, 2);
        put_text(&mut buf, "t");
        put_uint(&mut buf, tag::PING);
        put_text(&mut buf, "ts");
        put_int(&mut buf, 0);

        assert!(decode_message(&buf).is_err());
    }

    #[test]
    fn test_hello_rejects_short_key() {
        let mut buf = BytesMut::new();
        put_map_header(&mut buf, 6);
        put_text(&mut buf, "cap");
        put_array_header(&mut buf, 0);
        put_text(&mut buf, "n");
        put_bytes(&mut buf, &[0u8; 32]);
        put_text(&mut buf, "pk");
        put_bytes(&mut buf, &[0u8; 31]); // one byte short
        put_text(&mut buf, "t");
        put_uint(&mut buf, tag::HELLO);
        put_text(&mut buf, "ts");
        put_int(&mut buf, 0);
        put_text(&mut buf, "vis");
        put_uint(&mut buf, 0);

        assert!(decode_message(&buf).is_err());
    }

    #[test]
    fn test_knock_token_length_bounds() {
        for (len, ok) in [(15usize, false), (16, true), (32, true), (33, false)] {
            let mut buf = BytesMut::new();
            put_map_header(&mut buf, 2);
            put_text(&mut buf, "it");
            put_bytes(&mut buf, &vec![0x55u8; len]);
            put_text(&mut buf, "t");
            put_uint(&mut buf, tag::KNOCK);

            assert_eq!(decode_message(&buf).is_ok(), ok, "token length {len}");
        }
    }

    #[test]
    fn test_error_code_wire_stability() {
        assert_eq!(ErrorCode::VersionUnsupported.code(), 1);
        assert_eq!(ErrorCode::InvalidToken.code(), 5);
        assert_eq!(ErrorCode::ResourceExhausted.code(), 13);
        assert_eq!(ErrorCode::Internal.code(), 18);

        // Unknown values collapse to Internal.
        assert_eq!(ErrorCode::from_wire(9999), ErrorCode::Internal);
        for code in 1..=18u64 {
            assert_eq!(ErrorCode::from_wire(code).code(), code);
        }
    }

    #[test]
    fn test_fin_absent_means_false() {
        let msg = Message::StreamData(StreamData {
            stream_id: 2,
            data: Bytes::from_static(b"x"),
            fin: false,
        });
        let encoded = encode_message(&msg);
        // No "f" key on the wire when fin is false.
        assert!(!encoded.windows(2).any(|w| w == [0x61, b'f']));
        assert_eq!(decode_message(&encoded).unwrap(), msg);
    }
}
