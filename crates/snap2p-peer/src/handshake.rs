// ============================================
// File: crates/snap2p-peer/src/handshake.rs
// ============================================
//! # Handshake Orchestrator
//!
//! ## Creation Reason
//! Drives framing, the Noise XX engine, and the codec through the
//! control-plane handshake: KNOCK gating, HELLO exchange, attestation
//! verification, identity binding, and allowlist enforcement.
//!
//! ## Handshake Flow
//! ```text
//! Initiator                                   Responder
//!   │  [KNOCK] ───────────────────────────────► │  (STEALTH only,
//!   │  ◄─────────────────────[KNOCK_RESPONSE]   │   plaintext)
//!   │  Noise XX 1 ────────────────────────────► │
//!   │  ◄──────────────────────────── Noise XX 2 │
//!   │  Noise XX 3 ────────────────────────────► │
//!   │  HELLO ═════════════════════════════════► │  (encrypted from
//!   │  ◄═════════════════════════════════ HELLO │   here on)
//!   │  AUTH ══════════════════════════════════► │  verify attestation,
//!   │                                           │  binding, allowlist
//!   │  ◄══════════════════════════════════ AUTH │  verify attestation,
//!   │  ◄═══════════════════════════════ AUTH_OK │  binding
//!   │  AUTH_OK ═══════════════════════════════► │  (echoed session id)
//! ```
//!
//! ## Error Handling
//! - Responder failures send AUTH_FAIL (plaintext before Noise,
//!   encrypted after) before closing
//! - Initiator verification failures just close; the responder owns
//!   the AUTH_FAIL decision
//! - Every read is bounded by the configured handshake timeout
//!
//! ## ⚠️ Important Note for Next Developer
//! - The frame buffer is handed to the session afterwards; bytes the
//!   peer pipelined behind AUTH_OK must not be dropped
//! - The binding check compares in constant time; keep it that way
//!
//! ## Last Modified
//! v0.1.0 - Initial handshake orchestration

use std::time::Duration;

use bytes::Bytes;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time;
use tracing::{debug, warn};

use snap2p_common::time::Timestamp;
use snap2p_common::types::{Principal, SessionId, Visibility};
use snap2p_core::crypto::noise::{HandshakeState, NoiseTransport};
use snap2p_core::crypto::transport::TransportCipher;
use snap2p_core::crypto::NodeKeyPair;
use snap2p_core::identity::NodeKeyAttestation;
use snap2p_core::protocol::{
    decode_message, encode_message, frame, Auth, AuthFail, AuthOk, ErrorCode, FrameBuffer, Hello,
    Knock, KnockResponse, Message, PROTOCOL_VERSION,
};

use crate::config::PeerConfig;
use crate::error::{PeerError, Result};
use crate::invite::InviteTokenStore;

// ============================================
// Context & Outcome
// ============================================

/// Everything the orchestrator needs from the owning peer.
pub(crate) struct HandshakeContext<'a> {
    pub node_key: &'a NodeKeyPair,
    pub attestation: &'a NodeKeyAttestation,
    pub attestation_bytes: &'a Bytes,
    pub config: &'a PeerConfig,
    pub invite_store: Option<&'a InviteTokenStore>,
}

/// Successful handshake outcome, ready to become a session.
#[derive(Debug)]
pub(crate) struct Established {
    /// Directional ciphers (nonces already advanced past the
    /// control-plane exchange) plus remote static and transcript hash.
    pub transport: NoiseTransport,
    /// Authenticated remote principal.
    pub remote_principal: Principal,
    /// The remote's verified attestation.
    pub remote_attestation: NodeKeyAttestation,
    /// The remote HELLO (visibility, capabilities).
    pub remote_hello: Hello,
    /// Agreed session id.
    pub session_id: SessionId,
    /// Frame buffer with any bytes the peer pipelined behind the
    /// handshake; the session keeps consuming from it.
    pub framing: FrameBuffer,
}

// ============================================
// Framed IO
// ============================================

/// Timeout-bounded framed reader/writer over the raw socket.
struct FramedIo<'a, S> {
    stream: &'a mut S,
    rx: FrameBuffer,
    timeout: Duration,
}

impl<'a, S: AsyncRead + AsyncWrite + Unpin> FramedIo<'a, S> {
    fn new(stream: &'a mut S, timeout: Duration) -> Self {
        Self {
            stream,
            rx: FrameBuffer::new(),
            timeout,
        }
    }

    async fn read_frame(&mut self) -> Result<Bytes> {
        loop {
            if let Some(payload) = self.rx.try_frame()? {
                return Ok(payload);
            }
            let mut chunk = [0u8; 8 * 1024];
            let n = time::timeout(self.timeout, self.stream.read(&mut chunk))
                .await
                .map_err(|_| PeerError::timeout("handshake read"))?
                .map_err(|e| PeerError::io("handshake read", e))?;
            if n == 0 {
                return Err(PeerError::ConnectionClosed);
            }
            self.rx.extend(&chunk[..n]);
        }
    }

    async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        let framed = frame(payload)?;
        time::timeout(self.timeout, self.stream.write_all(&framed))
            .await
            .map_err(|_| PeerError::timeout("handshake write"))?
            .map_err(|e| PeerError::io("handshake write", e))?;
        Ok(())
    }

    async fn write_plain(&mut self, msg: &Message) -> Result<()> {
        self.write_frame(&encode_message(msg)).await
    }

    async fn write_encrypted(&mut self, cipher: &mut TransportCipher, msg: &Message) -> Result<()> {
        let sealed = cipher.seal(&encode_message(msg))?;
        self.write_frame(&sealed).await
    }

    async fn read_encrypted(&mut self, cipher: &mut TransportCipher) -> Result<Message> {
        let sealed = self.read_frame().await?;
        let plain = cipher.open(&sealed)?;
        Ok(decode_message(&plain)?)
    }
}

// ============================================
// Helpers
// ============================================

fn auth_fail(code: ErrorCode, reason: &str) -> Message {
    Message::AuthFail(AuthFail {
        error_code: code,
        reason: Some(reason.to_owned()),
    })
}

fn build_hello(ctx: &HandshakeContext<'_>) -> Hello {
    let mut nonce = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    Hello {
        version: PROTOCOL_VERSION,
        node_public_key: ctx.node_key.public_key_bytes(),
        nonce,
        timestamp: Timestamp::now().as_secs(),
        visibility: ctx.config.visibility,
        capabilities: ctx.config.capabilities.clone(),
    }
}

/// Validates an inbound HELLO; any failure is `INVALID_MESSAGE`.
fn validate_hello(hello: &Hello) -> Result<()> {
    if hello.version != PROTOCOL_VERSION {
        return Err(PeerError::invalid_message(format!(
            "unsupported protocol version {}",
            hello.version
        )));
    }
    // Key and nonce lengths are enforced by the codec; the timestamp
    // window is checked here.
    if !Timestamp::from_secs(hello.timestamp).is_within_skew() {
        return Err(PeerError::invalid_message("HELLO timestamp outside skew window"));
    }
    Ok(())
}

/// Verifies an AUTH payload: deserialization, full cryptographic
/// attestation verification, and the node-key binding against the
/// Noise remote static key.
fn verify_remote_auth(
    auth: &Auth,
    remote_static: &[u8; 32],
    testnet: bool,
) -> Result<NodeKeyAttestation> {
    let attestation = NodeKeyAttestation::deserialize(&auth.attestation)?;
    attestation.verify(Timestamp::now(), testnet)?;
    attestation.verify_node_key_binding(remote_static)?;
    Ok(attestation)
}

// ============================================
// Initiator
// ============================================

/// Runs the initiator side of the handshake over `stream`.
pub(crate) async fn initiate<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    ctx: &HandshakeContext<'_>,
    invite_token: Option<&[u8]>,
) -> Result<Established> {
    let mut io = FramedIo::new(stream, ctx.config.handshake_timeout);

    // Step 1: plaintext KNOCK when an invite token was provided.
    if let Some(token) = invite_token {
        io.write_plain(&Message::Knock(Knock {
            invite_token: Bytes::copy_from_slice(token),
        }))
        .await?;

        let reply = io.read_frame().await?;
        match decode_message(&reply) {
            Ok(Message::KnockResponse(KnockResponse { allowed: true })) => {
                debug!("knock accepted");
            }
            Ok(Message::KnockResponse(KnockResponse { allowed: false })) => {
                return Err(PeerError::InvalidToken);
            }
            Ok(Message::AuthFail(fail)) => {
                return Err(PeerError::from_auth_fail(fail.error_code, fail.reason));
            }
            Ok(other) => {
                return Err(PeerError::invalid_message(format!(
                    "unexpected {} during knock",
                    other.name()
                )));
            }
            Err(e) => return Err(e.into()),
        }
    }

    // Step 2: Noise XX as initiator.
    let mut noise = HandshakeState::initiator(ctx.node_key.x25519_secret());
    io.write_frame(&noise.write_message(&[])?).await?;
    let msg2 = io.read_frame().await?;
    noise.read_message(&msg2)?;
    io.write_frame(&noise.write_message(&[])?).await?;
    let mut transport = noise.finalize()?;

    // Step 3: encrypted HELLO.
    io.write_encrypted(&mut transport.send, &Message::Hello(build_hello(ctx)))
        .await?;

    // Step 4: remote HELLO.
    let remote_hello = match io.read_encrypted(&mut transport.recv).await? {
        Message::Hello(hello) => hello,
        Message::AuthFail(fail) => {
            return Err(PeerError::from_auth_fail(fail.error_code, fail.reason))
        }
        other => {
            return Err(PeerError::invalid_message(format!(
                "expected HELLO, got {}",
                other.name()
            )))
        }
    };
    validate_hello(&remote_hello)?;

    // Step 5: our AUTH.
    io.write_encrypted(
        &mut transport.send,
        &Message::Auth(Auth {
            attestation: ctx.attestation_bytes.clone(),
            handshake_data: Bytes::new(),
        }),
    )
    .await?;

    // Step 6: remote AUTH. Verification failures just close; the
    // responder owns the AUTH_FAIL decision.
    let remote_attestation = match io.read_encrypted(&mut transport.recv).await? {
        Message::Auth(auth) => {
            verify_remote_auth(&auth, &transport.remote_static, ctx.config.testnet)?
        }
        Message::AuthFail(fail) => {
            return Err(PeerError::from_auth_fail(fail.error_code, fail.reason))
        }
        other => {
            return Err(PeerError::invalid_message(format!(
                "expected AUTH, got {}",
                other.name()
            )))
        }
    };

    // Step 7: AUTH_OK with the responder's session id.
    let auth_ok = match io.read_encrypted(&mut transport.recv).await? {
        Message::AuthOk(ok) => ok,
        Message::AuthFail(fail) => {
            return Err(PeerError::from_auth_fail(fail.error_code, fail.reason))
        }
        other => {
            return Err(PeerError::invalid_message(format!(
                "expected AUTH_OK, got {}",
                other.name()
            )))
        }
    };
    if auth_ok.principal != ctx.attestation.principal.as_str() {
        return Err(PeerError::invalid_message(
            "AUTH_OK acknowledges a different principal",
        ));
    }
    let session_id = SessionId::from_bytes(&auth_ok.session_id)
        .ok_or_else(|| PeerError::invalid_message("AUTH_OK session id malformed"))?;

    // Step 8: echo AUTH_OK.
    io.write_encrypted(
        &mut transport.send,
        &Message::AuthOk(AuthOk {
            principal: remote_attestation.principal.to_string(),
            session_id: *session_id.as_bytes(),
        }),
    )
    .await?;

    debug!(principal = %remote_attestation.principal, "initiator handshake complete");

    Ok(Established {
        transport,
        remote_principal: remote_attestation.principal.clone(),
        remote_attestation,
        remote_hello,
        session_id,
        framing: io.rx,
    })
}

// ============================================
// Responder
// ============================================

/// Runs the responder side of the handshake over `stream`.
pub(crate) async fn respond<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    ctx: &HandshakeContext<'_>,
) -> Result<Established> {
    let mut io = FramedIo::new(stream, ctx.config.handshake_timeout);

    // Step 0: STEALTH gate - the very first frame must be a valid
    // KNOCK before anything else is spoken.
    if ctx.config.visibility == Visibility::Stealth {
        let store = ctx
            .invite_store
            .ok_or_else(|| PeerError::config("stealth listener has no invite token store"))?;

        let first = io.read_frame().await?;
        match decode_message(&first) {
            Ok(Message::Knock(knock)) => {
                if !store.validate_and_consume(&knock.invite_token) {
                    warn!("knock rejected: invalid invite token");
                    let _ = io
                        .write_plain(&auth_fail(ErrorCode::InvalidToken, "invite token rejected"))
                        .await;
                    return Err(PeerError::InvalidToken);
                }
                io.write_plain(&Message::KnockResponse(KnockResponse { allowed: true }))
                    .await?;
            }
            _ => {
                warn!("stealth listener contacted without knock");
                let _ = io
                    .write_plain(&auth_fail(ErrorCode::InviteRequired, "invite token required"))
                    .await;
                return Err(PeerError::InviteRequired);
            }
        }
    }

    // Step 1: Noise XX as responder.
    let mut noise = HandshakeState::responder(ctx.node_key.x25519_secret());
    let msg1 = io.read_frame().await?;
    noise.read_message(&msg1)?;
    io.write_frame(&noise.write_message(&[])?).await?;
    let msg3 = io.read_frame().await?;
    noise.read_message(&msg3)?;
    let mut transport = noise.finalize()?;

    // Step 2: remote HELLO.
    let remote_hello = match io.read_encrypted(&mut transport.recv).await? {
        Message::Hello(hello) => hello,
        other => {
            return Err(PeerError::invalid_message(format!(
                "expected HELLO, got {}",
                other.name()
            )))
        }
    };
    if let Err(e) = validate_hello(&remote_hello) {
        let _ = io
            .write_encrypted(
                &mut transport.send,
                &auth_fail(ErrorCode::InvalidMessage, "HELLO validation failed"),
            )
            .await;
        return Err(e);
    }

    // Step 3: our HELLO.
    io.write_encrypted(&mut transport.send, &Message::Hello(build_hello(ctx)))
        .await?;

    // Step 4: remote AUTH with attestation + binding verification.
    let auth = match io.read_encrypted(&mut transport.recv).await? {
        Message::Auth(auth) => auth,
        other => {
            return Err(PeerError::invalid_message(format!(
                "expected AUTH, got {}",
                other.name()
            )))
        }
    };
    let remote_attestation =
        match verify_remote_auth(&auth, &transport.remote_static, ctx.config.testnet) {
            Ok(attestation) => attestation,
            Err(e) => {
                warn!(error = %e, "attestation verification failed");
                let _ = io
                    .write_encrypted(
                        &mut transport.send,
                        &Message::AuthFail(AuthFail {
                            error_code: e.kind(),
                            reason: Some(e.to_string()),
                        }),
                    )
                    .await;
                return Err(e);
            }
        };

    // Step 5: allowlist gate.
    if let Some(allowlist) = &ctx.config.allowlist {
        if !allowlist.contains(&remote_attestation.principal) {
            warn!(principal = %remote_attestation.principal, "principal not in allowlist");
            let _ = io
                .write_encrypted(
                    &mut transport.send,
                    &auth_fail(ErrorCode::NotAllowed, "principal not allowed"),
                )
                .await;
            return Err(PeerError::NotAllowed);
        }
    }

    // Step 6: our AUTH.
    io.write_encrypted(
        &mut transport.send,
        &Message::Auth(Auth {
            attestation: ctx.attestation_bytes.clone(),
            handshake_data: Bytes::new(),
        }),
    )
    .await?;

    // Step 7: fresh session id in AUTH_OK.
    let session_id = SessionId::generate();
    io.write_encrypted(
        &mut transport.send,
        &Message::AuthOk(AuthOk {
            principal: remote_attestation.principal.to_string(),
            session_id: *session_id.as_bytes(),
        }),
    )
    .await?;

    // Step 8: the initiator echoes the session id back.
    match io.read_encrypted(&mut transport.recv).await? {
        Message::AuthOk(echo) => {
            if &echo.session_id != session_id.as_bytes() {
                return Err(PeerError::invalid_message("AUTH_OK echoed wrong session id"));
            }
        }
        Message::AuthFail(fail) => {
            return Err(PeerError::from_auth_fail(fail.error_code, fail.reason))
        }
        other => {
            return Err(PeerError::invalid_message(format!(
                "expected AUTH_OK echo, got {}",
                other.name()
            )))
        }
    }

    debug!(principal = %remote_attestation.principal, "responder handshake complete");

    Ok(Established {
        transport,
        remote_principal: remote_attestation.principal.clone(),
        remote_attestation,
        remote_hello,
        session_id,
        framing: io.rx,
    })
}

// ============================================
// Tests
// ============================================
