//! A message oriented transport on top of UDP, with per-channel delivery guarantees.
//!
//! A [Connection](connection::Connection) multiplexes a fixed set of channels, each with one
//!  of three delivery modes:
//! * *unreliable*: messages may be lost, duplicated or reordered
//! * *unreliable sequenced*: messages may be lost, but stale messages are dropped so that
//!    delivery order follows send order
//! * *reliable ordered*: every message is delivered exactly once and in send order, as long as
//!    the connection lives
//!
//! The crate does no I/O scheduling of its own. The application calls `update()` at a fixed
//!  cadence, passing in the current time; each tick drains received datagrams, runs
//!  retransmission and keepalive timers, and sends at most one packet per channel. Events
//!  (connected, disconnected, messages) go to an unbounded channel that the application reads
//!  in its own time.
//!
//! ## Wire format
//!
//! Packets are bit packed, least significant bit first:
//!
//! ```ascii
//! type        8 bits   packet type tag
//! seq        16 bits   packet sequence number
//! ack        16 bits   most recent sequence number received from the peer
//! ack window 32 bits   bit i set: 'ack - i' was received
//! marker     32 bits   0x5EB17C0D, system and reliable packets only
//! padding    to the next byte boundary
//! body       type specific
//! ```
//!
//! Data packets carry a channel id (8 bits) and a message count (8 bits), followed by the
//!  messages: a 16 bit sequence number for sequenced and reliable channels, a 16 bit length,
//!  and the payload.
//!
//! ## Connection handshake
//!
//! ```ascii
//! client                        server
//!   ConnectRequest(client salt) ->
//!                              <- Challenge(client salt, server salt)
//!   ChallengeResponse(xor)      ->
//!                              <- ConnectAccept
//! ```
//!
//! Lost handshake packets are covered by the client re-sending its current step.

pub mod ack_window;
pub mod bits;
pub mod buffers;
pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod listener;
pub mod message;
pub mod packet;
pub mod safe_converter;
pub mod seq_no;
pub mod transport;
pub mod test_util;
