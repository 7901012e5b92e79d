//! Host-side SPI transport: the submit/poll reliability loop described in
//! spec §5 "SPI transport (host side)".
//!
//! This module only describes the protocol; it does not touch any actual
//! SPI peripheral. A caller supplies a [`SpiLink`] — one full-duplex
//! 38-byte transfer, plus a way to wait — and gets back the poll-for-id,
//! submit/retry, and progress-gate loop that keeps a request moving
//! until the coprocessor reports the requested level of completion.

use core::fmt;

use crate::bitstream::Bitstream;
use crate::frame::{Frame, RrCode, RrResponse, FRAME_LEN};

/// Retries before giving up, both for the initial id-discovery poll and
/// for the submit step.
pub const MAX_TRIES: u8 = 10;
/// Delay between submit retries, in milliseconds.
pub const SUBMIT_RETRY_DELAY_MS: u32 = 1;
/// Delay between progress polls, in milliseconds.
pub const POLL_INTERVAL_MS: u32 = 200;

/// One full-duplex SPI exchange of a 38-byte frame, plus a way to wait.
/// Implemented by the hardware glue crate against an actual SPI device.
pub trait SpiLink {
    type Error;

    /// Clocks `request` out while clocking a same-sized reply in.
    fn transfer(&mut self, request: &[u8; FRAME_LEN]) -> Result<[u8; FRAME_LEN], Self::Error>;

    /// Waits approximately `ms` milliseconds.
    fn sleep_ms(&mut self, ms: u32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError<E> {
    /// A reply never verified within [`MAX_TRIES`] of the id-discovery
    /// poll, so no request id could be derived.
    CouldNotDiscoverRequestId,
    UnrecognizedResponse(u8),
    MaxRetriesExceeded,
    /// The echoed `rr_id` changed while gating on progress, meaning some
    /// other request got in ahead of this one.
    UnexpectedRequestId { expected: u8, got: u8 },
    Link(E),
}

impl<E: fmt::Display> fmt::Display for TransportError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::CouldNotDiscoverRequestId => {
                write!(f, "could not read a verified reply to discover the current request id")
            }
            TransportError::UnrecognizedResponse(code) => {
                write!(f, "coprocessor returned unrecognized response opcode {}", code)
            }
            TransportError::MaxRetriesExceeded => {
                write!(f, "submit exceeded the maximum retry count")
            }
            TransportError::UnexpectedRequestId { expected, got } => write!(
                f,
                "coprocessor echoed request id {} while gating on id {}",
                got, expected
            ),
            TransportError::Link(e) => write!(f, "SPI link error: {}", e),
        }
    }
}

#[cfg(feature = "std")]
impl<E: fmt::Display + fmt::Debug> std::error::Error for TransportError<E> {}

/// Polls once, retrying up to [`MAX_TRIES`] times, until a frame passes
/// CRC verification. Used both standalone (the CLI's `poll` command) and
/// as the id-discovery step of [`reliable_submit`].
pub fn poll<L: SpiLink>(link: &mut L) -> Result<Frame, TransportError<L::Error>> {
    let request = Frame::new(RrCode::Poll as u8, 0, Bitstream::new()).to_bytes();
    for _ in 0..=MAX_TRIES {
        let reply_bytes = link.transfer(&request).map_err(TransportError::Link)?;
        let reply = Frame::from_bytes(&reply_bytes);
        if reply.verify() {
            return Ok(reply);
        }
        link.sleep_ms(SUBMIT_RETRY_DELAY_MS);
    }
    Err(TransportError::CouldNotDiscoverRequestId)
}

/// Submits a `Cancel` or `Transmit` request and drives it to `target`
/// (spec §5.1, §5.2):
///
/// 1. Poll for the coprocessor's current `rr_id` (up to [`MAX_TRIES`]).
/// 2. Submit under `(last.rr_id + 1) % 256`, retrying up to
///    [`MAX_TRIES`] times on a CRC failure or a mismatched echo.
/// 3. Poll every [`POLL_INTERVAL_MS`] until the response reaches
///    `target`, aborting with [`TransportError::UnexpectedRequestId`] if
///    the echoed id ever changes underneath this request.
pub fn reliable_submit<L: SpiLink>(
    link: &mut L,
    request_code: RrCode,
    bitstream: Bitstream,
    target: RrResponse,
) -> Result<Frame, TransportError<L::Error>> {
    let discovered = poll(link)?;
    let rr_id = discovered.rr_id.wrapping_add(1);

    let request = Frame::new(request_code as u8, rr_id, bitstream).to_bytes();

    let mut tries = 0u8;
    let mut last = loop {
        if tries > MAX_TRIES {
            return Err(TransportError::MaxRetriesExceeded);
        }
        let reply_bytes = link.transfer(&request).map_err(TransportError::Link)?;
        let reply = Frame::from_bytes(&reply_bytes);

        if !reply.verify() || reply.rr_id != rr_id {
            tries += 1;
            link.sleep_ms(SUBMIT_RETRY_DELAY_MS);
            continue;
        }

        match RrResponse::try_from(reply.rr_code) {
            Ok(_) => break reply,
            Err(()) => return Err(TransportError::UnrecognizedResponse(reply.rr_code)),
        }
    };

    let mut progress = RrResponse::try_from(last.rr_code)
        .map_err(|()| TransportError::UnrecognizedResponse(last.rr_code))?;

    while progress < target {
        link.sleep_ms(POLL_INTERVAL_MS);

        let poll_bytes = Frame::new(RrCode::Poll as u8, 0, Bitstream::new()).to_bytes();
        let reply_bytes = link.transfer(&poll_bytes).map_err(TransportError::Link)?;
        let reply = Frame::from_bytes(&reply_bytes);

        if !reply.verify() {
            // A single glitched poll reply is not fatal; the next poll
            // interval will ask again.
            continue;
        }

        if reply.rr_id != rr_id {
            return Err(TransportError::UnexpectedRequestId {
                expected: rr_id,
                got: reply.rr_id,
            });
        }

        progress = RrResponse::try_from(reply.rr_code)
            .map_err(|()| TransportError::UnrecognizedResponse(reply.rr_code))?;
        last = reply;
    }

    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{vec, vec::Vec};

    struct ScriptedLink {
        replies: std::collections::VecDeque<[u8; FRAME_LEN]>,
        sleeps: u32,
    }

    impl SpiLink for ScriptedLink {
        type Error = ();

        fn transfer(&mut self, _request: &[u8; FRAME_LEN]) -> Result<[u8; FRAME_LEN], ()> {
            self.replies.pop_front().ok_or(())
        }

        fn sleep_ms(&mut self, _ms: u32) {
            self.sleeps += 1;
        }
    }

    fn reply(rr_code: u8, rr_id: u8) -> [u8; FRAME_LEN] {
        Frame::new(rr_code, rr_id, Bitstream::new()).to_bytes()
    }

    fn corrupt(mut bytes: [u8; FRAME_LEN]) -> [u8; FRAME_LEN] {
        bytes[36] ^= 0xFF;
        bytes
    }

    #[test]
    fn submit_discovers_the_id_then_completes_immediately() {
        let mut link = ScriptedLink {
            replies: std::collections::VecDeque::from(vec![
                reply(RrResponse::Complete as u8, 6), // id-discovery poll
                reply(RrResponse::Complete as u8, 7), // submit ack, id == 6+1
            ]),
            sleeps: 0,
        };
        let result = reliable_submit(
            &mut link,
            RrCode::Transmit,
            Bitstream::new(),
            RrResponse::Complete,
        );
        assert_eq!(result.map(|f| f.rr_id), Ok(7));
    }

    #[test]
    fn submit_retries_past_a_corrupted_ack() {
        let mut link = ScriptedLink {
            replies: std::collections::VecDeque::from(vec![
                reply(RrResponse::Complete as u8, 6),
                corrupt(reply(RrResponse::Seen as u8, 7)),
                corrupt(reply(RrResponse::Seen as u8, 7)),
                reply(RrResponse::Seen as u8, 7),
            ]),
            sleeps: 0,
        };
        let result = reliable_submit(
            &mut link,
            RrCode::Transmit,
            Bitstream::new(),
            RrResponse::Seen,
        );
        assert_eq!(result.map(|f| f.rr_id), Ok(7));
        assert_eq!(link.sleeps, 2);
    }

    #[test]
    fn submit_exhausts_retries_after_max_tries_plus_one_attempts() {
        let mut replies: Vec<_> = vec![reply(RrResponse::Complete as u8, 0)];
        replies.extend((0..=MAX_TRIES).map(|_| corrupt(reply(RrResponse::Seen as u8, 1))));
        let mut link = ScriptedLink {
            replies: replies.into(),
            sleeps: 0,
        };
        let result = reliable_submit(
            &mut link,
            RrCode::Transmit,
            Bitstream::new(),
            RrResponse::Complete,
        );
        assert_eq!(result, Err(TransportError::MaxRetriesExceeded));
        assert!(link.replies.is_empty());
    }

    #[test]
    fn progress_gates_until_target_is_reached() {
        let mut link = ScriptedLink {
            replies: std::collections::VecDeque::from(vec![
                reply(RrResponse::Complete as u8, 2), // discovery
                reply(RrResponse::Seen as u8, 3),     // submit ack
                reply(RrResponse::InProgress as u8, 3),
                reply(RrResponse::InProgress as u8, 3),
                reply(RrResponse::Complete as u8, 3),
            ]),
            sleeps: 0,
        };
        let result = reliable_submit(
            &mut link,
            RrCode::Transmit,
            Bitstream::new(),
            RrResponse::Complete,
        );
        assert_eq!(result.map(|f| f.rr_code), Ok(RrResponse::Complete as u8));
        assert_eq!(link.sleeps, 3);
    }

    #[test]
    fn a_changed_rr_id_during_gating_aborts() {
        let mut link = ScriptedLink {
            replies: std::collections::VecDeque::from(vec![
                reply(RrResponse::Complete as u8, 41),
                reply(RrResponse::Seen as u8, 42),
                reply(RrResponse::Complete as u8, 99),
            ]),
            sleeps: 0,
        };
        let result = reliable_submit(
            &mut link,
            RrCode::Transmit,
            Bitstream::new(),
            RrResponse::Complete,
        );
        assert_eq!(
            result,
            Err(TransportError::UnexpectedRequestId {
                expected: 42,
                got: 99
            })
        );
    }

    #[test]
    fn cancel_can_be_submitted_through_the_same_path() {
        let mut link = ScriptedLink {
            replies: std::collections::VecDeque::from(vec![
                reply(RrResponse::InProgress as u8, 10),
                reply(RrResponse::Complete as u8, 11),
            ]),
            sleeps: 0,
        };
        let result = reliable_submit(
            &mut link,
            RrCode::Cancel,
            Bitstream::new(),
            RrResponse::Complete,
        );
        assert_eq!(result.map(|f| f.rr_code), Ok(RrResponse::Complete as u8));
    }
}
