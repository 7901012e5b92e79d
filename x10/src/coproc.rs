//! A software model of the coprocessor's request/response and bit-shift
//! behavior, decoupled from the AVR timers and interrupt vectors that
//! drive it in hardware (spec §9: "a reimplementation should not
//! reintroduce them").
//!
//! This state machine only shifts raw bits in and out; it never decodes
//! an X10 command itself. Decoding a received bitstream is exclusively
//! [`crate::codec::Decoder`]'s job, run on the host after polling.

use crate::bitstream::{Bitstream, CAPACITY_BITS, CAPACITY_OCTETS};
use crate::frame::{Frame, RrCode, RrResponse};

/// The coprocessor's view of the powerline receive ring, the transmit
/// in progress (if any), and at most one request queued behind it.
#[derive(Debug, Clone)]
pub struct CoprocessorState {
    rx_data: [u8; CAPACITY_OCTETS],
    rx_cursor: u16,
    tx_active: Option<Bitstream>,
    tx_cursor: u16,
    tx_pending: Option<Bitstream>,
    last_rr_id: u8,
    current_code: RrResponse,
}

impl Default for CoprocessorState {
    fn default() -> Self {
        Self::new()
    }
}

impl CoprocessorState {
    pub fn new() -> Self {
        Self {
            rx_data: [0u8; CAPACITY_OCTETS],
            rx_cursor: 0,
            tx_active: None,
            tx_cursor: 0,
            tx_pending: None,
            last_rr_id: 0,
            current_code: RrResponse::Complete,
        }
    }

    /// Shifts one bit sampled off the powerline into the receive ring.
    /// The ring never stalls: once it wraps past [`CAPACITY_BITS`] it
    /// overwrites the oldest bits, exactly as the coprocessor's
    /// `rx_x10_index` wraps rather than blocks. A host that wants every
    /// bit has to poll at least once per 192 samples.
    pub fn sample_bit(&mut self, bit: bool) {
        let index = self.rx_cursor;
        let byte = &mut self.rx_data[(index / 8) as usize];
        let mask = 0x80 >> (index % 8);
        if bit {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
        self.rx_cursor = (index + 1) % CAPACITY_BITS;
    }

    /// Advances an in-progress transmission by one bit and returns it, or
    /// `None` when there is nothing to transmit right now. Promotes a
    /// queued request into the active slot as soon as the current one
    /// drains, the same moment the response flips from SEEN/INPROGRESS
    /// to INPROGRESS for the newly-promoted request.
    pub fn tx_step(&mut self) -> Option<bool> {
        let active = self.tx_active.as_ref()?;
        let bit = active.bit(self.tx_cursor);
        self.tx_cursor += 1;
        if self.tx_cursor >= active.tail() {
            self.tx_active = None;
            self.tx_cursor = 0;
            if let Some(next) = self.tx_pending.take() {
                self.tx_active = Some(next);
                self.current_code = RrResponse::InProgress;
            } else {
                self.current_code = RrResponse::Complete;
            }
        }
        Some(bit)
    }

    /// Handles one request frame and returns the response to send back.
    ///
    /// A frame that fails CRC verification is ignored entirely, with no
    /// state change, matching the coprocessor gating its whole dispatch
    /// switch behind a CRC check. `Poll` never mutates state either: the
    /// coprocessor only ever updates its response mirror from `Cancel`
    /// and `Transmit`, so a poll's own `rr_id` is irrelevant and is not
    /// even looked at here.
    pub fn dispatch(&mut self, request: &Frame) -> Frame {
        if request.verify() {
            match RrCode::try_from(request.rr_code) {
                Ok(RrCode::Transmit) => {
                    self.last_rr_id = request.rr_id;
                    if self.tx_active.is_none() {
                        self.tx_active = Some(request.bitstream);
                        self.tx_cursor = 0;
                        self.current_code = RrResponse::InProgress;
                    } else {
                        self.tx_pending = Some(request.bitstream);
                        self.current_code = RrResponse::Seen;
                    }
                }
                Ok(RrCode::Cancel) => {
                    self.last_rr_id = request.rr_id;
                    self.tx_active = None;
                    self.tx_cursor = 0;
                    self.tx_pending = None;
                    self.current_code = RrResponse::Complete;
                }
                Ok(RrCode::Poll) | Err(()) => {}
            }
        }
        Frame::new(self.current_code as u8, self.last_rr_id, self.snapshot_rx())
    }

    pub fn poll_response(&self) -> RrResponse {
        self.current_code
    }

    fn snapshot_rx(&self) -> Bitstream {
        let mut bs = Bitstream::new();
        bs.raw_mut().copy_from_slice(&self.rx_data);
        bs.set_tail(self.rx_cursor);
        bs
    }
}
