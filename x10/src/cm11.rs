//! Emulation of the CM11A legacy serial protocol, so software written
//! against a real CM11 can drive this bridge unmodified (spec §6 "CM11
//! emulation").
//!
//! Grounded closely on `cm11_command_parse`, `cm11_command_tobuffer`,
//! `cm11_checksum` and `cm11_state_machine` in the original controller:
//! a two-byte (or five-byte, for extended codes) command framed by a
//! checksum handshake, and a poll/answer exchange for delivering commands
//! received off the powerline back to the legacy client.

use crate::codec::{CODE_TABLE, DECODE_TABLE};
use crate::command::{CommandRecord, Function, HouseCode};

const CM11_WBUF_OCTETS: usize = 10;
const CM11_TIMEOUT_MS: u32 = 1000;

/// Where a [`Cm11Emulator`] is in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cm11State {
    Ready,
    TxAck,
    RxPoll,
}

/// A fixed-capacity byte buffer, sized for the largest single reply this
/// emulator ever produces (a poll answer, at most `CM11_WBUF_OCTETS`).
#[derive(Debug, Clone, Copy)]
pub struct OutputBytes {
    buf: [u8; CM11_WBUF_OCTETS],
    len: u8,
}

impl OutputBytes {
    fn new() -> Self {
        Self {
            buf: [0; CM11_WBUF_OCTETS],
            len: 0,
        }
    }

    fn push(&mut self, byte: u8) {
        if (self.len as usize) < self.buf.len() {
            self.buf[self.len as usize] = byte;
            self.len += 1;
        }
    }

    fn extend_from_slice(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.push(b);
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len as usize]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Everything a single [`Cm11Emulator::feed`] or [`Cm11Emulator::tick`]
/// call produced: bytes to write back to the legacy client, and a
/// command to actually transmit, if the handshake just completed one.
#[derive(Debug, Clone)]
pub struct Cm11Step {
    pub output: OutputBytes,
    pub transmit: Option<CommandRecord>,
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

enum ParseOutcome {
    NeedMore,
    Invalid,
    Parsed { cmd: CommandRecord },
}

/// Parses a transmit-direction command: header byte, code byte, and (for
/// an extended command) three further bytes.
fn parse_transmit(buf: &[u8]) -> ParseOutcome {
    if buf.len() < 2 {
        return ParseOutcome::NeedMore;
    }
    let hdr = buf[0];
    if hdr & 0x04 == 0 {
        return ParseOutcome::Invalid;
    }
    let dims = ((hdr >> 3) & 0x1F) as u16;
    let is_function = hdr & 0x02 != 0;
    let is_extended = hdr & 0x01 != 0;
    let code = buf[1];

    let mut cmd = CommandRecord {
        hc: HouseCode::from_ordinal(DECODE_TABLE[((code >> 4) & 0xF) as usize]),
        ..CommandRecord::default()
    };

    if is_function {
        let fc = match Function::from_ordinal(DECODE_TABLE[(code & 0xF) as usize]) {
            Some(fc) => fc,
            None => return ParseOutcome::Invalid,
        };
        cmd.fc = Some(fc);
        cmd.func_rpt = if matches!(fc, Function::Dim | Function::Bright) {
            dims
        } else {
            2
        };
    } else {
        cmd.uc = Some(DECODE_TABLE[(code & 0xF) as usize]);
        cmd.addr_rpt = 2;
    }

    if is_extended {
        if buf.len() < 5 {
            return ParseOutcome::NeedMore;
        }
        cmd.uc = Some(DECODE_TABLE[(buf[2] & 0xF) as usize]);
        cmd.x_byte_1 = buf[3];
        cmd.x_byte_2 = buf[4];
    }

    ParseOutcome::Parsed { cmd }
}

/// A CM11A protocol emulator, driven one received byte at a time. Holds
/// no file descriptor or clock of its own; the caller supplies elapsed
/// time via [`Cm11Emulator::tick`].
#[derive(Debug, Clone)]
pub struct Cm11Emulator {
    state: Cm11State,
    rbuf: [u8; 8],
    rbuf_len: usize,
    cbuf: [u8; CM11_WBUF_OCTETS],
    has_cbuf: bool,
    staged: Option<CommandRecord>,
    idle_ms: u32,
}

impl Default for Cm11Emulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Cm11Emulator {
    pub fn new() -> Self {
        Self {
            state: Cm11State::Ready,
            rbuf: [0; 8],
            rbuf_len: 0,
            cbuf: [0; CM11_WBUF_OCTETS],
            has_cbuf: false,
            staged: None,
            idle_ms: 0,
        }
    }

    pub fn state(&self) -> Cm11State {
        self.state
    }

    /// Stages a command received off the powerline for delivery to the
    /// legacy client on the next poll (spec §6: the coprocessor model
    /// never decodes bits itself, so this is fed a record already
    /// produced by [`crate::codec::Decoder`]).
    pub fn upload_record(&mut self, cmd: &CommandRecord) {
        let mut i = self.cbuf[0] as usize;
        if i == 0 {
            i = 1;
        }
        if i + 1 > CM11_WBUF_OCTETS - 1 {
            return;
        }
        let hc_nibble = cmd
            .hc
            .map(|hc| CODE_TABLE[hc.ordinal() as usize])
            .unwrap_or(0);

        if cmd.addr_rpt > 0 {
            if let Some(uc) = cmd.uc {
                i += 1;
                self.cbuf[i] = (hc_nibble << 4) | CODE_TABLE[uc as usize];
            }
        }
        if cmd.func_rpt > 0 {
            if let Some(fc) = cmd.fc {
                i += 1;
                self.cbuf[i] = (hc_nibble << 4) | CODE_TABLE[fc.ordinal() as usize];
                self.cbuf[1] |= 1 << (i - 2);
                match fc {
                    Function::Dim | Function::Bright => {
                        if i + 1 > CM11_WBUF_OCTETS - 1 {
                            self.cbuf[0] = i as u8;
                            self.has_cbuf = true;
                            return;
                        }
                        let dimlevel = cmd.func_rpt.saturating_sub(1) * 11 + 3;
                        i += 1;
                        self.cbuf[i] = dimlevel.min(210) as u8;
                    }
                    Function::ExtendedCode => {
                        if i + 3 > CM11_WBUF_OCTETS - 1 {
                            self.cbuf[0] = i as u8;
                            self.has_cbuf = true;
                            return;
                        }
                        i += 1;
                        self.cbuf[i] = CODE_TABLE[cmd.uc.unwrap_or(0) as usize];
                        i += 1;
                        self.cbuf[i] = cmd.x_byte_1;
                        i += 1;
                        self.cbuf[i] = cmd.x_byte_2;
                    }
                    _ => {}
                }
            }
        }
        self.cbuf[0] = i as u8;
        self.has_cbuf = true;
    }

    /// Feeds one byte received from the legacy client.
    pub fn feed(&mut self, byte: u8) -> Cm11Step {
        if self.rbuf_len < self.rbuf.len() {
            self.rbuf[self.rbuf_len] = byte;
            self.rbuf_len += 1;
        } else {
            self.rbuf_len = 0;
        }
        self.idle_ms = 0;
        self.pump()
    }

    /// Advances the idle clock. A stalled handshake (no reply within
    /// [`CM11_TIMEOUT_MS`]) resets to [`Cm11State::Ready`]; a stalled
    /// poll additionally re-asserts the poll byte immediately, since the
    /// buffered command is still waiting to be delivered.
    pub fn tick(&mut self, elapsed_ms: u32) -> Cm11Step {
        self.idle_ms = self.idle_ms.saturating_add(elapsed_ms);
        if self.idle_ms < CM11_TIMEOUT_MS {
            return Cm11Step {
                output: OutputBytes::new(),
                transmit: None,
            };
        }
        match self.state {
            Cm11State::TxAck => {
                self.state = Cm11State::Ready;
                self.staged = None;
                self.idle_ms = 0;
                Cm11Step {
                    output: OutputBytes::new(),
                    transmit: None,
                }
            }
            Cm11State::RxPoll => {
                self.state = Cm11State::Ready;
                self.idle_ms = 0;
                self.pump()
            }
            Cm11State::Ready => Cm11Step {
                output: OutputBytes::new(),
                transmit: None,
            },
        }
    }

    fn pump(&mut self) -> Cm11Step {
        let mut output = OutputBytes::new();
        let mut transmit = None;

        loop {
            match self.state {
                Cm11State::Ready => {
                    match parse_transmit(&self.rbuf[..self.rbuf_len]) {
                        ParseOutcome::Parsed { cmd } => {
                            output.push(checksum(&self.rbuf[..self.rbuf_len]));
                            self.staged = Some(cmd);
                            self.rbuf_len = 0;
                            self.state = Cm11State::TxAck;
                            self.idle_ms = 0;
                            continue;
                        }
                        ParseOutcome::Invalid => {
                            self.rbuf_len = 0;
                        }
                        ParseOutcome::NeedMore => {}
                    }
                    if self.has_cbuf {
                        output.push(0x5A);
                        self.rbuf_len = 0;
                        self.state = Cm11State::RxPoll;
                        self.idle_ms = 0;
                        continue;
                    }
                    break;
                }
                Cm11State::TxAck => {
                    if self.rbuf_len > 0 {
                        if self.rbuf[0] == 0x00 {
                            transmit = self.staged.take();
                            output.push(0x55);
                            self.rbuf_len = 0;
                        } else {
                            // Not the confirm byte we expected: leave it
                            // buffered and reparse it as the start of a
                            // new transmission in `Ready`, rather than
                            // throwing it away.
                            self.staged = None;
                        }
                        self.state = Cm11State::Ready;
                        self.idle_ms = 0;
                        continue;
                    }
                    break;
                }
                Cm11State::RxPoll => {
                    if self.rbuf_len > 0 {
                        if self.rbuf[0] == 0xC3 {
                            let count = self.cbuf[0] as usize;
                            output.extend_from_slice(&self.cbuf[..=count]);
                            self.cbuf = [0; CM11_WBUF_OCTETS];
                            self.has_cbuf = false;
                            self.rbuf_len = 0;
                        }
                        // Not the poll-answer byte: leave it buffered
                        // and reparse it as the start of a new
                        // transmission in `Ready`.
                        self.state = Cm11State::Ready;
                        self.idle_ms = 0;
                        continue;
                    }
                    break;
                }
            }
        }

        Cm11Step { output, transmit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_ack_then_confirm_flow() {
        let mut cm11 = Cm11Emulator::new();
        // hdr 0x06: transfer bit (0x04) + function bit (0x02); house A, function AllUnitsOff (ordinal 12).
        let step = cm11.feed(0x06);
        assert!(step.output.is_empty());
        let step = cm11.feed(0x60);
        assert_eq!(step.output.as_slice(), &[0x66]);
        assert_eq!(cm11.state(), Cm11State::TxAck);

        let step = cm11.feed(0x00);
        assert_eq!(step.output.as_slice(), &[0x55]);
        assert_eq!(cm11.state(), Cm11State::Ready);
        assert!(step.transmit.is_some());
    }

    #[test]
    fn a_garbled_confirm_byte_aborts_back_to_ready() {
        let mut cm11 = Cm11Emulator::new();
        cm11.feed(0x06);
        let step = cm11.feed(0x60);
        assert_eq!(step.output.as_slice(), &[0x66]);

        let step = cm11.feed(0x42);
        assert!(step.transmit.is_none());
        assert_eq!(cm11.state(), Cm11State::Ready);
    }

    #[test]
    fn poll_then_answer_delivers_a_buffered_address() {
        let mut cm11 = Cm11Emulator::new();
        let cmd = CommandRecord {
            hc: HouseCode::from_ordinal(0),
            uc: Some(0),
            fc: None,
            addr_rpt: 2,
            func_rpt: 0,
            x_byte_1: 0,
            x_byte_2: 0,
            sticky: false,
        };
        cm11.upload_record(&cmd);

        let step = cm11.feed(0xFF); // any byte while Ready with nothing to parse triggers the poll.
        assert_eq!(step.output.as_slice(), &[0x5A]);
        assert_eq!(cm11.state(), Cm11State::RxPoll);

        let step = cm11.feed(0xC3);
        assert_eq!(step.output.as_slice()[0], 2); // 2 bytes follow: bitmask + address byte.
        assert_eq!(cm11.state(), Cm11State::Ready);
    }

    #[test]
    fn idle_timeout_resets_a_stalled_ack() {
        let mut cm11 = Cm11Emulator::new();
        cm11.feed(0x06);
        cm11.feed(0x60);
        assert_eq!(cm11.state(), Cm11State::TxAck);
        let step = cm11.tick(CM11_TIMEOUT_MS);
        assert_eq!(cm11.state(), Cm11State::Ready);
        assert!(step.transmit.is_none());
    }

    #[test]
    fn idle_timeout_during_poll_reasserts_the_poll_byte() {
        let mut cm11 = Cm11Emulator::new();
        let cmd = CommandRecord {
            hc: HouseCode::from_ordinal(1),
            uc: None,
            fc: Some(Function::On),
            addr_rpt: 0,
            func_rpt: 2,
            x_byte_1: 0,
            x_byte_2: 0,
            sticky: false,
        };
        cm11.upload_record(&cmd);
        cm11.feed(0xFF);
        assert_eq!(cm11.state(), Cm11State::RxPoll);

        let step = cm11.tick(CM11_TIMEOUT_MS);
        assert_eq!(step.output.as_slice(), &[0x5A]);
        assert_eq!(cm11.state(), Cm11State::RxPoll);
    }
}
