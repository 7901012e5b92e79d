//! The X10 wire codec: phase-doubled bit grammar, encoder and streaming
//! decoder, per spec §4.1.

use crate::bitstream::{Bitstream, Full};
use crate::command::{CommandRecord, Function, HouseCode};

/// Translates a house/unit/function ordinal (0..15) to its on-wire nibble.
/// The same table is used for house codes, unit codes, and function codes
/// (spec §4.1.1: "Both tables must be used consistently").
pub(crate) const CODE_TABLE: [u8; 16] = [
    0b0110, 0b1110, 0b0010, 0b1010, 0b0001, 0b1001, 0b0101, 0b1101, 0b0111, 0b1111, 0b0011,
    0b1011, 0b0000, 0b1000, 0b0100, 0b1100,
];

/// Inverse of [`CODE_TABLE`]: on-wire nibble to ordinal.
pub(crate) const DECODE_TABLE: [u8; 16] = [
    12, 4, 2, 10, 14, 6, 0, 8, 13, 5, 3, 11, 15, 7, 1, 9,
];

const START_CONDITION: u64 = 0b1110;

fn append_phase_doubled_bit(bs: &mut Bitstream, bit: bool) -> Result<(), Full> {
    bs.append_bits(if bit { 0b10 } else { 0b01 }, 2)
}

fn append_phase_doubled_nibble(bs: &mut Bitstream, nibble: u8) -> Result<(), Full> {
    for shift in (0..4).rev() {
        append_phase_doubled_bit(bs, (nibble >> shift) & 1 != 0)?;
    }
    Ok(())
}

fn append_phase_doubled_byte(bs: &mut Bitstream, byte: u8) -> Result<(), Full> {
    for shift in (0..8).rev() {
        append_phase_doubled_bit(bs, (byte >> shift) & 1 != 0)?;
    }
    Ok(())
}

/// Appends one 22-wire-bit basic frame: the fixed start condition, the
/// house code nibble, the unit/function nibble, and the address/function
/// indicator bit, every payload bit phase-doubled (spec §4.1.1, §4.1.2).
pub fn encode_basic(
    bs: &mut Bitstream,
    hc: HouseCode,
    code_ordinal: u8,
    is_function: bool,
) -> Result<(), Full> {
    bs.append_bits(START_CONDITION, 4)?;
    append_phase_doubled_nibble(bs, CODE_TABLE[hc.ordinal() as usize])?;
    append_phase_doubled_nibble(bs, CODE_TABLE[(code_ordinal & 0xF) as usize])?;
    append_phase_doubled_bit(bs, is_function)
}

/// Appends the 40-wire-bit extended payload: unit code nibble, then the
/// two raw payload bytes, every logical bit phase-doubled (spec §4.1.2).
pub fn encode_extended_payload(
    bs: &mut Bitstream,
    uc_ordinal: u8,
    byte1: u8,
    byte2: u8,
) -> Result<(), Full> {
    append_phase_doubled_nibble(bs, CODE_TABLE[(uc_ordinal & 0xF) as usize])?;
    append_phase_doubled_byte(bs, byte1)?;
    append_phase_doubled_byte(bs, byte2)
}

/// Appends `n` zero bits: the mandatory inter-frame pause, or the gap
/// between an address group and a function group.
pub fn pause(bs: &mut Bitstream, n: u8) -> Result<(), Full> {
    bs.append_zeros(n)
}

/// Errors from [`encode_command`]: either the bitstream ran out of room,
/// or the command record itself was incomplete in a way that made no
/// sense to encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    BitstreamFull,
    MissingHouseCode,
    MissingUnitCode,
    MissingFunction,
    ExtendedRequiresUnit,
}

impl From<Full> for EncodeError {
    fn from(_: Full) -> Self {
        EncodeError::BitstreamFull
    }
}

/// Encodes a command record per spec §4.1.2: repeated address frames (if
/// any), a 6-bit pause, repeated function frames (if any, each possibly
/// followed by its extended payload), and — unless `sticky` — a trailing
/// 6-bit pause.
pub fn encode_command(bs: &mut Bitstream, cmd: &CommandRecord) -> Result<(), EncodeError> {
    let hc = cmd.hc.ok_or(EncodeError::MissingHouseCode)?;

    if cmd.addr_rpt > 0 {
        let uc = cmd.uc.ok_or(EncodeError::MissingUnitCode)?;
        for _ in 0..cmd.addr_rpt {
            encode_basic(bs, hc, uc, false)?;
        }
        pause(bs, 6)?;
    }

    if cmd.func_rpt > 0 {
        let fc = cmd.fc.ok_or(EncodeError::MissingFunction)?;
        for _ in 0..cmd.func_rpt {
            encode_basic(bs, hc, fc.ordinal(), true)?;
            if fc == Function::ExtendedCode {
                let uc = cmd.uc.ok_or(EncodeError::ExtendedRequiresUnit)?;
                encode_extended_payload(bs, uc, cmd.x_byte_1, cmd.x_byte_2)?;
            }
        }
        if !cmd.sticky {
            pause(bs, 6)?;
        }
    }

    Ok(())
}

fn deinterleave_bit(window: u8) -> Option<bool> {
    match window & 0b11 {
        0b10 => Some(true),
        0b01 => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Basic,
    Extended,
    Recover,
    Received,
}

/// A streaming decoder driven one sampled bit at a time. Owned by the
/// caller (spec §9: no global callback/singleton); running several of
/// these in parallel, e.g. in a test harness, is just a matter of owning
/// several values.
#[derive(Debug, Clone)]
pub struct Decoder {
    state: State,
    buf: u8,
    counter: u16,
    rbuf: u32,
    last_word: Option<u32>,
    repeats: u16,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            buf: 0,
            counter: 0,
            rbuf: 0,
            last_word: None,
            repeats: 0,
        }
    }

    /// Feeds one sampled bit. Returns a committed [`CommandRecord`] when
    /// this bit causes one to be committed, per the repeat-coalescing
    /// rule of spec §4.1.4.
    pub fn feed(&mut self, bit: bool) -> Option<CommandRecord> {
        let prior_word = self.last_word;
        let prior_repeats = self.repeats;
        let mut commit = false;

        self.buf = (self.buf << 1) | bit as u8;
        self.counter = self.counter.wrapping_add(1);

        // Inter-frame pause: six consecutive zero bits forcibly return to
        // Idle from any other state (spec §4.1.3).
        if self.state != State::Idle && (self.buf & 0b0011_1111) == 0 {
            self.state = State::Idle;
            self.buf = 0;
        }

        match self.state {
            State::Idle => {
                if prior_word.is_some() && self.counter == 5 {
                    commit = true;
                }
                if (self.buf & 0x0F) as u64 == START_CONDITION {
                    log::trace!("x10 decoder: start condition detected");
                    self.counter = 0;
                    self.rbuf = 0;
                    self.state = State::Basic;
                }
            }
            State::Basic | State::Extended => {
                if self.counter % 2 == 0 {
                    match deinterleave_bit(self.buf) {
                        Some(logical) => {
                            self.rbuf = (self.rbuf << 1) | logical as u32;
                            if self.counter == 18 {
                                let is_function = self.rbuf & 1 != 0;
                                let code_nibble = ((self.rbuf >> 1) & 0xF) as u8;
                                let is_extended = is_function
                                    && DECODE_TABLE[code_nibble as usize]
                                        == Function::ExtendedCode.ordinal();
                                if is_extended {
                                    self.state = State::Extended;
                                } else {
                                    self.rbuf <<= 20;
                                    self.state = State::Received;
                                }
                            } else if self.counter == 58 {
                                self.state = State::Received;
                            }
                        }
                        None => {
                            log::debug!("x10 decoder: invalid phase-doubled pair, recovering");
                            self.state = State::Recover;
                        }
                    }
                }
            }
            State::Recover => {}
        }

        let mut new_pending = None;
        if self.state == State::Received {
            let tagged = self.rbuf | (1u32 << 31);
            match prior_word {
                Some(last) if last == tagged => {
                    self.repeats = prior_repeats + 1;
                }
                Some(_) => {
                    commit = true;
                    self.repeats = 1;
                }
                None => {
                    self.repeats = 1;
                }
            }
            new_pending = Some(tagged);
            self.buf = 0;
            self.counter = 0;
            self.state = State::Idle;
        }

        if prior_word.is_some() && self.state == State::Recover {
            commit = true;
        }

        let result = if commit {
            prior_word.map(|word| build_record(word, prior_repeats.max(1)))
        } else {
            None
        };

        if let Some(word) = new_pending {
            self.last_word = Some(word);
        } else if commit {
            self.last_word = None;
            self.repeats = 0;
        }

        result
    }
}

fn build_record(word: u32, repeats: u16) -> CommandRecord {
    let mut cmd = CommandRecord::default();
    let hc_nibble = ((word >> 25) & 0xF) as u8;
    let code_nibble = ((word >> 21) & 0xF) as u8;
    let is_function = (word >> 20) & 1 != 0;

    cmd.hc = HouseCode::from_ordinal(DECODE_TABLE[hc_nibble as usize]);

    if is_function {
        let fc = Function::from_ordinal(DECODE_TABLE[code_nibble as usize])
            .expect("decode table always yields a valid function ordinal");
        cmd.fc = Some(fc);
        cmd.func_rpt = repeats;
        if fc == Function::ExtendedCode {
            let uc_nibble = ((word >> 16) & 0xF) as u8;
            cmd.uc = Some(DECODE_TABLE[uc_nibble as usize]);
            cmd.x_byte_1 = ((word >> 8) & 0xFF) as u8;
            cmd.x_byte_2 = (word & 0xFF) as u8;
        }
    } else {
        cmd.uc = Some(DECODE_TABLE[code_nibble as usize]);
        cmd.addr_rpt = repeats;
    }

    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::parse;
    use std::vec::Vec;

    fn decode_all(bs: &Bitstream) -> Vec<CommandRecord> {
        let mut decoder = Decoder::new();
        let mut out = Vec::new();
        for bit in bs.iter_bits() {
            if let Some(rec) = decoder.feed(bit) {
                out.push(rec);
            }
        }
        for _ in 0..8 {
            if let Some(rec) = decoder.feed(false) {
                out.push(rec);
            }
        }
        out
    }

    #[test]
    fn scenario_encode_address_only() {
        let mut bs = Bitstream::new();
        encode_basic(&mut bs, HouseCode::from_ordinal(0).unwrap(), 0, false).unwrap();
        assert_eq!(bs.tail(), 22);
        // Start 1110, house A (0110) phase-doubled, unit 1 (0110) phase-doubled,
        // address indicator bit 0 phase-doubled.
        let literal = "1110011010010110100101";
        let expected: Vec<bool> = literal.chars().map(|c| c == '1').collect();
        let bits: Vec<bool> = bs.iter_bits().collect();
        assert_eq!(bits, expected);
    }

    #[test]
    fn scenario_encode_a_on_default_repeats() {
        let cmd = parse("A1:On").unwrap();
        let mut bs = Bitstream::new();
        encode_command(&mut bs, &cmd).unwrap();
        assert_eq!(bs.tail(), 22 + 22 + 6 + 22 + 22 + 6);
    }

    #[test]
    fn roundtrip_basic_address() {
        let cmd = parse("A1").unwrap();
        let mut bs = Bitstream::new();
        encode_command(&mut bs, &cmd).unwrap();
        let records = decode_all(&bs);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hc, cmd.hc);
        assert_eq!(records[0].uc, cmd.uc);
        assert_eq!(records[0].addr_rpt, cmd.addr_rpt);
    }

    #[test]
    fn roundtrip_every_function_with_various_repeats() {
        for ordinal in 0..16u8 {
            let fc = Function::from_ordinal(ordinal).unwrap();
            if fc == Function::ExtendedCode {
                continue; // covered separately, needs a unit code.
            }
            for func_rpt in [1u16, 2, 3] {
                let cmd = CommandRecord {
                    hc: HouseCode::from_ordinal(3),
                    uc: None,
                    fc: Some(fc),
                    addr_rpt: 0,
                    func_rpt,
                    x_byte_1: 0,
                    x_byte_2: 0,
                    sticky: false,
                };
                let mut bs = Bitstream::new();
                encode_command(&mut bs, &cmd).unwrap();
                let records = decode_all(&bs);
                assert_eq!(records.len(), 1, "function {:?}", fc);
                assert_eq!(records[0].fc, Some(fc));
                assert_eq!(records[0].func_rpt, func_rpt);
            }
        }
    }

    #[test]
    fn roundtrip_extended_code() {
        for (uc, b1, b2) in [(0u8, 0x00u8, 0x00u8), (5, 0x12, 0xAB), (15, 0xFF, 0x31)] {
            let cmd = CommandRecord {
                hc: HouseCode::from_ordinal(7),
                uc: Some(uc),
                fc: Some(Function::ExtendedCode),
                addr_rpt: 0,
                func_rpt: 2,
                x_byte_1: b1,
                x_byte_2: b2,
                sticky: false,
            };
            let mut bs = Bitstream::new();
            encode_command(&mut bs, &cmd).unwrap();
            let records = decode_all(&bs);
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].fc, Some(Function::ExtendedCode));
            assert_eq!(records[0].uc, Some(uc));
            assert_eq!(records[0].x_byte_1, b1);
            assert_eq!(records[0].x_byte_2, b2);
            assert_eq!(records[0].func_rpt, 2);
        }
    }

    #[test]
    fn decoder_forces_idle_on_six_zero_bits_regardless_of_state() {
        let mut decoder = Decoder::new();
        for bit in [true, true, true, false, true, false] {
            decoder.feed(bit);
        }
        for _ in 0..6 {
            decoder.feed(false);
        }
        // Feeding a start condition afterwards should be recognized cleanly,
        // which would not happen if leftover state confused the machine.
        let cmd = CommandRecord {
            hc: HouseCode::from_ordinal(2),
            uc: Some(1),
            fc: None,
            addr_rpt: 1,
            func_rpt: 0,
            x_byte_1: 0,
            x_byte_2: 0,
            sticky: false,
        };
        let mut bs = Bitstream::new();
        encode_command(&mut bs, &cmd).unwrap();
        let mut committed = None;
        for bit in bs.iter_bits() {
            if let Some(rec) = decoder.feed(bit) {
                committed = Some(rec);
            }
        }
        for _ in 0..8 {
            if let Some(rec) = decoder.feed(false) {
                committed = Some(rec);
            }
        }
        let rec = committed.unwrap();
        assert_eq!(rec.hc, cmd.hc);
        assert_eq!(rec.uc, cmd.uc);
    }

    #[test]
    fn decoder_recovers_from_invalid_pair() {
        let mut decoder = Decoder::new();
        for bit in [true, true, true, false] {
            assert_eq!(decoder.feed(bit), None);
        }
        // An invalid (non-phase-doubled) pair: two equal bits.
        assert_eq!(decoder.feed(true), None);
        assert_eq!(decoder.feed(true), None);
        // The decoder should have moved to Recover and stay quiet until
        // six zero bits return it to Idle.
        for _ in 0..5 {
            assert_eq!(decoder.feed(false), None);
        }
    }
}
