//! The command model (an abstract X10 command record) and the textual
//! parser/formatter grammar described in spec §4.4.

use core::fmt;

/// House code A..P, stored as its ordinal (A=0 .. P=15).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HouseCode(u8);

impl HouseCode {
    /// Builds a house code from its ordinal (0=A .. 15=P).
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        if ordinal <= 15 {
            Some(Self(ordinal))
        } else {
            None
        }
    }

    pub fn from_letter(letter: char) -> Option<Self> {
        let letter = letter.to_ascii_uppercase();
        if ('A'..='P').contains(&letter) {
            Some(Self(letter as u8 - b'A'))
        } else {
            None
        }
    }

    pub fn ordinal(self) -> u8 {
        self.0
    }

    pub fn letter(self) -> char {
        (b'A' + self.0) as char
    }
}

impl fmt::Display for HouseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// The sixteen named X10 function codes, stored with the ordinals the
/// on-wire nibble tables are indexed by (spec §4.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Function {
    AllLightsOff = 0,
    StatusOff = 1,
    On = 2,
    PresetDim1 = 3,
    AllLightsOn = 4,
    HailAck = 5,
    Bright = 6,
    StatusOn = 7,
    ExtendedCode = 8,
    StatusRequest = 9,
    Off = 10,
    PresetDim2 = 11,
    AllUnitsOff = 12,
    HailRequest = 13,
    Dim = 14,
    ExtendedData = 15,
}

impl Function {
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        use Function::*;
        Some(match ordinal {
            0 => AllLightsOff,
            1 => StatusOff,
            2 => On,
            3 => PresetDim1,
            4 => AllLightsOn,
            5 => HailAck,
            6 => Bright,
            7 => StatusOn,
            8 => ExtendedCode,
            9 => StatusRequest,
            10 => Off,
            11 => PresetDim2,
            12 => AllUnitsOff,
            13 => HailRequest,
            14 => Dim,
            15 => ExtendedData,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use Function::*;
        match self {
            AllLightsOff => "AllLightsOff",
            StatusOff => "StatusOff",
            On => "On",
            PresetDim1 => "PresetDim1",
            AllLightsOn => "AllLightsOn",
            HailAck => "HailAck",
            Bright => "Bright",
            StatusOn => "StatusOn",
            ExtendedCode => "ExtendedCode",
            StatusRequest => "StatusRequest",
            Off => "Off",
            PresetDim2 => "PresetDim2",
            AllUnitsOff => "AllUnitsOff",
            HailRequest => "HailRequest",
            Dim => "Dim",
            ExtendedData => "ExtendedData",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        use Function::*;
        Some(match name {
            "allunitsoff" => AllUnitsOff,
            "alllightsoff" => AllLightsOff,
            "alllightson" => AllLightsOn,
            "off" => Off,
            "on" => On,
            "dim" => Dim,
            "bright" => Bright,
            "status" => StatusRequest,
            "statuson" => StatusOn,
            "statusoff" => StatusOff,
            "hail" => HailRequest,
            "hailack" => HailAck,
            _ => return None,
        })
    }
}

/// An abstract X10 command, matching spec §3 "Command record".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandRecord {
    pub hc: Option<HouseCode>,
    pub uc: Option<u8>,
    pub fc: Option<Function>,
    pub addr_rpt: u16,
    pub func_rpt: u16,
    pub x_byte_1: u8,
    pub x_byte_2: u8,
    pub sticky: bool,
}

impl CommandRecord {
    /// A record is transmittable iff `hc` is set and at least one of `uc`,
    /// `fc` is set; `ExtendedCode` additionally requires `uc`.
    pub fn is_transmittable(&self) -> bool {
        if self.hc.is_none() {
            return false;
        }
        if self.uc.is_none() && self.fc.is_none() {
            return false;
        }
        if self.fc == Some(Function::ExtendedCode) && self.uc.is_none() {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    BadHouseCode,
    NonNumericUnit,
    UnitOutOfRange,
    UnknownFunction,
    XPresetOutOfRange,
    MalformedXPreset,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ParseError::BadHouseCode => "X10 address must begin with a house code letter A..P",
            ParseError::NonNumericUnit => "X10 unit number must be numeric",
            ParseError::UnitOutOfRange => "unit code out of bounds [1..16]",
            ParseError::UnknownFunction => "command not understood",
            ParseError::XPresetOutOfRange => "xpreset value not in range [0..63]",
            ParseError::MalformedXPreset => "xpreset command malformed, expected xpreset[n]",
        };
        f.write_str(msg)
    }
}

/// Parses the grammar `[<hc>[<unit>]][":"<function>]`, case-insensitive,
/// per spec §4.4.
pub fn parse(input: &str) -> Result<CommandRecord, ParseError> {
    let lower = input.to_ascii_lowercase();
    let mut cmd = CommandRecord::default();

    let (addr_part, func_part) = match lower.split_once(':') {
        Some((a, f)) => (a, f),
        None => (lower.as_str(), ""),
    };

    if !addr_part.is_empty() {
        let mut chars = addr_part.chars();
        let hc_char = chars.next().unwrap();
        let hc = HouseCode::from_letter(hc_char).ok_or(ParseError::BadHouseCode)?;
        cmd.hc = Some(hc);

        let digits: &str = &addr_part[hc_char.len_utf8()..];
        if !digits.is_empty() {
            if !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(ParseError::NonNumericUnit);
            }
            let unit: i32 = digits.parse().map_err(|_| ParseError::NonNumericUnit)?;
            let zero_based = unit - 1;
            if !(0..=15).contains(&zero_based) {
                return Err(ParseError::UnitOutOfRange);
            }
            cmd.uc = Some(zero_based as u8);
            cmd.addr_rpt = 2;
        }
    }

    if !func_part.is_empty() {
        cmd.func_rpt = 2;
        if let Some(fc) = Function::from_name(func_part) {
            cmd.fc = Some(fc);
        } else if func_part == "microdim" {
            cmd.fc = Some(Function::Dim);
            cmd.func_rpt = 1;
            cmd.sticky = true;
        } else if func_part == "microbright" {
            cmd.fc = Some(Function::Bright);
            cmd.func_rpt = 1;
            cmd.sticky = true;
        } else if let Some(rest) = func_part.strip_prefix("xpreset[") {
            let digits_end = rest.find(']').ok_or(ParseError::MalformedXPreset)?;
            let (digits, trailer) = rest.split_at(digits_end);
            if trailer != "]" || digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(ParseError::MalformedXPreset);
            }
            let n: u32 = digits.parse().map_err(|_| ParseError::MalformedXPreset)?;
            if n > 63 {
                return Err(ParseError::XPresetOutOfRange);
            }
            cmd.fc = Some(Function::ExtendedCode);
            cmd.x_byte_1 = n as u8;
            cmd.x_byte_2 = 0x31;
            cmd.addr_rpt = 0;
        } else {
            return Err(ParseError::UnknownFunction);
        }
    }

    Ok(cmd)
}

/// Renders a command back to the grammar [`parse`] accepts: the inverse
/// used by the parser round-trip test and by command-logging diagnostics.
/// Only meaningful for a record built by (or equivalent to one built by)
/// [`parse`]; a record with, say, `fc` set but `hc` unset still formats,
/// it just won't be transmittable.
#[cfg(feature = "std")]
pub fn format(cmd: &CommandRecord) -> std::string::String {
    use std::string::String;

    let mut out = String::new();
    if let Some(hc) = cmd.hc {
        out.push(hc.letter());
        if let Some(uc) = cmd.uc {
            out.push_str(&(uc + 1).to_string());
        }
    }
    if let Some(fc) = cmd.fc {
        if !out.is_empty() {
            out.push(':');
        }
        match fc {
            Function::Dim if cmd.sticky => out.push_str("microdim"),
            Function::Bright if cmd.sticky => out.push_str("microbright"),
            Function::ExtendedCode => {
                out.push_str("xpreset[");
                out.push_str(&cmd.x_byte_1.to_string());
                out.push(']');
            }
            Function::AllUnitsOff => out.push_str("allunitsoff"),
            Function::AllLightsOff => out.push_str("alllightsoff"),
            Function::AllLightsOn => out.push_str("alllightson"),
            Function::Off => out.push_str("off"),
            Function::On => out.push_str("on"),
            Function::Dim => out.push_str("dim"),
            Function::Bright => out.push_str("bright"),
            Function::StatusRequest => out.push_str("status"),
            Function::StatusOn => out.push_str("statuson"),
            Function::StatusOff => out.push_str("statusoff"),
            Function::HailRequest => out.push_str("hail"),
            Function::HailAck => out.push_str("hailack"),
            Function::PresetDim1 | Function::PresetDim2 | Function::ExtendedData => {
                out.push_str(fc.name());
            }
        }
    }
    out
}
