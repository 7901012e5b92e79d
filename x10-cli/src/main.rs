//! Host CLI for the X10 powerline bridge: `poll`, `listen`, `listenraw`,
//! `cm11`, or a textual X10 command, driven over a Linux `spidev` link.
//!
//! Flags mirror the original `x10send`'s `getopt_long` surface, folded into
//! a `clap` derive parser; `-v`/`--verbose` now feeds `env_logger`'s filter
//! instead of a hand-rolled `plog`/`verbosity` global.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{debug, info, trace, warn};

use x10::bitstream::{Bitstream, CAPACITY_BITS};
use x10::cm11::Cm11Emulator;
use x10::codec::{encode_command, Decoder};
use x10::command::{self, CommandRecord};
use x10::frame::{RrCode, RrResponse};
use x10::transport::{self, SpiLink};
use x10_hal::cm11io::{StdinReader, StdoutWriter};
use x10_hal::spi::{Config, SpidevLink};

/// X10 control via SPI: poll the coprocessor, listen for incoming
/// transmissions, emulate a CM11A, or send a command.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// SPI device to use
    #[arg(short = 'D', long, default_value = "/dev/spidev1.1")]
    device: String,
    /// Max clock speed, in Hz
    #[arg(short = 's', long, default_value_t = 130_000)]
    speed: u32,
    /// Inter-word delay, in microseconds
    #[arg(short = 'd', long, default_value_t = 0)]
    delay: u16,
    /// Bits per word
    #[arg(short = 'b', long, default_value_t = 8)]
    bpw: u8,
    /// Loopback
    #[arg(short = 'l', long = "loop")]
    loopback: bool,
    /// Clock phase
    #[arg(short = 'H', long)]
    cpha: bool,
    /// Clock polarity
    #[arg(short = 'O', long)]
    cpol: bool,
    /// Least significant bit first
    #[arg(short = 'L', long)]
    lsb: bool,
    /// Chip select active high
    #[arg(short = 'C', long = "cs-high")]
    cs_high: bool,
    /// SI/SO signals shared (3-wire)
    #[arg(short = '3', long = "3wire")]
    three_wire: bool,
    /// Disable chip select
    #[arg(short = 'N', long = "no-cs")]
    no_cs: bool,
    /// Lower the submit progress gate from INPROGRESS to SEEN
    #[arg(short = 'F', long)]
    ff: bool,
    /// Increase verbosity (repeatable)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// `poll`, `listen`, `listenraw`, `cm11`, or a textual X10 command
    /// (e.g. `A1:on`)
    command: String,
}

impl Cli {
    fn spi_config(&self) -> Config {
        Config {
            cpha: self.cpha,
            cpol: self.cpol,
            lsb_first: self.lsb,
            cs_high: self.cs_high,
            three_wire: self.three_wire,
            no_cs: self.no_cs,
            loopback: self.loopback,
            bits_per_word: self.bpw,
            max_speed_hz: self.speed,
            delay_usecs: self.delay,
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut link =
        SpidevLink::open(&cli.device, cli.spi_config()).context("opening SPI device")?;

    match cli.command.as_str() {
        "poll" => cmd_poll(&mut link),
        "listen" => cmd_listen(&mut link, false),
        "listenraw" => cmd_listen(&mut link, true),
        "cm11" => cmd_cm11(&mut link),
        text => cmd_transmit(&mut link, text, cli.ff),
    }
}

fn cmd_poll(link: &mut SpidevLink) -> Result<()> {
    let reply = transport::poll(link).context("poll failed")?;
    info!(
        "poll succeeded: rr_code={} rr_id={} rx_tail={}",
        reply.rr_code,
        reply.rr_id,
        reply.bitstream.tail()
    );
    trace!("{:?}", reply.bitstream);
    Ok(())
}

/// Tracks the coprocessor's receive-ring write cursor across polls and
/// yields only the bits sampled since the previous poll. The very first
/// poll walks the whole 192-bit ring once, mirroring `spi_x10_poll`'s
/// bootstrap in the original source, where `rx_tail` starts one bit past
/// the current tail and the read loop runs all the way around back to it.
struct RingCursor {
    position: Option<u16>,
}

impl RingCursor {
    fn new() -> Self {
        Self { position: None }
    }

    fn drain(&mut self, bs: &Bitstream) -> Vec<bool> {
        let new_tail = bs.tail();
        let mut position = self.position.unwrap_or((new_tail + 1) % CAPACITY_BITS);
        let mut bits = Vec::new();
        while position != new_tail {
            bits.push(bs.bit(position));
            position = (position + 1) % CAPACITY_BITS;
        }
        self.position = Some(new_tail);
        bits
    }
}

/// Prints raw sampled bits to stdout, wrapping every 48 characters, the
/// same layout `x10_print_bit` used.
struct RawBitPrinter {
    column: u8,
}

impl RawBitPrinter {
    fn new() -> Self {
        Self { column: 0 }
    }

    fn print(&mut self, bit: bool) {
        print!("{}", bit as u8);
        self.column += 1;
        if self.column == 48 {
            println!();
            self.column = 0;
        }
    }
}

fn cmd_listen(link: &mut SpidevLink, raw: bool) -> Result<()> {
    let mut cursor = RingCursor::new();
    let mut decoder = Decoder::new();
    let mut printer = RawBitPrinter::new();
    loop {
        let reply = transport::poll(link).context("poll failed while listening")?;
        trace!("{:?}", reply.bitstream);
        for bit in cursor.drain(&reply.bitstream) {
            if raw {
                printer.print(bit);
            } else if let Some(record) = decoder.feed(bit) {
                log_command(&record);
            }
        }
        link.sleep_ms(100);
    }
}

fn log_command(cmd: &CommandRecord) {
    info!(
        "received: {} (addr_rpt={} func_rpt={})",
        command::format(cmd),
        cmd.addr_rpt,
        cmd.func_rpt
    );
}

/// Submits `cmd` the way the CM11 emulator's `cm11_execute` does: a
/// multi-step Dim/Bright sends `func_rpt - 1` sticky single steps gated at
/// INPROGRESS, then one final non-sticky step gated at COMPLETE; anything
/// else is a single COMPLETE-gated submit.
fn execute_transmit(link: &mut SpidevLink, mut cmd: CommandRecord) -> Result<()> {
    if cmd.func_rpt > 2 {
        let repetitions = cmd.func_rpt;
        cmd.func_rpt = 1;
        cmd.sticky = true;
        for _ in 1..repetitions {
            let mut bs = Bitstream::new();
            encode_command(&mut bs, &cmd)
                .map_err(|e| anyhow!("encoding a dim/bright step: {:?}", e))?;
            transport::reliable_submit(link, RrCode::Transmit, bs, RrResponse::InProgress)
                .context("submitting a dim/bright step")?;
        }
    }
    cmd.sticky = false;
    let mut bs = Bitstream::new();
    encode_command(&mut bs, &cmd)
        .map_err(|e| anyhow!("encoding the final transmit step: {:?}", e))?;
    transport::reliable_submit(link, RrCode::Transmit, bs, RrResponse::Complete)
        .context("submitting the final transmit step")?;
    Ok(())
}

fn cmd_cm11(link: &mut SpidevLink) -> Result<()> {
    let stdin = StdinReader::spawn();
    let mut stdout = StdoutWriter::new();
    let mut emulator = Cm11Emulator::new();
    let mut decoder = Decoder::new();
    let mut cursor = RingCursor::new();

    loop {
        let tick_start = Instant::now();

        if let Some(byte) = stdin.read_timeout(Duration::from_millis(200)) {
            debug!("cm11 rx byte: {:#04x}", byte);
            let step = emulator.feed(byte);
            stdout.write(step.output.as_slice())?;
            if let Some(cmd) = step.transmit {
                execute_transmit(link, cmd)?;
            }
        }

        let reply = transport::poll(link).context("poll failed during cm11 emulation")?;
        for bit in cursor.drain(&reply.bitstream) {
            if let Some(record) = decoder.feed(bit) {
                debug!("cm11 received off the powerline: {}", command::format(&record));
                emulator.upload_record(&record);
            }
        }

        let elapsed_ms = tick_start.elapsed().as_millis().min(u32::MAX as u128) as u32;
        let step = emulator.tick(elapsed_ms);
        stdout.write(step.output.as_slice())?;
        if let Some(cmd) = step.transmit {
            execute_transmit(link, cmd)?;
        }
    }
}

fn cmd_transmit(link: &mut SpidevLink, text: &str, ff: bool) -> Result<()> {
    let cmd = command::parse(text)
        .map_err(|e| anyhow!("parsing command {:?}: {}", text, e))?;
    if !cmd.is_transmittable() {
        warn!("command {:?} parsed but is not transmittable (missing house code, or an unaddressed function)", text);
    }
    let mut bs = Bitstream::new();
    encode_command(&mut bs, &cmd).map_err(|e| anyhow!("encoding command: {:?}", e))?;

    let target = if ff {
        RrResponse::Seen
    } else {
        RrResponse::InProgress
    };
    let reply = transport::reliable_submit(link, RrCode::Transmit, bs, target)
        .context("submitting transmit request")?;
    info!(
        "transmit succeeded: rr_code={} rr_id={}",
        reply.rr_code, reply.rr_id
    );
    Ok(())
}
