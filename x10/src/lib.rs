#![no_std]
//! Core protocol crate for a host-to-coprocessor X10 powerline-carrier
//! bridge: the wire codec, the command model, the 38-byte SPI frame and
//! its CRC, a software model of the coprocessor's request/response state
//! machine, the host-side reliable submit/poll transport, and a CM11A
//! serial emulator.
//!
//! `transport` needs retry delays and sleeping, so it (and anything else
//! that only makes sense with an allocator and an OS underneath it) is
//! gated behind the `std` feature, on by default. The codec, command
//! model, frame, and coprocessor model are plain `no_std` and have no
//! feature requirements.

#[cfg(feature = "std")]
extern crate std;

pub mod bitstream;
pub mod cm11;
pub mod codec;
pub mod command;
pub mod coproc;
pub mod frame;

#[cfg(feature = "std")]
pub mod transport;
