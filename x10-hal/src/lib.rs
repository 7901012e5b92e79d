//! Hardware glue for the `x10` bridge: a Linux `spidev` implementation of
//! [`x10::transport::SpiLink`] for the coprocessor link, and a blocking
//! stdin/stdout pair with a read timeout for driving [`x10::cm11::Cm11Emulator`].
//!
//! Everything in the core protocol crate stays hardware-free and `no_std`;
//! this crate is where an actual `/dev/spidevX.Y` character device and the
//! process's standard streams enter the picture.

pub mod cm11io;
pub mod spi;
