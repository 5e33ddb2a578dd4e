//! A library for running linear I-V sweeps on SCPI SourceMeters and
//! estimating the resistance of the swept sample.
//!
//! A [`Session`](session::Session) talks to an instrument over TCP or a
//! serial port. The [`sweep`] module configures, triggers and reads back
//! sweeps over a session, and the [`resistance`] module fits the results.
//!
//! ```rust
//! # use sourcemeter::{resistance, session::Session, sweep::{self, SweepParameters}};
//! # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = Session::open("TCPIP0::192.168.1.20::INSTR")?;
//! let params = SweepParameters::voltage(-0.003, 0.003, 101);
//! let result = sweep::run(&mut session, &params)?;
//! let estimate = resistance::estimate(
//!     result.forward(),
//!     params.source_function(),
//!     &resistance::SanityGates::default(),
//! )?;
//! println!("{estimate}");
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(missing_debug_implementations)]

pub mod error;

pub mod backend;
pub mod block;
pub mod poll;
pub mod resistance;
pub mod session;
pub mod status;
pub mod sweep;
pub mod timeout_guard;
