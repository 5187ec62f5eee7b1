// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Cross-process logging with crash resilience.
//!
//! A [`Logger`] hands each record to a separate writer process
//! (`uberlogger`) through a shared-memory ring. The producing side does
//! little more than a format and two memcpys; the writer owns the log file,
//! batches writes, rotates archives, and keeps draining even if the producer
//! crashes, so every record that was committed to the ring reaches disk.

pub mod level;
pub mod logfile;
pub mod logger;
#[macro_use]
mod macros;
pub mod message;
pub mod platform;
pub mod ring;
pub mod timekeeper;
pub mod writer;

pub use level::Level;
pub use logger::{Error, Logger};
pub use writer::{Writer, WriterConfig};
