// SPDX-License-Identifier: Apache-2.0 OR MIT
// Demonstrates the crash-resilience guarantee: every record committed before
// the producer dies still reaches the log file, because the writer process
// holds its own mapping of the ring and drains it when the parent vanishes.
//
//     uberlog-crashdemo /tmp/crash.log --count 1001
//
// The process aborts without closing the logger; watch the file fill in
// anyway. Also used as the fixture for the crash-safety integration test.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use uberlog::Logger;

#[derive(Parser, Debug)]
#[command(name = "uberlog-crashdemo")]
struct Args {
    /// Log file to write
    log_path: PathBuf,

    /// Number of records to commit before aborting
    #[arg(long, default_value_t = 1001)]
    count: usize,

    /// Writer executable override (defaults to a sibling `uberlogger`)
    #[arg(long)]
    writer: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let logger = Logger::new();
    if let Some(writer) = args.writer {
        logger.set_writer_path(writer);
    }
    logger
        .open(&args.log_path)
        .with_context(|| format!("open log {}", args.log_path.display()))?;

    for i in 0..args.count {
        let record = format!("crash-demo frame {i:06}\n");
        logger.log_raw(record.as_bytes());
    }

    // Die without closing. The committed frames must survive us.
    std::process::abort();
}
