// SPDX-License-Identifier: Apache-2.0 OR MIT
// uberlogger: the log writer process
//
// Spawned by the uberlog library with five positional arguments; not meant
// to be launched by hand.

use clap::Parser;
use std::path::PathBuf;
use uberlog::writer::{Writer, WriterConfig};

#[derive(Parser, Debug)]
#[command(name = "uberlogger")]
struct Args {
    /// PID of the producer process that spawned us
    parent_pid: u32,
    /// Ring size in bytes (power of two)
    ring_size: usize,
    /// Absolute path of the log file
    logfile: PathBuf,
    /// Roll the file when it would grow past this many bytes
    max_file_size: u64,
    /// Number of rolled archives to keep
    max_archives: usize,
}

const USAGE: &str = "uberlogger is a child process spawned by an application \
that logs through the uberlog library. Normally you do not launch uberlogger \
manually; the library starts it automatically and hands it the shared ring to \
drain. Usage: uberlogger <parent-pid> <ring-size> <log-file> <max-file-size> \
<max-archives>";

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(_) => {
            println!("{USAGE}");
            std::process::exit(1);
        }
    };

    Writer::new(WriterConfig {
        parent_pid: args.parent_pid,
        ring_size: args.ring_size,
        filename: args.logfile,
        max_file_size: args.max_file_size,
        max_archives: args.max_archives,
        debug_messages: false,
    })
    .run();
}
