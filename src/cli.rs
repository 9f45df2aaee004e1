//! Command line of the `walk-bench` binary.
use std::path::PathBuf;

use clap::Parser;

/// Count everything below a directory, ten times, and time it.
#[derive(Parser, Debug)]
#[command(version, about, long_about = LONG_ABOUT)]
pub struct Cli {
    /// The directory to walk.
    pub path: PathBuf,

    /// How many timed walks to run.
    #[arg(short = 'n', long, default_value_t = 10)]
    pub repeat: usize,

    /// Print the system calls of the last walk to stderr.
    #[arg(long)]
    pub stats: bool,

    /// Log every skipped entry to stderr.
    #[arg(short, long)]
    pub debug: bool,
}

const LONG_ABOUT: &str = "\
Reads the path given as the first argument, recursively searches the names of all files and \
directories under that directory, and prints the number of items found.

This is done ten times by default, after one untimed warmup walk. The average, minimum and \
maximum duration of the timed walks is printed at the end.";
