//! CLI argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// tabload: background bulk product imports.
#[derive(Parser, Debug)]
#[command(name = "tabload", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP server (default).
    Serve {
        /// Listen port, overriding PORT.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Import one file in-process and print the final job report as JSON.
    Import {
        /// CSV, XLSX, XLS or ODS file.
        file: PathBuf,

        /// Rows per store call, overriding BULK_BATCH_SIZE.
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

impl Cli {
    pub fn command(self) -> Command {
        self.command.unwrap_or(Command::Serve { port: None })
    }
}
