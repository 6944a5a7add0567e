use std::fs;
use std::path::PathBuf;

use clap::Parser;

use crate::classify::Classifiers;
use crate::error::{Error, Result};

/// Web server with stats about block producer performance.
#[derive(Debug, Parser)]
#[command(name = "bp-observatory")]
pub struct Args {
    /// Chain node RPC root.
    #[arg(long, default_value = "http://localhost:8888")]
    pub node_endpoint: String,

    /// Snapshot database directory.
    #[arg(long, default_value = "bp-perf-db")]
    pub database_path: PathBuf,

    /// First block to ingest. Only consulted when the database is empty.
    #[arg(long, default_value_t = 1)]
    pub starting_block: u64,

    /// Read-API bind address.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Read-API port.
    #[arg(long, default_value_t = 8953)]
    pub port: u16,

    /// TLS cert location, for the fronting TLS terminator.
    #[arg(long)]
    pub certificate: Option<PathBuf>,

    /// TLS private key location, for the fronting TLS terminator.
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Serve queries only; don't tail the chain.
    #[arg(long = "no-sync", action = clap::ArgAction::SetFalse)]
    pub sync: bool,

    /// JSON file of display-category classifier rules.
    #[arg(long)]
    pub classifiers: Option<PathBuf>,
}

impl Args {
    /// The classifier table handed to the ingest engine. No file means the
    /// empty table: every action keeps its raw signature.
    pub fn load_classifiers(&self) -> Result<Classifiers> {
        let Some(path) = &self.classifiers else {
            return Ok(Classifiers::default());
        };
        let raw = fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))
    }
}
