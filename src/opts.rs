use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Compute and apply rsync-style signatures and deltas, and materialize a
/// version chain.
#[derive(Parser)]
#[command(name = "rsyncdelta", version, author)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Subcommand)]
pub enum SubCommand {
    /// Build a signature table for a file.
    Signature(Signature),
    /// Compare a new file against a signature table, producing a delta.
    Delta(Delta),
    /// Materialize a version chain by replaying a sequence of deltas.
    Materialize(Materialize),
}

#[derive(Parser)]
pub struct Signature {
    /// File to build a signature table for.
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
    /// Where to write the serialized signature table.
    #[arg(value_name = "SIG_FILE")]
    pub signature_file: PathBuf,
}

#[derive(Parser)]
pub struct Delta {
    /// Serialized signature table of the old file.
    #[arg(value_name = "SIG_FILE")]
    pub signature_file: PathBuf,
    /// The new file to compare against the signature.
    #[arg(value_name = "NEW_FILE")]
    pub new_file: PathBuf,
    /// Where to write the serialized command list.
    #[arg(value_name = "DELTA_FILE")]
    pub delta_file: PathBuf,
}

#[derive(Parser)]
pub struct Materialize {
    /// Version 0's whole physical file.
    #[arg(value_name = "BASE_FILE")]
    pub base_file: PathBuf,
    /// A text file listing one `<delta_file> <version_file>` pair per
    /// line, oldest first, chaining `base_file` up through the final
    /// version.
    #[arg(value_name = "CHAIN_SPEC")]
    pub chain_spec: PathBuf,
    /// Where to write the fully materialized final version.
    #[arg(value_name = "OUT_FILE")]
    pub out_file: PathBuf,
}
