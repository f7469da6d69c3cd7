use std::fs::File;
use std::io::{BufReader, BufWriter, Write};

use anyhow::{Context, Result};
use clap::Parser;

use opts::{Delta, Materialize, Opts, Signature, SubCommand};
use rsyncdelta::{commands::CommandList, signature::SignatureTable, streams::Stream};

mod opts;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    match opts.subcmd {
        SubCommand::Signature(args) => run_signature(args),
        SubCommand::Delta(args) => run_delta(args),
        SubCommand::Materialize(args) => run_materialize(args),
    }
}

fn run_signature(args: Signature) -> Result<()> {
    tracing::info!(file = %args.file.display(), "building signature table");
    let table = rsyncdelta::build_signature(&args.file)
        .with_context(|| format!("failed to build signature for {}", args.file.display()))?;

    let out = File::create(&args.signature_file)
        .with_context(|| format!("failed to create {}", args.signature_file.display()))?;
    bincode::serialize_into(BufWriter::new(out), &table)
        .with_context(|| format!("failed to write {}", args.signature_file.display()))?;

    tracing::info!(
        entries = table.entries().len(),
        block_size = table.block_size(),
        "signature table written"
    );
    Ok(())
}

fn run_delta(args: Delta) -> Result<()> {
    let sig_reader = File::open(&args.signature_file)
        .with_context(|| format!("failed to open {}", args.signature_file.display()))?;
    let old_table: SignatureTable = bincode::deserialize_from(BufReader::new(sig_reader))
        .with_context(|| format!("failed to parse {}", args.signature_file.display()))?;

    tracing::info!(file = %args.new_file.display(), "comparing against old signature");
    let (commands, new_table, _digest) = rsyncdelta::compare(&args.new_file, &old_table)
        .with_context(|| format!("failed to compare {}", args.new_file.display()))?;

    let out = File::create(&args.delta_file)
        .with_context(|| format!("failed to create {}", args.delta_file.display()))?;
    bincode::serialize_into(BufWriter::new(out), &commands)
        .with_context(|| format!("failed to write {}", args.delta_file.display()))?;

    tracing::info!(
        commands = commands.len(),
        new_entries = new_table.entries().len(),
        "delta written"
    );
    Ok(())
}

fn run_materialize(args: Materialize) -> Result<()> {
    let spec = std::fs::read_to_string(&args.chain_spec)
        .with_context(|| format!("failed to read {}", args.chain_spec.display()))?;

    let mut stream = Stream::normal(&args.base_file, 0)
        .with_context(|| format!("failed to open {}", args.base_file.display()))?;

    let mut unique_id = 1u64;
    for line in spec.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let delta_file = fields
            .next()
            .with_context(|| format!("malformed chain spec line: {line:?}"))?;
        let version_file = fields
            .next()
            .with_context(|| format!("malformed chain spec line: {line:?}"))?;

        let delta_reader = File::open(delta_file)
            .with_context(|| format!("failed to open {delta_file}"))?;
        let commands: CommandList = bincode::deserialize_from(BufReader::new(delta_reader))
            .with_context(|| format!("failed to parse {delta_file}"))?;

        let new_stream = Stream::normal(version_file, unique_id)
            .with_context(|| format!("failed to open {version_file}"))?;
        stream = Stream::chain_link(stream, new_stream, &commands);
        unique_id += 1;
    }

    let mut out = BufWriter::new(
        File::create(&args.out_file)
            .with_context(|| format!("failed to create {}", args.out_file.display()))?,
    );
    stream.seek(0).context("failed to seek materialized stream to its start")?;

    let mut buf = [0u8; 1 << 16];
    loop {
        let n = stream
            .read(&mut buf)
            .context("failed to read from materialized stream")?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])
            .context("failed to write materialized output")?;
    }
    out.flush().context("failed to flush materialized output")?;

    tracing::info!(out = %args.out_file.display(), "materialized final version");
    Ok(())
}
