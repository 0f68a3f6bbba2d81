use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::process::ExitCode;
use std::sync::Arc;

use heapdb::storage::encoder::encode_text;
use heapdb::{BufferPool, Config, FieldType, HeapFile, Schema, TransactionId};
use tracing::error;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage:
  heapdb convert <input.txt> <output.dat> <types>
  heapdb print <file.dat> <types>

<types> is a comma-separated list of int|string";

fn parse_types(list: &str) -> Result<Schema, String> {
    let types = list
        .split(',')
        .map(|name| match name.trim().to_ascii_lowercase().as_str() {
            "int" => Ok(FieldType::Int),
            "string" => Ok(FieldType::Str),
            other => Err(format!("unknown type '{}'", other)),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Schema::from_types(&types))
}

fn convert(input: &str, output: &str, schema: &Schema, config: &Config) -> heapdb::Result<()> {
    let reader = BufReader::new(File::open(input)?);
    let writer = BufWriter::new(File::create(output)?);
    let count = encode_text(reader, schema, config.page_size, writer)?;
    println!("wrote {} tuples to {}", count, output);
    Ok(())
}

fn print(path: &str, schema: Schema, config: &Config) -> heapdb::Result<()> {
    let pool = Arc::new(BufferPool::new(config));
    let file = HeapFile::open_existing(path, schema, pool.clone(), config)?;
    let tid = TransactionId::new();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut iter = file.iterator(tid);
    iter.open()?;
    for tuple in iter {
        writeln!(out, "{}", tuple?)?;
    }
    pool.transaction_complete(tid, true)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = Config::from_env();

    let (types, result) = match args.as_slice() {
        [cmd, input, output, types] if cmd == "convert" => {
            (types, parse_types(types).map(|s| convert(input, output, &s, &config)))
        }
        [cmd, path, types] if cmd == "print" => {
            (types, parse_types(types).map(|s| print(path, s, &config)))
        }
        _ => {
            eprintln!("{}", USAGE);
            return ExitCode::from(2);
        }
    };

    match result {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            error!(error = %e, "command failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
        Err(msg) => {
            eprintln!("invalid types '{}': {}\n\n{}", types, msg, USAGE);
            ExitCode::from(2)
        }
    }
}
