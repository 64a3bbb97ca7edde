//! QuillKV inspection tool
//!
//! Dumps and verifies SSTable and WAL files, and runs one-off operations
//! against a data directory.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use quillkv::storage::SSTable;
use quillkv::wal::{self, WalReader};
use quillkv::{Config, Engine, KvStore, Lookup, Value};
use tracing_subscriber::{fmt, EnvFilter};

/// QuillKV inspector
#[derive(Parser, Debug)]
#[command(name = "quillkv-inspect")]
#[command(about = "Inspect QuillKV data files")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print an SSTable's metadata and block index
    Sstable {
        path: PathBuf,

        /// Also print every record
        #[arg(long)]
        dump: bool,

        /// Check every block checksum
        #[arg(long)]
        verify: bool,
    },

    /// Print the commands stored in a WAL file
    Wal {
        path: PathBuf,

        /// Only count frames and report corruption
        #[arg(long)]
        verify: bool,
    },

    /// Read a key from a data directory
    Get {
        #[arg(short, long, default_value = "./quillkv_data")]
        data_dir: PathBuf,

        key: String,
    },

    /// Write a string value into a data directory
    Set {
        #[arg(short, long, default_value = "./quillkv_data")]
        data_dir: PathBuf,

        key: String,

        value: String,

        /// Time to live in seconds (0 = none)
        #[arg(long, default_value = "0")]
        ttl: u64,
    },

    /// Delete a key from a data directory
    Del {
        #[arg(short, long, default_value = "./quillkv_data")]
        data_dir: PathBuf,

        key: String,
    },

    /// Flush, run one compaction pass and print engine stats
    Compact {
        #[arg(short, long, default_value = "./quillkv_data")]
        data_dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,quillkv=info"));
    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();
    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn open_engine(data_dir: PathBuf) -> quillkv::Result<Engine> {
    Engine::open(Config::builder().data_dir(data_dir).build())
}

fn run(command: Commands) -> quillkv::Result<()> {
    match command {
        Commands::Sstable { path, dump, verify } => {
            let table = SSTable::open(&path, None)?;
            let meta = table.metadata();
            println!("table       {} (level {})", meta.table_id, meta.level);
            println!("records     {}", meta.record_count);
            println!("blocks      {}", meta.block_count);
            println!("compression {}", meta.compression);
            println!("created_at  {}", meta.created_at);
            println!(
                "sections    data={} index={} bloom={}",
                meta.data_size, meta.index_size, meta.bloom_size
            );
            for (i, entry) in table.index().iter().enumerate() {
                println!(
                    "  block {:>4} @{:<10} {:>6}B {:>5} recs [{} .. {}]",
                    i, entry.offset, entry.size, entry.count, entry.first_key, entry.last_key
                );
            }
            if verify {
                table.verify()?;
                println!("checksums OK");
            }
            if dump {
                for kv in table.iter() {
                    let kv = kv?;
                    println!(
                        "{}\t{:?}\t{}\texpiry={}",
                        kv.key,
                        kv.record.state(),
                        kv.record.value(),
                        kv.record.expiry()
                    );
                }
            }
        }
        Commands::Wal { path, verify } => {
            if verify {
                let frames = wal::verify(&path)?;
                println!("{} frames OK", frames);
            } else {
                for command in WalReader::open(&path)? {
                    let command = command?;
                    println!(
                        "{:?}\t{}\t{}\texpiry={}",
                        command.op(),
                        command.key,
                        command.value,
                        command.expiry
                    );
                }
            }
        }
        Commands::Get { data_dir, key } => {
            let engine = open_engine(data_dir)?;
            match engine.get(&key)? {
                Lookup::Found(value) => println!("{}", value),
                other => println!("({:?})", other.status()),
            }
            engine.close()?;
        }
        Commands::Set {
            data_dir,
            key,
            value,
            ttl,
        } => {
            let engine = open_engine(data_dir)?;
            let code = engine.set(&key, Value::from(value), ttl)?;
            println!("{:?}", code);
            engine.close()?;
        }
        Commands::Del { data_dir, key } => {
            let engine = open_engine(data_dir)?;
            let code = engine.delete(&key)?;
            println!("{:?}", code);
            engine.close()?;
        }
        Commands::Compact { data_dir } => {
            let engine = open_engine(data_dir)?;
            engine.flush()?;
            for outcome in engine.compact_now()? {
                println!(
                    "L{} -> L{}: {} tables in, {} records written, {} dropped",
                    outcome.level,
                    outcome.level + 1,
                    outcome.inputs,
                    outcome.records_written,
                    outcome.records_dropped
                );
            }
            println!("{:#?}", engine.stats());
            engine.close()?;
        }
    }
    Ok(())
}
