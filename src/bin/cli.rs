//! mmapkv CLI
//!
//! Inspect and maintain a store directory from the command line.

use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use mmapkv::{Config, KvError, Mode, Store, SyncMode, Value};
use tracing_subscriber::{fmt, EnvFilter};

/// mmapkv CLI
#[derive(Parser, Debug)]
#[command(name = "mmapkv-cli")]
#[command(about = "Inspect and maintain mmapkv stores")]
#[command(version)]
struct Args {
    /// Root directory holding the store files
    #[arg(short, long, default_value = "./mmapkv_data")]
    dir: String,

    /// Store id
    #[arg(short, long, default_value = "default")]
    id: String,

    /// Coordinate with other processes through the lock file
    #[arg(long)]
    multi_process: bool,

    /// Crypt key for encrypted stores
    #[arg(long)]
    crypt_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a value
    Get {
        key: String,
    },

    /// Store a value
    Set {
        key: String,

        value: String,

        /// How to interpret the value
        #[arg(short, long, value_enum, default_value = "string")]
        kind: KindArg,
    },

    /// Remove a key
    Remove {
        key: String,
    },

    /// List all keys
    Keys,

    /// Print the number of entries
    Count,

    /// Print sizes and crypt state
    Info,

    /// Check the files' crc without opening the store
    Verify,

    /// Rewrite the log without dead records
    Compact,

    /// Compact and release unused capacity
    Trim,

    /// Remove every entry
    Clear,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Bool,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    String,
}

fn parse_value(raw: &str, kind: KindArg) -> Result<Value, String> {
    let bad = |e: &dyn std::fmt::Display| format!("cannot parse {:?} as {:?}: {}", raw, kind, e);
    Ok(match kind {
        KindArg::Bool => Value::Bool(raw.parse().map_err(|e| bad(&e))?),
        KindArg::I32 => Value::Int32(raw.parse().map_err(|e| bad(&e))?),
        KindArg::U32 => Value::UInt32(raw.parse().map_err(|e| bad(&e))?),
        KindArg::I64 => Value::Int64(raw.parse().map_err(|e| bad(&e))?),
        KindArg::U64 => Value::UInt64(raw.parse().map_err(|e| bad(&e))?),
        KindArg::F32 => Value::Float(raw.parse().map_err(|e| bad(&e))?),
        KindArg::F64 => Value::Double(raw.parse().map_err(|e| bad(&e))?),
        KindArg::String => Value::String(raw.to_string()),
    })
}

fn run(args: Args) -> Result<(), String> {
    let config = Config::builder()
        .root_dir(&args.dir)
        .build()
        .map_err(|e| e.to_string())?;

    if let Commands::Verify = args.command {
        let valid = Store::is_file_valid(&config, &args.id).map_err(|e| e.to_string())?;
        println!("{}", if valid { "valid" } else { "corrupt" });
        return if valid { Ok(()) } else { Err("crc check failed".to_string()) };
    }

    let value = match &args.command {
        Commands::Set { value, kind, .. } => Some(parse_value(value, *kind)?),
        _ => None,
    };

    let mode = if args.multi_process {
        Mode::MultiProcess
    } else {
        Mode::SingleProcess
    };
    let key = args.crypt_key.as_deref().map(str::as_bytes);
    let store = Store::open(config, &args.id, mode, key).map_err(|e| e.to_string())?;

    execute(&store, &args.command, value).map_err(|e| e.to_string())?;
    store.close().map_err(|e| e.to_string())
}

fn execute(store: &Store, command: &Commands, value: Option<Value>) -> Result<(), KvError> {
    match command {
        Commands::Get { key } => match store.get(key) {
            Ok(value) => println!("{} ({:?})", value, value.kind()),
            Err(KvError::NotFound) => println!("(not found)"),
            Err(e) => return Err(e),
        },
        Commands::Set { key, .. } => {
            if let Some(value) = value {
                store.set(key, value)?;
                store.sync(SyncMode::Sync)?;
            }
            println!("OK");
        }
        Commands::Remove { key } => {
            store.remove(key)?;
            store.sync(SyncMode::Sync)?;
            println!("OK");
        }
        Commands::Keys => {
            for key in store.all_keys()? {
                println!("{}", key);
            }
        }
        Commands::Count => println!("{}", store.count()?),
        Commands::Info => {
            println!("id:          {}", store.id());
            println!("path:        {}", store.paths().data().display());
            println!("entries:     {}", store.count()?);
            println!("actual size: {}", store.actual_size()?);
            println!("total size:  {}", store.total_size()?);
            println!("encrypted:   {}", store.crypt_key()?.is_some());
        }
        Commands::Compact => {
            let outcome = store.compact()?;
            println!("{} -> {} bytes", outcome.before, outcome.after);
        }
        Commands::Trim => {
            let outcome = store.trim()?;
            println!("file is now {} bytes", outcome.file_len);
        }
        Commands::Clear => {
            store.clear_all()?;
            println!("OK");
        }
        Commands::Verify => {}
    }
    Ok(())
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,mmapkv=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::debug!("mmapkv-cli v{}", mmapkv::VERSION);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
