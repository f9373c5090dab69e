use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ckp_core::{EntryType, Importance, OutputFormat, Source};

#[derive(Parser)]
#[command(name = "ckp", version)]
#[command(about = "Context Keeper: session memory that survives context resets")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Data directory for session buffers and the database
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Settings file (defaults to settings.json in the config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Append records to a session buffer
    Append {
        #[arg(short, long)]
        session: String,

        /// Record type (required unless --stdin)
        #[arg(short = 't', long = "type", value_enum, required_unless_present = "stdin")]
        entry_type: Option<EntryType>,

        /// Record content (required unless --stdin)
        #[arg(required_unless_present = "stdin", conflicts_with = "stdin")]
        content: Option<String>,

        #[arg(short, long, value_enum, default_value = "medium")]
        importance: Importance,

        #[arg(long, value_enum)]
        source: Option<Source>,

        #[arg(long)]
        category: Option<String>,

        /// Keyword for enhanced records (repeatable)
        #[arg(long = "keyword")]
        keywords: Vec<String>,

        #[arg(long)]
        applies_when: Option<String>,

        #[arg(long)]
        source_file: Option<String>,

        /// Opaque JSON payload stored with the record
        #[arg(long)]
        metadata: Option<String>,

        /// Read JSON records, one per line, from stdin
        #[arg(long, conflicts_with_all = ["entry_type", "metadata"])]
        stdin: bool,

        /// Never flush, even if the buffer is due
        #[arg(long)]
        no_flush: bool,
    },

    /// Print buffered (not yet flushed) records
    Read {
        #[arg(short, long)]
        session: String,
    },

    /// Count buffered records
    Count {
        #[arg(short, long)]
        session: String,
    },

    /// Show buffer, flush and store state for a session
    Status {
        #[arg(short, long)]
        session: String,
    },

    /// Discard a session's buffered records
    Clear {
        #[arg(short, long)]
        session: String,
    },

    /// Move buffered records into the durable store
    Flush {
        #[arg(short, long)]
        session: String,

        /// Start a detached worker and return immediately
        #[arg(long = "async", conflicts_with = "sync")]
        run_async: bool,

        /// Flush in this process (default unless buffer.async_flush is set)
        #[arg(long)]
        sync: bool,
    },

    /// Recover flushes interrupted by a crash
    Recover {
        #[arg(short, long, conflicts_with = "all")]
        session: Option<String>,

        /// Sweep every session (the default)
        #[arg(long)]
        all: bool,
    },

    /// Full-text search over stored records
    Search {
        query: String,

        #[arg(short, long)]
        session: Option<String>,

        #[arg(short = 't', long = "type", value_enum)]
        entry_type: Option<EntryType>,

        #[arg(short, long, value_enum)]
        importance: Option<Importance>,

        /// Match whole terms only (no implicit prefix wildcard)
        #[arg(long)]
        exact: bool,

        /// Maximum hits (defaults to storage.search_limit)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List stored records of a session
    Query {
        #[arg(short, long)]
        session: String,

        #[arg(short = 't', long = "type", value_enum, conflicts_with = "importance")]
        entry_type: Option<EntryType>,

        #[arg(short, long, value_enum)]
        importance: Option<Importance>,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Most recent stored records across all sessions
    Recent {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Assemble the tiered context bundle for a session
    Restore {
        #[arg(short, long)]
        session: String,

        /// Token budget (defaults to restoration.token_budget)
        #[arg(long)]
        budget: Option<usize>,
    },

    /// Per-session totals in the durable store
    Stats,

    /// Delete a session's stored and buffered records
    Forget {
        #[arg(short, long)]
        session: String,
    },

    /// Show/manage settings
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },

    /// Background flush entry point used by `flush --async`
    #[command(hide = true)]
    FlushWorker { session: String },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective settings
    Show,
    /// Print one value by dotted key (e.g. restoration.token_budget)
    Get { key: String },
    /// Set one value by dotted key and save
    Set { key: String, value: String },
    /// Print the settings file location
    Path,
}
