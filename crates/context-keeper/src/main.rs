use anyhow::Result;
use ckp_config::{KeeperPaths, Settings};
use ckp_core::EnhancedFields;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod buffer_cmds;
mod cli;
mod config_cmds;
mod context;
mod output;
mod store_cmds;

use buffer_cmds::AppendArgs;
use cli::{Cli, Commands, ConfigCommands};
use context::AppContext;
use store_cmds::SearchArgs;

/// `RUST_LOG` if set, else `logging.level` from settings.
pub(crate) fn env_filter(settings: &Settings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.logging.level))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = KeeperPaths::resolve(cli.root.as_deref(), cli.config.as_deref());
    let ctx = AppContext::load(paths, cli.format)?;

    // The flush worker logs to a file of its own instead.
    if !matches!(cli.command, Commands::FlushWorker { .. }) {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter(&ctx.settings))
            .try_init()
            .ok();
    }

    match cli.command {
        Commands::Append {
            session,
            entry_type,
            content,
            importance,
            source,
            category,
            keywords,
            applies_when,
            source_file,
            metadata,
            stdin,
            no_flush,
        } => {
            let args = AppendArgs {
                entry_type,
                content,
                importance,
                source,
                enhanced: EnhancedFields {
                    category,
                    keywords,
                    applies_when,
                    source_file,
                },
                metadata,
            };
            buffer_cmds::handle_append(&ctx, &session, args, stdin, no_flush)?;
        }
        Commands::Read { session } => buffer_cmds::handle_read(&ctx, &session)?,
        Commands::Count { session } => buffer_cmds::handle_count(&ctx, &session)?,
        Commands::Status { session } => buffer_cmds::handle_status(&ctx, &session)?,
        Commands::Clear { session } => buffer_cmds::handle_clear(&ctx, &session)?,
        Commands::Flush {
            session,
            run_async,
            sync,
        } => {
            let exit_code = buffer_cmds::handle_flush(&ctx, &session, run_async, sync)?;
            std::process::exit(exit_code);
        }
        Commands::Recover { session, all: _ } => {
            buffer_cmds::handle_recover(&ctx, session.as_deref())?;
        }
        Commands::Search {
            query,
            session,
            entry_type,
            importance,
            exact,
            limit,
        } => store_cmds::handle_search(
            &ctx,
            SearchArgs {
                query,
                session,
                entry_type,
                importance,
                exact,
                limit,
            },
        )?,
        Commands::Query {
            session,
            entry_type,
            importance,
            limit,
        } => store_cmds::handle_query(&ctx, &session, entry_type, importance, limit)?,
        Commands::Recent { limit } => store_cmds::handle_recent(&ctx, limit)?,
        Commands::Restore { session, budget } => {
            store_cmds::handle_restore(&ctx, &session, budget)?;
        }
        Commands::Stats => store_cmds::handle_stats(&ctx)?,
        Commands::Forget { session } => store_cmds::handle_forget(&ctx, &session)?,
        Commands::Config { cmd } => match cmd {
            ConfigCommands::Show => config_cmds::handle_config_show(&ctx)?,
            ConfigCommands::Get { key } => config_cmds::handle_config_get(&ctx, &key)?,
            ConfigCommands::Set { key, value } => {
                config_cmds::handle_config_set(&ctx, &key, &value)?;
            }
            ConfigCommands::Path => config_cmds::handle_config_path(&ctx)?,
        },
        Commands::FlushWorker { session } => {
            let exit_code = buffer_cmds::run_flush_worker(&ctx, &session)?;
            std::process::exit(exit_code);
        }
    }

    Ok(())
}
