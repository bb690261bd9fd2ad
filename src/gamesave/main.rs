use chrono::{DateTime, Utc};
use clap::Parser;
use colored::*;
use directories::ProjectDirs;
use gamesave::config::{GameSaveConfig, CONFIG_KEYS};
use gamesave::container::LoadOutcome;
use gamesave::error::{GameSaveError, Result};
use gamesave::logging::{init_logging, session_span, LogFormat};
use gamesave::manager::SaveManager;
use gamesave::metadata::ContainerMetadata;
use gamesave::model::BoardData;
use gamesave::store::fs::{FsProvider, FsStore};
use std::path::{Path, PathBuf};
use tracing::Instrument;
use unicode_width::UnicodeWidthStr;

mod args;
use args::{Cli, Commands};

const NAME_WIDTH: usize = 22;
const SIZE_WIDTH: usize = 10;
const STATE_WIDTH: usize = 12;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_logging(format, cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".red(), e);
        std::process::exit(1);
    }
}

struct AppContext {
    manager: SaveManager<FsStore>,
    provider: FsProvider,
    user: String,
}

async fn run(cli: Cli) -> Result<()> {
    let root = resolve_root(cli.root)?;
    let config = GameSaveConfig::load(&root)?;

    let command = cli.command.unwrap_or(Commands::Status);
    if let Commands::Config { key, value } = command {
        return handle_config(&root, config, key, value);
    }

    let user = cli.user.unwrap_or_else(|| config.user.clone());
    let span = session_span(&user, command_name(&command));
    async move {
        let ctx = init_context(&root, &config, user).await?;
        let result = match command {
            Commands::Status => handle_status(&ctx).await,
            Commands::List { blobs } => handle_list(&ctx, blobs).await,
            Commands::Show { read } => handle_show(&ctx, read).await,
            Commands::Activate { slot } => handle_activate(&ctx, slot).await,
            Commands::Edit {
                score,
                words,
                tiles,
            } => handle_edit(&ctx, score, words, tiles).await,
            Commands::Delete { blobs_only } => handle_delete(&ctx, blobs_only).await,
            Commands::Config { .. } => Ok(()),
        };
        ctx.manager.suspend().await;
        result
    }
    .instrument(span)
    .await
}

fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Status => "status",
        Commands::List { .. } => "list",
        Commands::Show { .. } => "show",
        Commands::Activate { .. } => "activate",
        Commands::Edit { .. } => "edit",
        Commands::Delete { .. } => "delete",
        Commands::Config { .. } => "config",
    }
}

fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(root) = root {
        return Ok(root);
    }
    ProjectDirs::from("com", "gamesave", "gamesave")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| GameSaveError::Config("could not determine a data directory".into()))
}

async fn init_context(root: &Path, config: &GameSaveConfig, user: String) -> Result<AppContext> {
    let provider = FsProvider::new(root, config.quota_bytes);
    let manager = SaveManager::new(config.manager_options());
    manager.set_sync_on_demand(config.sync_on_demand)?;
    manager.reset();
    manager.initialize_for_user(&provider, &user, true).await?;

    Ok(AppContext {
        manager,
        provider,
        user,
    })
}

async fn handle_status(ctx: &AppContext) -> Result<()> {
    let manager = &ctx.manager;
    println!("{}", format!("User: {}", ctx.user).bold());
    println!(
        "Store: {}",
        ctx.provider.user_root(&ctx.user)?.display()
    );
    if manager.has_active_slot() {
        println!(
            "{}",
            format!(
                "Active slot: {} of {}",
                manager.active_slot(),
                manager.slot_count()
            )
            .green()
        );
    } else {
        println!("{}", "No active slot".yellow());
    }
    println!("Index updates: {}", manager.index_update_count());
    println!("Remaining quota: {} bytes", manager.remaining_quota());
    println!();
    for line in manager.metadata_report(false) {
        println!("  {}", line);
    }
    Ok(())
}

async fn handle_list(ctx: &AppContext, blobs: bool) -> Result<()> {
    let manager = &ctx.manager;
    let refresh = manager.load_all_container_metadata(None, blobs).await?;

    println!(
        "  {}{}{}{}",
        pad_to_width("CONTAINER", NAME_WIDTH),
        pad_to_width("SIZE", SIZE_WIDTH),
        pad_to_width("STATE", STATE_WIDTH),
        "MODIFIED"
    );
    print_container_row(&manager.index().metadata(), false, blobs);
    for n in 1..=manager.slot_count() {
        if let Some(slot) = manager.slot(n) {
            print_container_row(&slot.metadata(), n == manager.active_slot(), blobs);
        }
    }
    for name in &refresh.foreign {
        println!("  {}", format!("{} (not a game save)", name).dimmed());
    }
    Ok(())
}

fn print_container_row(meta: &ContainerMetadata, active: bool, blobs: bool) {
    let marker = if active { "* " } else { "  " };
    let name = pad_to_width(&meta.display_name, NAME_WIDTH);

    if !meta.is_on_remote {
        println!(
            "{}{}{}",
            marker,
            name,
            pad_to_width("-", SIZE_WIDTH).dimmed()
        );
        return;
    }

    let size = pad_to_width(&format!("{} B", meta.total_size), SIZE_WIDTH);
    let state = if meta.needs_sync {
        pad_to_width("needs sync", STATE_WIDTH).yellow()
    } else {
        pad_to_width("synced", STATE_WIDTH).green()
    };
    println!(
        "{}{}{}{}{}",
        marker,
        name,
        size,
        state,
        format_time_ago(meta.last_modified).dimmed()
    );
    if blobs {
        for line in meta.blob_lines() {
            println!("  {}", line.dimmed());
        }
    }
}

async fn handle_show(ctx: &AppContext, read: bool) -> Result<()> {
    let manager = &ctx.manager;
    let outcome = if read {
        manager.read().await?
    } else {
        manager.get().await?
    };

    let slot = manager.active_slot();
    match outcome {
        LoadOutcome::Loaded => print_board(slot, &manager.active_board()?),
        LoadOutcome::NotFound => println!("{}", format!("Slot {} is empty", slot).yellow()),
    }
    Ok(())
}

async fn handle_activate(ctx: &AppContext, slot: u32) -> Result<()> {
    let manager = &ctx.manager;
    let previous = manager.active_slot();

    if let Some(flush) = manager.set_active_slot(slot)? {
        let saved = flush
            .await
            .map_err(|e| GameSaveError::Store(format!("flush task failed: {e}")))?;
        if !saved {
            eprintln!(
                "{}",
                format!("Slot {} could not be saved before switching", previous).yellow()
            );
        }
    }
    manager.save_index(true).await?;
    println!("{}", format!("Active slot: {}", manager.active_slot()).green());
    Ok(())
}

async fn handle_edit(
    ctx: &AppContext,
    score: Option<u32>,
    words: Option<u32>,
    tiles: Option<String>,
) -> Result<()> {
    if score.is_none() && words.is_none() && tiles.is_none() {
        return Err(GameSaveError::Config(
            "nothing to edit (use --score, --words or --tiles)".into(),
        ));
    }

    let manager = &ctx.manager;
    manager.get().await?;
    manager.update_active_board(|board| {
        if let Some(score) = score {
            board.score = score;
        }
        if let Some(words) = words {
            board.words_found = words;
        }
        if let Some(tiles) = &tiles {
            board.set_tiles(tiles);
        }
    })?;
    manager.save(true).await?;

    print_board(manager.active_slot(), &manager.active_board()?);
    Ok(())
}

async fn handle_delete(ctx: &AppContext, blobs_only: bool) -> Result<()> {
    let manager = &ctx.manager;
    let slot = manager.active_slot();
    if blobs_only {
        manager.delete_blobs().await?;
        println!("{}", format!("Deleted the saved data in slot {}", slot).green());
    } else {
        manager.delete().await?;
        println!("{}", format!("Deleted slot {}", slot).green());
    }
    Ok(())
}

fn handle_config(
    root: &Path,
    mut config: GameSaveConfig,
    key: Option<String>,
    value: Option<String>,
) -> Result<()> {
    match (key, value) {
        (None, _) => {
            for key in CONFIG_KEYS {
                println!("{} = {}", key, config.get(key)?);
            }
        }
        (Some(key), None) => println!("{}", config.get(&key)?),
        (Some(key), Some(value)) => {
            config.set(&key, &value)?;
            config.save(root)?;
            println!("{}", format!("{} = {}", key, config.get(&key)?).green());
        }
    }
    Ok(())
}

fn print_board(slot: u32, board: &BoardData) {
    println!("{}", format!("Slot {}", slot).bold());
    println!("Score: {}", board.score);
    println!("Words: {}", board.words_found);
    println!("Saves: {}", board.update_count);
    println!();
    for row in board.rows() {
        println!("  {}", row);
    }
}

fn pad_to_width(s: &str, width: usize) -> String {
    let padding = width.saturating_sub(s.width());
    format!("{}{}", s, " ".repeat(padding))
}

fn format_time_ago(timestamp: DateTime<Utc>) -> String {
    let duration = Utc::now().signed_duration_since(timestamp);
    timeago::Formatter::new().convert(duration.to_std().unwrap_or_default())
}
