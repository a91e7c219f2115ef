mod core;
mod i18n;
mod plugins;

use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use crate::core::credential::SharedCredential;
use crate::core::events::QueueEvent;
use crate::core::model::{ItemStatus, Visibility};
use crate::core::queue::UploadQueue;
use crate::core::store::SqliteStore;
use i18n::{get_messages, Locale, Messages};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use plugins::registry::{PluginRegistry, UploadCliConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

fn build_cli(registry: &PluginRegistry) -> Command {
    let upload = Command::new("upload")
        .about("Upload one or more video files, one after another")
        .arg(
            Arg::new("files")
                .help("Files to upload")
                .action(ArgAction::Append)
                .num_args(1..)
                .required(true),
        )
        .arg(
            Arg::new("privacy")
                .long("privacy")
                .help("Visibility of the created videos")
                .value_parser(["private", "unlisted", "public"])
                .default_value("private")
                .num_args(1),
        )
        .arg(
            Arg::new("all_files")
                .long("all-files")
                .help("Also queue files that do not look like videos")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("ledger")
                .long("ledger")
                .help("SQLite ledger of finished uploads; recorded files are skipped")
                .num_args(1),
        )
        .arg(
            Arg::new("retry_failed")
                .long("retry-failed")
                .help("Retry each failed item once after the first pass")
                .action(ArgAction::SetTrue),
        );

    let upload = registry.augment_upload_command(upload);

    let history = Command::new("history")
        .about("List uploads recorded in a ledger")
        .arg(
            Arg::new("ledger")
                .long("ledger")
                .help("SQLite ledger path")
                .required(true)
                .num_args(1),
        );

    Command::new("uploader")
        .about("Sequential resumable video uploader")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("locale")
                .long("locale")
                .global(true)
                .help("Output language (en, zh)")
                .default_value("en")
                .num_args(1),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .help("More log output (-v info, -vv debug); RUST_LOG overrides")
                .action(ArgAction::Count),
        )
        .subcommand(upload)
        .subcommand(history)
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let registry = PluginRegistry::with_defaults();
    let matches = build_cli(&registry).get_matches();

    init_tracing(matches.get_count("verbose"));
    let locale = matches
        .get_one::<String>("locale")
        .map(|s| Locale::from_str(s))
        .unwrap_or_default();
    let msgs = get_messages(locale);

    match matches.subcommand() {
        Some(("upload", m)) => run_upload(&registry, m, msgs).await,
        Some(("history", m)) => run_history(m, msgs).await,
        _ => Ok(()),
    }
}

async fn run_upload(registry: &PluginRegistry, m: &ArgMatches, msgs: &'static Messages) -> anyhow::Result<()> {
    let mut cfg = UploadCliConfig::default();
    registry.apply_upload_matches(m, &mut cfg)?;

    let visibility: Visibility = m.get_one::<String>("privacy").context("missing --privacy")?.parse()?;
    let videos_only = !m.get_flag("all_files");
    let paths: Vec<PathBuf> = m
        .get_many::<String>("files")
        .context("no files given")?
        .map(PathBuf::from)
        .collect();

    let credential = Arc::new(SharedCredential::new(registry.credential_provider(&cfg)?));
    if !credential.try_silent().await {
        credential
            .authorize(true)
            .await
            .map_err(|e| anyhow::anyhow!("{}: {}", msgs.auth_failed, e))?;
    }
    println!("{} ({})", msgs.signed_in, credential.provider_name());

    let mut queue = UploadQueue::new(registry.negotiator(&cfg)?, registry.transport(&cfg)?, credential);
    if let Some(p) = m.get_one::<String>("ledger") {
        queue = queue.with_ledger(SqliteStore::open(Path::new(p)).await?);
    }

    let ui_task = tokio::spawn(render_events(queue.subscribe(), msgs));

    queue.enqueue_files(&paths, visibility, videos_only).await;
    if !queue.can_start().await {
        println!("{}", msgs.nothing_to_upload);
        ui_task.abort();
        return Ok(());
    }

    queue.start_all().await;

    if m.get_flag("retry_failed") {
        let failed: Vec<Uuid> = queue
            .snapshot()
            .iter()
            .filter(|it| it.status == ItemStatus::Error)
            .map(|it| it.id)
            .collect();
        for id in failed {
            queue.retry(id).await;
        }
    }

    let items = queue.snapshot();
    // Dropping the queue closes the event channel and ends the renderer.
    drop(queue);
    ui_task.await??;

    println!();
    println!("{}:", msgs.summary_header);
    for it in &items {
        let video = it.video_id.as_deref().unwrap_or("-");
        println!(
            "- {} [{}] {} {} video={}",
            it.payload.name,
            msgs.status_label(it.status),
            fmt_bytes(it.payload.size),
            it.visibility,
            video,
        );
        if let Some(e) = &it.error_message {
            println!("  {}: {}", msgs.error_prefix, e);
        }
    }

    let failed = items.iter().filter(|it| it.status == ItemStatus::Error).count();
    if failed > 0 {
        anyhow::bail!("{} of {} upload(s) failed", failed, items.len());
    }
    Ok(())
}

async fn render_events(mut rx: broadcast::Receiver<QueueEvent>, msgs: &'static Messages) -> anyhow::Result<()> {
    let mp = MultiProgress::new();
    let sty_bar = ProgressStyle::with_template(
        "{prefix} {bar:40.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, eta {eta}) {wide_msg}",
    )?;

    let mut bars: HashMap<Uuid, ProgressBar> = HashMap::new();

    loop {
        let evt = match rx.recv().await {
            Ok(e) => e,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!(skipped = n, "renderer lagging behind queue events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match evt {
            QueueEvent::QueueRunning { running } => {
                let label = if running { msgs.queue_started } else { msgs.queue_finished };
                let _ = mp.println(label.to_string());
            }
            QueueEvent::ItemAdded { item_id, name, size, visibility } => {
                let pb = mp.add(ProgressBar::new(size));
                pb.set_style(sty_bar.clone());
                pb.set_prefix(format!("[{name}]"));
                pb.set_message(format!("{} ({})", msgs.status_queued, visibility));
                bars.insert(item_id, pb);
            }
            QueueEvent::ItemRemoved { item_id } => {
                if let Some(pb) = bars.remove(&item_id) {
                    pb.finish_and_clear();
                }
            }
            QueueEvent::VisibilityChanged { item_id, visibility } => {
                if let Some(pb) = bars.get(&item_id) {
                    pb.set_message(format!("{} ({})", msgs.status_queued, visibility));
                }
            }
            QueueEvent::ItemStatusChanged { item_id, status } => {
                let Some(pb) = bars.get(&item_id) else { continue };
                let label = msgs.status_label(status);
                if status == ItemStatus::Error {
                    pb.abandon_with_message(label);
                } else if status.is_terminal() {
                    pb.finish_with_message(label);
                } else {
                    if status == ItemStatus::Queued {
                        pb.reset();
                    }
                    pb.set_message(label);
                }
            }
            QueueEvent::Progress { item_id, sent, total, percent } => {
                if let Some(pb) = bars.get(&item_id) {
                    if pb.length() != Some(total) {
                        pb.set_length(total);
                    }
                    pb.set_position(sent.min(total));
                    pb.set_message(format!("{} {:.0}%", msgs.status_uploading, percent));
                }
            }
            QueueEvent::Error { scope, message } => {
                let _ = mp.println(format!("[{}] {}: {}", msgs.error_prefix, scope, message));
            }
            QueueEvent::Info { scope, message } => {
                let _ = mp.println(format!("[{}] {}: {}", msgs.info_prefix, scope, message));
            }
        }
    }

    Ok(())
}

async fn run_history(m: &ArgMatches, msgs: &'static Messages) -> anyhow::Result<()> {
    let path = m.get_one::<String>("ledger").context("missing --ledger")?;
    let store = SqliteStore::open(Path::new(path)).await?;
    let records = store.list_uploads().await?;
    if records.is_empty() {
        println!("{}", msgs.history_empty);
        return Ok(());
    }
    for r in records {
        println!(
            "{} {} {} {} {}",
            r.uploaded_at,
            r.video_id,
            r.visibility,
            fmt_bytes(r.size),
            r.path,
        );
    }
    Ok(())
}

fn fmt_bytes(n: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;
    let f = n as f64;
    if f >= GB {
        format!("{:.2}GiB", f / GB)
    } else if f >= MB {
        format!("{:.1}MiB", f / MB)
    } else if f >= KB {
        format!("{:.1}KiB", f / KB)
    } else {
        format!("{}B", n)
    }
}
