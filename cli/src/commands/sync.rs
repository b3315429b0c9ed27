use std::time::Duration;

use anyhow::{Result, bail};
use chrono::{Local, TimeZone};
use serde_json::json;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};
use tokio::sync::broadcast::error::RecvError;

use recipehub_core::RecipeHub;
use recipehub_core::events::{DrainReport, SyncEvent};
use recipehub_core::queue::{MutationOp, MutationQueueItem};
use recipehub_core::sync::DrainOutcome;

use crate::remote::HttpRemote;

use super::helpers::truncate;

pub(crate) async fn cmd_queue(hub: &RecipeHub, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct QueueRow {
        #[tabled(rename = "#")]
        idx: usize,
        #[tabled(rename = "Op")]
        op: &'static str,
        #[tabled(rename = "Table")]
        table: String,
        #[tabled(rename = "Target")]
        target: String,
        #[tabled(rename = "Queued at")]
        queued_at: String,
    }

    let items = hub.pending().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }
    if items.is_empty() {
        println!("Nothing queued");
        return Ok(());
    }

    let rows: Vec<QueueRow> = items
        .iter()
        .enumerate()
        .map(|(i, item)| QueueRow {
            idx: i + 1,
            op: item.op.kind(),
            table: item.op.table().to_string(),
            target: truncate(&target_of(item), 28),
            queued_at: format_stamp(item.enqueued_at),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::first()).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

/// What a queued item points at, for display.
fn target_of(item: &MutationQueueItem) -> String {
    match &item.op {
        MutationOp::Insert { temp_id: Some(temp), .. } => format!("local-{temp}"),
        MutationOp::Insert { .. } => item
            .recipe_ref
            .as_ref()
            .map_or_else(|| "-".to_string(), ToString::to_string),
        MutationOp::Update { target, .. } | MutationOp::Delete { target, .. } => {
            target.to_string()
        }
        MutationOp::HardDelete { column, owner, .. } => format!("{column}={owner}"),
    }
}

fn format_stamp(millis: i64) -> String {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map_or_else(|| millis.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

pub(crate) async fn cmd_status(hub: &RecipeHub, remote: &HttpRemote, json: bool) -> Result<()> {
    let status = hub.status().await?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "remote": remote.base_url(),
                "online": status.online,
                "draining": status.draining,
                "storage_available": status.storage_available,
                "pending": status.pending,
                "cached_recipes": status.cached_recipes,
                "cached_categories": status.cached_categories,
            }))?
        );
        return Ok(());
    }

    let connection = if status.online { "online" } else { "offline" };
    println!("Remote:     {} ({connection})", remote.base_url());
    if status.storage_available {
        println!(
            "Cache:      {} recipes, {} categories",
            status.cached_recipes, status.cached_categories
        );
        println!("Pending:    {} queued mutations", status.pending);
    } else {
        println!("Cache:      unavailable (running remote-only)");
    }
    Ok(())
}

fn report_json(report: &DrainReport) -> serde_json::Value {
    json!({
        "applied": report.applied,
        "dropped": report.dropped,
        "deferred": report.deferred,
        "aborted": report.aborted,
    })
}

fn print_outcome(outcome: &DrainOutcome, json: bool) {
    if json {
        let value = match outcome {
            DrainOutcome::Finished(report) => report_json(report),
            DrainOutcome::Empty => json!({ "applied": 0 }),
            DrainOutcome::Offline => json!({ "offline": true }),
            DrainOutcome::AlreadyDraining => json!({ "already_draining": true }),
            DrainOutcome::Unavailable(e) => json!({ "error": e.to_string() }),
        };
        println!("{value}");
        return;
    }
    match outcome {
        DrainOutcome::Finished(report) => print_report(report),
        DrainOutcome::Empty => println!("Nothing to sync"),
        DrainOutcome::Offline => eprintln!("Offline: changes stay queued until the remote is reachable"),
        DrainOutcome::AlreadyDraining => println!("A sync is already running"),
        DrainOutcome::Unavailable(e) => eprintln!("Cannot read the sync queue: {e}"),
    }
}

fn print_report(report: &DrainReport) {
    println!("Synced {} change(s)", report.applied);
    if !report.dropped.is_empty() {
        println!(
            "Dropped {} change(s) the server rejected",
            report.dropped.len()
        );
    }
    if report.deferred > 0 {
        println!("{} change(s) will be retried later", report.deferred);
    }
    if report.aborted {
        eprintln!("Sync stopped: the session expired. Check --token and run `recipehub sync` again");
    }
}

pub(crate) async fn cmd_sync(
    hub: &RecipeHub,
    remote: &HttpRemote,
    watch: bool,
    interval: u64,
    json: bool,
) -> Result<()> {
    if !watch {
        let outcome = hub.sync_now().await;
        print_outcome(&outcome, json);
        if hub.connectivity().is_online() {
            match hub.refresh().await {
                Ok(recipes) if !json => println!("Cache refreshed: {recipes} recipes"),
                Ok(_) => {}
                Err(e) if e.is_network() => eprintln!("Warning: cache not refreshed: {e}"),
                Err(e) => return Err(e.into()),
            }
        }
        if let DrainOutcome::Finished(report) = &outcome {
            if report.aborted {
                bail!("authorization expired");
            }
        }
        return Ok(());
    }

    if interval == 0 {
        bail!("--interval must be at least 1 second");
    }
    let tasks = hub.start();
    let mut events = hub.subscribe();
    let mut ticker = tokio::time::interval(Duration::from_secs(interval));
    eprintln!(
        "Watching {} every {interval}s (Ctrl-C to stop)",
        remote.base_url()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                hub.connectivity().set_online(remote.is_reachable().await);
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event, json),
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    for task in tasks {
        task.abort();
    }
    Ok(())
}

fn print_event(event: &SyncEvent, json: bool) {
    if json {
        let value = match event {
            SyncEvent::DrainStarted { pending } => json!({ "event": "drain_started", "pending": pending }),
            SyncEvent::SyncCompleted(report) => {
                json!({ "event": "sync_completed", "report": report_json(report) })
            }
            SyncEvent::MutationDropped { item, table, reason } => json!({
                "event": "mutation_dropped",
                "item": item,
                "table": table,
                "reason": reason.to_string(),
            }),
            SyncEvent::BackgroundRefreshCompleted { recipes } => {
                json!({ "event": "refresh_completed", "recipes": recipes })
            }
            SyncEvent::CategoriesRefreshed { categories } => {
                json!({ "event": "categories_refreshed", "categories": categories })
            }
        };
        println!("{value}");
        return;
    }
    match event {
        SyncEvent::DrainStarted { pending } => println!("Syncing {pending} queued change(s)..."),
        SyncEvent::SyncCompleted(report) => print_report(report),
        SyncEvent::MutationDropped { table, reason, .. } => {
            eprintln!("Dropped a change to {table}: {reason}");
        }
        SyncEvent::BackgroundRefreshCompleted { recipes } => {
            println!("Cache refreshed: {recipes} recipes");
        }
        SyncEvent::CategoriesRefreshed { categories } => {
            println!("Categories refreshed: {categories}");
        }
    }
}
