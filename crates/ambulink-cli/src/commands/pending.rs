use std::path::Path;

use crate::commands::common::{format_pending_lines, open_store, pending_item, PendingItem};
use crate::error::CliError;

pub async fn run_pending(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let scan = store.scan_pending().await?;
    let now_ms = chrono::Utc::now().timestamp_millis();

    if as_json {
        let items = scan
            .records
            .iter()
            .map(|record| pending_item(record, now_ms))
            .collect::<Vec<PendingItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if scan.records.is_empty() {
        println!("Outbox is empty.");
    }
    for line in format_pending_lines(&scan.records, now_ms) {
        println!("{line}");
    }
    for skipped in &scan.skipped {
        eprintln!(
            "Skipped unreadable record {} (row {}): {}",
            skipped.record_id, skipped.seq, skipped.reason
        );
    }
    Ok(())
}
