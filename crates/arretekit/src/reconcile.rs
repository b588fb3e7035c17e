//! Storage reconciliation
//!
//! Recovers storage URLs for ledger rows whose PDF was archived but whose
//! URL never made it back into the ledger, by probing the key layouts used
//! over time and then scanning the bucket for the content hash.

use crate::error::StorageError;
use crate::record::DecreeRecord;
use crate::storage::{
    current_year, publication_year, sanitize_number, size_kb, ObjectEntry, ObjectStore,
    KEY_PREFIX,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub found: usize,
    pub not_found: usize,
}

/// Keys tried for a record, most likely first
pub fn candidate_keys(number: &str, content_hash: &str, publication_date: &str) -> Vec<String> {
    let clean = sanitize_number(number);
    let names = [
        format!("{clean}_{content_hash}.pdf"),
        format!("{content_hash}.pdf"),
        format!("{clean}.pdf"),
    ];

    let current = current_year();
    let mut years = vec![publication_year(publication_date)];
    for year in [current, current - 1] {
        if !years.contains(&year) {
            years.push(year);
        }
    }

    names
        .iter()
        .flat_map(|name| years.iter().map(move |year| format!("{KEY_PREFIX}{year}/{name}")))
        .collect()
}

/// Fill `storage_url` for records that lack one
///
/// Records without a number or hash cannot be matched and are left alone.
/// The bucket listing for the hash scan is fetched once, on first need.
pub async fn reconcile(
    records: &mut [DecreeRecord],
    store: &dyn ObjectStore,
) -> Result<ReconcileSummary, StorageError> {
    let mut summary = ReconcileSummary::default();
    let mut listing: Option<Vec<ObjectEntry>> = None;

    for record in records.iter_mut() {
        if !record.storage_pending() {
            continue;
        }
        let number = record.number.trim();
        let hash = record.content_hash.trim();
        if number.is_empty() || hash.is_empty() {
            continue;
        }

        let mut found = None;
        for key in candidate_keys(number, hash, &record.publication_date) {
            match store.exists(&key).await {
                Ok(Some(info)) => {
                    found = Some((key, info.size));
                    break;
                }
                Ok(None) => {}
                Err(e) => warn!(key, error = %e, "existence check failed"),
            }
        }

        if found.is_none() {
            if listing.is_none() {
                listing = Some(store.list(KEY_PREFIX).await?);
            }
            found = listing
                .as_deref()
                .and_then(|entries| find_by_hash(entries, hash))
                .map(|entry| (entry.key.clone(), entry.size));
        }

        match found {
            Some((key, size)) => {
                debug!(number, key, "storage object found");
                record.storage_url = Some(store.url_for(&key));
                record.storage_size_kb = Some(size_kb(size));
                summary.found += 1;
            }
            None => {
                debug!(number, hash, "no storage object");
                summary.not_found += 1;
            }
        }
    }

    info!(
        found = summary.found,
        not_found = summary.not_found,
        "reconciliation finished"
    );
    Ok(summary)
}

fn find_by_hash<'a>(entries: &'a [ObjectEntry], hash: &str) -> Option<&'a ObjectEntry> {
    let needle = hash.to_lowercase();
    entries
        .iter()
        .find(|entry| entry.key.to_lowercase().contains(&needle))
}
