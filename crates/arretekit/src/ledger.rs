//! CSV ledger of decree records
//!
//! Rows are upserted on `(number, publication_date)`: when a key repeats,
//! the most recent row wins. The traffic ledger holds the traffic-related
//! subset of the same merge.

use crate::error::LedgerError;
use crate::record::DecreeRecord;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Merge `new` into `existing`, keeping the last row per ledger key
///
/// Output rows keep the position of their key's last occurrence, so newly
/// scraped rows land after rows that were not touched.
pub fn merge_records(existing: Vec<DecreeRecord>, new: Vec<DecreeRecord>) -> Vec<DecreeRecord> {
    let rows: Vec<DecreeRecord> = existing.into_iter().chain(new).collect();

    let mut last: HashMap<(String, String), usize> = HashMap::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        let (number, date) = row.ledger_key();
        last.insert((number.to_string(), date.to_string()), idx);
    }

    rows.into_iter()
        .enumerate()
        .filter(|(idx, row)| {
            let (number, date) = row.ledger_key();
            last.get(&(number.to_string(), date.to_string())) == Some(idx)
        })
        .map(|(_, row)| row)
        .collect()
}

/// A CSV file of [`DecreeRecord`] rows
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all rows; a missing file is an empty ledger
    pub fn load(&self) -> Result<Vec<DecreeRecord>, LedgerError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path)?;
        let rows = reader
            .deserialize()
            .collect::<Result<Vec<DecreeRecord>, csv::Error>>()?;
        Ok(rows)
    }

    /// Overwrite the file with `records`
    pub fn save(&self, records: &[DecreeRecord]) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut writer = csv::Writer::from_path(&self.path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Upsert `records` and write the result back
    ///
    /// Returns the number of rows now in the ledger.
    pub fn merge_into(&self, records: &[DecreeRecord]) -> Result<usize, LedgerError> {
        self.merge_filtered(records, |_| true)
    }

    /// Upsert `records`, keeping only traffic-related rows
    pub fn merge_traffic_into(&self, records: &[DecreeRecord]) -> Result<usize, LedgerError> {
        self.merge_filtered(records, |r| r.is_traffic_related)
    }

    fn merge_filtered(
        &self,
        records: &[DecreeRecord],
        keep: fn(&DecreeRecord) -> bool,
    ) -> Result<usize, LedgerError> {
        let existing = self.load()?;
        let before = existing.len();
        let mut merged = merge_records(existing, records.to_vec());
        merged.retain(keep);
        self.save(&merged)?;
        info!(
            path = %self.path.display(),
            before,
            after = merged.len(),
            "ledger updated"
        );
        Ok(merged.len())
    }
}
