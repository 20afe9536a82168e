use crate::core::category::Category;
use crate::core::classifier::ClassificationRecord;
use crate::database::{RecordQuery, ResultsStore, StoreError};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Writes classification records as CSV for review outside the tool.
pub struct ExportService;

impl ExportService {
    pub fn new() -> Self {
        Self
    }

    fn headers() -> Vec<String> {
        let mut headers: Vec<String> = [
            "asset_id",
            "filename",
            "path",
            "file_size",
            "width",
            "height",
            "primary_category",
            "confidence",
            "recommendation",
        ]
        .iter()
        .map(|h| h.to_string())
        .collect();
        headers.extend(Category::ALL.iter().map(|c| format!("{}_score", c.as_str())));
        headers.extend(["faults", "justifications", "marked_for_deletion"].map(String::from));
        headers
    }

    fn row(record: &ClassificationRecord) -> Vec<String> {
        let snapshot = &record.snapshot;
        let mut row = vec![
            record.asset_id.clone(),
            snapshot.filename.clone(),
            snapshot.path.clone(),
            snapshot.file_size.to_string(),
            snapshot.width.to_string(),
            snapshot.height.to_string(),
            record.primary_category.to_string(),
            format!("{:.1}", record.confidence),
            record.recommendation().as_str().to_string(),
        ];
        row.extend(
            Category::ALL
                .iter()
                .map(|c| format!("{:.1}", record.score_for(*c))),
        );
        row.push(record.faults.join(";"));
        row.push(record.justifications().join("; "));
        row.push(record.marked_for_deletion.to_string());
        row
    }

    /// Returns the number of records written.
    pub fn write_csv<W: Write>(
        &self,
        records: &[ClassificationRecord],
        writer: W,
    ) -> Result<usize, ExportError> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(Self::headers())?;
        for record in records {
            wtr.write_record(Self::row(record))?;
        }
        wtr.flush()?;
        Ok(records.len())
    }

    pub fn export_to_path(
        &self,
        store: &dyn ResultsStore,
        query: &RecordQuery,
        path: &Path,
    ) -> Result<usize, ExportError> {
        let records = store.query(query)?;
        let file = File::create(path)?;
        let written = self.write_csv(&records, file)?;
        log::info!("Exported {} records to {}", written, path.display());
        Ok(written)
    }
}

impl Default for ExportService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::record;
    use crate::database::MemoryStore;
    use tempfile::TempDir;

    #[test]
    fn test_csv_has_header_and_rows() {
        let mut marked = record("b", Category::WebCache, 85.0);
        marked.marked_for_deletion = true;
        let records = vec![record("a", Category::Screenshot, 42.0), marked];

        let mut out = Vec::new();
        let written = ExportService::new().write_csv(&records, &mut out).unwrap();
        assert_eq!(written, 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("asset_id,filename,path"));
        assert!(lines[0].contains("web_cache_score"));
        assert!(lines[1].contains("manual_review"));
        assert!(lines[2].contains("strongly_delete"));
        assert!(lines[2].ends_with("true"));
    }

    #[test]
    fn test_export_applies_query() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.csv");
        let store = MemoryStore::new();
        store.upsert(&record("a", Category::RecoveryJunk, 90.0)).unwrap();
        store.upsert(&record("b", Category::RecoveryJunk, 20.0)).unwrap();
        store.upsert(&record("c", Category::LowQuality, 95.0)).unwrap();

        let query = RecordQuery::all()
            .category(Category::RecoveryJunk)
            .min_confidence(50.0);
        let written = ExportService::new()
            .export_to_path(&store, &query, &path)
            .unwrap();
        assert_eq!(written, 1);

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][0], "a");
        assert_eq!(&rows[0][6], "recovery_junk");
    }
}
