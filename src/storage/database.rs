//! SQLite database for scan results
//!
//! Fire-and-forget persistence sink: one row per processed image. Failures
//! here are logged by the caller and never fail a pipeline invocation.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::Path;

use crate::extract::MedicineInfo;
use crate::lang::LanguageTag;

/// A persisted scan row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredScan {
    pub image_id: String,
    pub batch_id: String,
    pub language: String,
    pub name: Option<String>,
    pub ingredients: Vec<String>,
    pub quantity: Option<String>,
    pub confidence: f64,
    pub raw_text: String,
    pub created_at: String,
}

/// Database connection wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path:?}"))?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (tests and dry runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS scans (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                image_id    TEXT NOT NULL,
                batch_id    TEXT NOT NULL,
                language    TEXT NOT NULL,
                name        TEXT,
                ingredients TEXT NOT NULL,
                quantity    TEXT,
                confidence  REAL NOT NULL,
                raw_text    TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_scans_batch ON scans (batch_id);",
        )?;
        Ok(())
    }

    /// Record one scan outcome.
    pub fn record_scan(
        &self,
        batch_id: &str,
        image_id: &str,
        language: LanguageTag,
        info: &MedicineInfo,
        raw_text: &str,
    ) -> Result<()> {
        let ingredients = serde_json::to_string(&info.ingredients)?;

        self.conn.execute(
            "INSERT INTO scans (image_id, batch_id, language, name, ingredients, quantity, confidence, raw_text)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                image_id,
                batch_id,
                language.code(),
                info.name,
                ingredients,
                info.quantity,
                f64::from(info.confidence),
                raw_text,
            ],
        )?;

        Ok(())
    }

    /// All stored scans for a batch, oldest first.
    pub fn scans_for_batch(&self, batch_id: &str) -> Result<Vec<StoredScan>> {
        let mut stmt = self.conn.prepare(
            "SELECT image_id, batch_id, language, name, ingredients, quantity, confidence, raw_text, created_at
             FROM scans WHERE batch_id = ?1 ORDER BY id",
        )?;

        let rows = stmt.query_map(params![batch_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, f64>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;

        let mut scans = Vec::new();
        for row in rows {
            let (image_id, batch_id, language, name, ingredients, quantity, confidence, raw_text, created_at) =
                row?;
            scans.push(StoredScan {
                image_id,
                batch_id,
                language,
                name,
                ingredients: serde_json::from_str(&ingredients).unwrap_or_default(),
                quantity,
                confidence,
                raw_text,
                created_at,
            });
        }

        Ok(scans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> MedicineInfo {
        MedicineInfo {
            name: Some("舒緩膠囊".to_string()),
            ingredients: vec!["Acetaminophen 500mg".to_string()],
            quantity: Some("20錠".to_string()),
            confidence: 0.7,
        }
    }

    #[test]
    fn test_record_and_read_back() {
        let db = Database::open_in_memory().unwrap();
        db.record_scan(
            "batch-1",
            "img-1",
            LanguageTag::TraditionalChinese,
            &sample_info(),
            "品名：舒緩膠囊",
        )
        .unwrap();

        let scans = db.scans_for_batch("batch-1").unwrap();
        assert_eq!(scans.len(), 1);
        let scan = &scans[0];
        assert_eq!(scan.image_id, "img-1");
        assert_eq!(scan.language, "zh-tw");
        assert_eq!(scan.name.as_deref(), Some("舒緩膠囊"));
        assert_eq!(scan.ingredients, vec!["Acetaminophen 500mg"]);
        assert_eq!(scan.quantity.as_deref(), Some("20錠"));
        assert!((scan.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_batches_are_separate() {
        let db = Database::open_in_memory().unwrap();
        db.record_scan("a", "img-1", LanguageTag::English, &sample_info(), "text")
            .unwrap();
        db.record_scan("b", "img-2", LanguageTag::English, &sample_info(), "text")
            .unwrap();

        assert_eq!(db.scans_for_batch("a").unwrap().len(), 1);
        assert_eq!(db.scans_for_batch("b").unwrap().len(), 1);
        assert!(db.scans_for_batch("c").unwrap().is_empty());
    }

    #[test]
    fn test_open_creates_file_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scans.db");

        let db = Database::open(&path).unwrap();
        assert!(path.exists());
        assert!(db.scans_for_batch("none").unwrap().is_empty());
    }

    #[test]
    fn test_absent_fields_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let info = MedicineInfo {
            name: None,
            ingredients: vec![],
            quantity: None,
            confidence: 0.0,
        };
        db.record_scan("batch", "img", LanguageTag::Korean, &info, "")
            .unwrap();

        let scans = db.scans_for_batch("batch").unwrap();
        assert_eq!(scans[0].name, None);
        assert!(scans[0].ingredients.is_empty());
        assert_eq!(scans[0].quantity, None);
    }
}
