//! libSQL storage layer for scan results.
//!
//! The [`Storage`] struct wraps a local libSQL database holding one row per
//! finished scan (summary columns plus the full result as JSON) and a per-rule
//! violation breakdown.
//!
//! **Access rules:**
//! - `scan`: read-write via [`Storage::open`]
//! - `history` / `show`: read-only via [`Storage::open_readonly`]

mod migrations;

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use serde::Serialize;
use tracing::{debug, info};

use a11yscan_shared::{A11yScanError, Impact, JobId, Result, ScanResult, ScanStatus, WcagLevel};

/// Summary row of a persisted scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub job_id: JobId,
    pub base_url: String,
    pub status: ScanStatus,
    pub pages: usize,
    pub total_violations: usize,
    pub compliance_score: u8,
    pub wcag_level_achieved: WcagLevel,
    pub completed_at: DateTime<Utc>,
}

/// How often one rule was violated in a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCount {
    pub rule_id: String,
    pub impact: Impact,
    pub occurrences: usize,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

fn storage_err(e: impl std::fmt::Display) -> A11yScanError {
    A11yScanError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| A11yScanError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` without writing to it.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(A11yScanError::NotFound(format!(
                "no scan database at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    A11yScanError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(A11yScanError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scan results
    // -----------------------------------------------------------------------

    /// Persist a finished scan, replacing any earlier row for the same job.
    pub async fn insert_scan_result(&self, result: &ScanResult) -> Result<()> {
        self.check_writable()?;

        let json = serde_json::to_string(result)
            .map_err(|e| A11yScanError::parse(format!("serialize scan result: {e}")))?;
        let job_id = result.job_id.as_str();

        self.conn
            .execute(
                "INSERT OR REPLACE INTO scans (
                    job_id, base_url, status, pages, total_violations,
                    critical, serious, moderate, minor,
                    compliance_score, wcag_level, started_at, completed_at, result_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    job_id,
                    result.base_url.as_str(),
                    result.status.as_str(),
                    result.pages.len() as i64,
                    result.total_violations as i64,
                    result.severity.critical as i64,
                    result.severity.serious as i64,
                    result.severity.moderate as i64,
                    result.severity.minor as i64,
                    i64::from(result.compliance_score),
                    result.wcag_level_achieved.as_str(),
                    result.started_at.to_rfc3339(),
                    result.completed_at.to_rfc3339(),
                    json
                ],
            )
            .await
            .map_err(storage_err)?;

        self.conn
            .execute("DELETE FROM scan_rules WHERE job_id = ?1", params![job_id])
            .await
            .map_err(storage_err)?;

        for count in rule_counts(result) {
            self.conn
                .execute(
                    "INSERT INTO scan_rules (job_id, rule_id, impact, occurrences)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        job_id,
                        count.rule_id.as_str(),
                        count.impact.as_str(),
                        count.occurrences as i64
                    ],
                )
                .await
                .map_err(storage_err)?;
        }

        debug!(job_id, "scan result stored");
        Ok(())
    }

    /// Load the full result of a persisted scan.
    pub async fn get_scan_result(&self, job_id: &JobId) -> Result<Option<ScanResult>> {
        let mut rows = self
            .conn
            .query(
                "SELECT result_json FROM scans WHERE job_id = ?1",
                params![job_id.as_str()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => {
                let json = row.get::<String>(0).map_err(storage_err)?;
                let result = serde_json::from_str(&json)
                    .map_err(|e| A11yScanError::parse(format!("stored scan {job_id}: {e}")))?;
                Ok(Some(result))
            }
            None => Ok(None),
        }
    }

    /// Most recent scans first.
    pub async fn list_scans(&self, limit: usize) -> Result<Vec<ScanSummary>> {
        let mut rows = self
            .conn
            .query(
                "SELECT job_id, base_url, status, pages, total_violations,
                        compliance_score, wcag_level, completed_at
                 FROM scans ORDER BY completed_at DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_summary(&row)?);
        }
        Ok(results)
    }

    /// Rules with the most occurrences in one scan.
    pub async fn top_rules(&self, job_id: &JobId, limit: usize) -> Result<Vec<RuleCount>> {
        let mut rows = self
            .conn
            .query(
                "SELECT rule_id, impact, occurrences FROM scan_rules
                 WHERE job_id = ?1 ORDER BY occurrences DESC, rule_id LIMIT ?2",
                params![job_id.as_str(), limit as i64],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let impact: String = row.get(1).map_err(storage_err)?;
            results.push(RuleCount {
                rule_id: row.get(0).map_err(storage_err)?,
                impact: impact.parse().map_err(A11yScanError::parse)?,
                occurrences: row.get::<i64>(2).map_err(storage_err)? as usize,
            });
        }
        Ok(results)
    }

    /// Delete a persisted scan. Returns whether a row existed.
    pub async fn delete_scan(&self, job_id: &JobId) -> Result<bool> {
        self.check_writable()?;
        self.conn
            .execute(
                "DELETE FROM scan_rules WHERE job_id = ?1",
                params![job_id.as_str()],
            )
            .await
            .map_err(storage_err)?;
        let affected = self
            .conn
            .execute("DELETE FROM scans WHERE job_id = ?1", params![job_id.as_str()])
            .await
            .map_err(storage_err)?;
        Ok(affected > 0)
    }
}

/// Per-rule violation counts across all pages of a result.
fn rule_counts(result: &ScanResult) -> Vec<RuleCount> {
    let mut counts: BTreeMap<&str, RuleCount> = BTreeMap::new();
    for violation in result.pages.iter().flat_map(|p| &p.violations) {
        counts
            .entry(violation.rule_id.as_str())
            .or_insert_with(|| RuleCount {
                rule_id: violation.rule_id.clone(),
                impact: violation.impact,
                occurrences: 0,
            })
            .occurrences += 1;
    }
    counts.into_values().collect()
}

fn row_to_summary(row: &libsql::Row) -> Result<ScanSummary> {
    let status: String = row.get(2).map_err(storage_err)?;
    let level: String = row.get(6).map_err(storage_err)?;
    let completed_at: String = row.get(7).map_err(storage_err)?;

    Ok(ScanSummary {
        job_id: JobId(row.get(0).map_err(storage_err)?),
        base_url: row.get(1).map_err(storage_err)?,
        status: status.parse().map_err(A11yScanError::parse)?,
        pages: row.get::<i64>(3).map_err(storage_err)? as usize,
        total_violations: row.get::<i64>(4).map_err(storage_err)? as usize,
        compliance_score: row.get::<i64>(5).map_err(storage_err)?.clamp(0, 100) as u8,
        wcag_level_achieved: level.parse().map_err(A11yScanError::parse)?,
        completed_at: DateTime::parse_from_rfc3339(&completed_at)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| A11yScanError::parse(format!("completed_at: {e}")))?,
    })
}
