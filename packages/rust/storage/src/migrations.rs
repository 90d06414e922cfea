//! SQL migration definitions for the a11yscan database.
//!
//! Migrations are applied in order on database open. Each migration records
//! its version in `schema_migrations`.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: scans",
            sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per finished scan; the full ScanResult lives in result_json
CREATE TABLE IF NOT EXISTS scans (
    job_id           TEXT PRIMARY KEY,
    base_url         TEXT NOT NULL,
    status           TEXT NOT NULL,
    pages            INTEGER NOT NULL,
    total_violations INTEGER NOT NULL,
    critical         INTEGER NOT NULL,
    serious          INTEGER NOT NULL,
    moderate         INTEGER NOT NULL,
    minor            INTEGER NOT NULL,
    compliance_score INTEGER NOT NULL,
    wcag_level       TEXT NOT NULL,
    started_at       TEXT NOT NULL,
    completed_at     TEXT NOT NULL,
    result_json      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scans_completed_at ON scans(completed_at);
CREATE INDEX IF NOT EXISTS idx_scans_base_url ON scans(base_url);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Per-rule violation counts",
            sql: r#"
CREATE TABLE IF NOT EXISTS scan_rules (
    job_id      TEXT NOT NULL REFERENCES scans(job_id) ON DELETE CASCADE,
    rule_id     TEXT NOT NULL,
    impact      TEXT NOT NULL,
    occurrences INTEGER NOT NULL,
    PRIMARY KEY (job_id, rule_id)
);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
