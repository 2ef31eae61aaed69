//! SQL schema for the KIMI SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS subjects (
    subject_id    TEXT PRIMARY KEY,
    caregiver_id  TEXT NOT NULL,
    full_name     TEXT NOT NULL,
    device_id     TEXT NOT NULL,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS safe_zones (
    zone_id        TEXT PRIMARY KEY,
    subject_id     TEXT NOT NULL REFERENCES subjects(subject_id),
    name           TEXT NOT NULL,
    latitude       REAL NOT NULL,
    longitude      REAL NOT NULL,
    radius_meters  REAL NOT NULL CHECK (radius_meters > 0),
    is_active      INTEGER NOT NULL DEFAULT 1,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

-- Fixes are append-only.
CREATE TABLE IF NOT EXISTS position_fixes (
    fix_id         TEXT PRIMARY KEY,
    subject_id     TEXT NOT NULL REFERENCES subjects(subject_id),
    latitude       REAL NOT NULL,
    longitude      REAL NOT NULL,
    accuracy       REAL,
    battery_level  INTEGER,
    recorded_at    TEXT NOT NULL    -- device time, RFC 3339 with fixed nanos
);

-- Only acknowledged_at is ever updated.
CREATE TABLE IF NOT EXISTS alerts (
    alert_id         TEXT PRIMARY KEY,
    subject_id       TEXT NOT NULL REFERENCES subjects(subject_id),
    caregiver_id     TEXT NOT NULL,
    alert_type       TEXT NOT NULL,
    severity         TEXT NOT NULL,   -- 'low' | 'medium' | 'high'
    message          TEXT NOT NULL,
    metadata         TEXT NOT NULL DEFAULT '{}',
    created_at       TEXT NOT NULL,
    acknowledged_at  TEXT
);

-- One row per (subject, key) that has ever been breached.
-- breach_key is 'zone:<uuid>' or 'low_battery'.
CREATE TABLE IF NOT EXISTS breach_state (
    subject_id  TEXT NOT NULL REFERENCES subjects(subject_id),
    breach_key  TEXT NOT NULL,
    breached    INTEGER NOT NULL,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (subject_id, breach_key)
);

CREATE INDEX IF NOT EXISTS zones_subject_idx     ON safe_zones(subject_id);
CREATE INDEX IF NOT EXISTS fixes_subject_time_idx ON position_fixes(subject_id, recorded_at);
CREATE INDEX IF NOT EXISTS alerts_caregiver_idx  ON alerts(caregiver_id, acknowledged_at);

PRAGMA user_version = 1;
";
