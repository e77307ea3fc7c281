//! SQL schema for the Luit SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Reports are never deleted; closed reports stay for history.
CREATE TABLE IF NOT EXISTS reports (
    report_id            TEXT PRIMARY KEY,
    problem              TEXT NOT NULL,
    source_type          TEXT NOT NULL,
    severity             TEXT NOT NULL,   -- 'low' | 'medium' | 'high'
    latitude             REAL,
    longitude            REAL,
    area_name            TEXT,
    district             TEXT,
    district_id          TEXT,
    locality_key         TEXT,            -- six-digit PIN
    image_ref            TEXT,
    status               TEXT NOT NULL,   -- 'reported' | 'escalated' | 'resolved' | 'clean'
    active               INTEGER NOT NULL,
    pending_lab_approval INTEGER NOT NULL DEFAULT 0,
    phc_marked_clean_at  TEXT,
    lab_findings         TEXT,            -- JSON-encoded LabFindings or NULL
    upvote_count         INTEGER NOT NULL DEFAULT 0,
    assignment_id        TEXT,
    created_at           TEXT NOT NULL,   -- RFC 3339 UTC
    last_transition_at   TEXT NOT NULL,
    CHECK ((latitude IS NULL) = (longitude IS NULL)),
    CHECK (active = (status IN ('reported', 'escalated'))),
    CHECK (upvote_count >= 0)
);

CREATE TABLE IF NOT EXISTS assignments (
    assignment_id TEXT PRIMARY KEY,
    locality_key  TEXT NOT NULL,
    status        TEXT NOT NULL,
    rep_latitude  REAL NOT NULL,
    rep_longitude REAL NOT NULL,
    severity      TEXT NOT NULL,
    district      TEXT,
    district_id   TEXT,
    area_name     TEXT,
    test_result   TEXT,                   -- JSON-encoded LabDocument or NULL
    solution      TEXT,                   -- JSON-encoded LabDocument or NULL
    final_notes   TEXT,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

-- Membership is append-only; insertion order is the rowid.
CREATE TABLE IF NOT EXISTS assignment_members (
    assignment_id TEXT NOT NULL REFERENCES assignments(assignment_id),
    report_id     TEXT NOT NULL REFERENCES reports(report_id),
    PRIMARY KEY (assignment_id, report_id)
);

-- At most one open assignment per locality.
CREATE UNIQUE INDEX IF NOT EXISTS assignments_open_locality_idx
    ON assignments(locality_key) WHERE status != 'resolved';

CREATE INDEX IF NOT EXISTS reports_locality_idx   ON reports(locality_key);
CREATE INDEX IF NOT EXISTS reports_district_idx   ON reports(district_id);
CREATE INDEX IF NOT EXISTS reports_status_idx     ON reports(status);
CREATE INDEX IF NOT EXISTS reports_assignment_idx ON reports(assignment_id);
CREATE INDEX IF NOT EXISTS assignments_status_idx ON assignments(status);

PRAGMA user_version = 1;
";
