//! Schema for the record store.

pub const SCHEMA: &str = r#"
-- Entity records, one row per (kind, id), serialized as JSON.
-- Lifecycle and timestamps are hoisted into columns so queries never
-- have to crack the blob open. rowid doubles as insertion order.
CREATE TABLE IF NOT EXISTS records (
    kind TEXT NOT NULL,
    id TEXT NOT NULL,
    data BLOB NOT NULL,
    state TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    PRIMARY KEY (kind, id)
);

CREATE INDEX IF NOT EXISTS idx_records_kind_state
    ON records(kind, state);

CREATE INDEX IF NOT EXISTS idx_records_deleted
    ON records(state, deleted_at);

-- The single persisted price snapshot. slot = 0 enforces "at most one
-- snapshot, any location" by construction.
CREATE TABLE IF NOT EXISTS price_snapshot (
    slot INTEGER PRIMARY KEY CHECK (slot = 0),
    location_id TEXT NOT NULL,
    last_sync TEXT NOT NULL,
    data BLOB NOT NULL
);
"#;
