/// Schema shared by every execution context opening the store.
pub const SCHEMA: &str = r#"
-- Pending mutating requests, replayed in id order.
-- AUTOINCREMENT keeps ids from being reused after deletes.
-- claimed_by/claimed_at: lease held by the replay pass sending the row.
CREATE TABLE IF NOT EXISTS request_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    body BLOB,
    content_type TEXT,
    captured_auth TEXT,
    meta TEXT NOT NULL,
    created_at TEXT NOT NULL,
    claimed_by TEXT,
    claimed_at INTEGER
);

-- Named cache containers (one per generation and purpose)
CREATE TABLE IF NOT EXISTS cache_names (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Raw HTTP response snapshots
CREATE TABLE IF NOT EXISTS response_cache (
    cache_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, request_key)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_url ON response_cache(url);

-- Signed-in user (single row)
CREATE TABLE IF NOT EXISTS session (
    slot INTEGER PRIMARY KEY CHECK (slot = 1),
    token TEXT NOT NULL,
    user_id TEXT,
    username TEXT,
    role TEXT,
    signed_in_at TEXT NOT NULL
);
"#;
