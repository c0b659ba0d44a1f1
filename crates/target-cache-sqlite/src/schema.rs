pub const MIG_0001_INIT: &str = r#"
BEGIN;

CREATE TABLE target_cache (
  cache_key       TEXT PRIMARY KEY,
  targets_json    TEXT NOT NULL,
  updated_ms      INTEGER NOT NULL
);

COMMIT;
"#;
