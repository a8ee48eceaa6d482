//! SQL schema for the Tier 2 digest index.
//!
//! The index holds positions, never digest bodies. Dropping the database
//! loses nothing that a rebuild cannot restore from the digest files.

/// Current value of `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 2;

/// Drops the tables of an older layout. A rebuild repopulates them.
pub const DROP_OUTDATED: &str = "
DROP TABLE IF EXISTS digest_themes;
DROP TABLE IF EXISTS digest_keywords;
DROP TABLE IF EXISTS digests;
";

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS digests (
    ci_id               TEXT    NOT NULL,
    digest_id           TEXT    NOT NULL,
    timestamp           INTEGER NOT NULL,   -- microseconds since the epoch, UTC
    period_type         TEXT    NOT NULL,   -- 'weekly' | 'monthly'
    period_id           TEXT    NOT NULL,
    digest_type         TEXT    NOT NULL,   -- 'interaction' | 'learning' | 'project' | 'mixed'
    source_record_count INTEGER NOT NULL DEFAULT 0,
    questions_asked     INTEGER NOT NULL DEFAULT 0,
    archived            INTEGER NOT NULL DEFAULT 0,
    file_path           TEXT    NOT NULL,   -- relative to the tier2 root
    file_offset         INTEGER NOT NULL,
    PRIMARY KEY (ci_id, digest_id)
);

-- Membership tables for substring filters on themes and keywords. Digest ids
-- are only unique within a CI, so every row carries its owner.
CREATE TABLE IF NOT EXISTS digest_themes (
    ci_id     TEXT NOT NULL,
    digest_id TEXT NOT NULL,
    theme     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS digest_keywords (
    ci_id     TEXT NOT NULL,
    digest_id TEXT NOT NULL,
    keyword   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS digests_ci_time_idx   ON digests(ci_id, timestamp);
CREATE INDEX IF NOT EXISTS digests_period_idx    ON digests(period_type, period_id);
CREATE INDEX IF NOT EXISTS digests_type_idx      ON digests(digest_type);
CREATE INDEX IF NOT EXISTS digest_themes_idx     ON digest_themes(ci_id, digest_id);
CREATE INDEX IF NOT EXISTS digest_keywords_idx   ON digest_keywords(ci_id, digest_id);

PRAGMA user_version = 2;
";
