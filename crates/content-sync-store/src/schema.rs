use rusqlite_migration::{M, Migrations};

pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "CREATE TABLE sync_runs (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at       TEXT NOT NULL,
            finished_at      TEXT NOT NULL,
            success          INTEGER NOT NULL,
            skipped          INTEGER NOT NULL,
            skip_reason      TEXT,
            downloaded       INTEGER NOT NULL DEFAULT 0,
            failed           INTEGER NOT NULL DEFAULT 0,
            paused           INTEGER NOT NULL DEFAULT 0,
            resumed          INTEGER NOT NULL DEFAULT 0,
            deleted          INTEGER NOT NULL DEFAULT 0,
            delete_failures  INTEGER NOT NULL DEFAULT 0,
            failures_json    TEXT NOT NULL DEFAULT '[]',
            message          TEXT NOT NULL
        );

        CREATE INDEX idx_sync_runs_success ON sync_runs(success);",
        ),
        // Running totals outlive pruned journal rows. Seeded from whatever
        // the journal holds when the table is created.
        M::up(
            "CREATE TABLE sync_totals (
            id              INTEGER PRIMARY KEY CHECK (id = 1),
            cycles          INTEGER NOT NULL DEFAULT 0,
            skipped_cycles  INTEGER NOT NULL DEFAULT 0,
            downloaded      INTEGER NOT NULL DEFAULT 0,
            failed          INTEGER NOT NULL DEFAULT 0,
            deleted         INTEGER NOT NULL DEFAULT 0,
            resumed         INTEGER NOT NULL DEFAULT 0
        );

        INSERT INTO sync_totals (id, cycles, skipped_cycles, downloaded, failed, deleted, resumed)
        SELECT 1,
               COALESCE(SUM(CASE WHEN skipped = 0 THEN 1 ELSE 0 END), 0),
               COALESCE(SUM(skipped), 0),
               COALESCE(SUM(CASE WHEN skipped = 0 THEN downloaded ELSE 0 END), 0),
               COALESCE(SUM(CASE WHEN skipped = 0 THEN failed ELSE 0 END), 0),
               COALESCE(SUM(CASE WHEN skipped = 0 THEN deleted ELSE 0 END), 0),
               COALESCE(SUM(CASE WHEN skipped = 0 THEN resumed ELSE 0 END), 0)
        FROM sync_runs;",
        ),
    ])
}
