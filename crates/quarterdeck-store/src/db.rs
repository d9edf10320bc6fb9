use rusqlite::Connection;

use crate::error::Result;

/// Initialise the console schema in `conn`.
///
/// Every statement is idempotent (CREATE IF NOT EXISTS) so this is safe to
/// run on each startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS apps (
            id                    TEXT    NOT NULL PRIMARY KEY,
            slug                  TEXT    NOT NULL UNIQUE,
            name                  TEXT    NOT NULL,
            update_check_spec     TEXT    NOT NULL DEFAULT '@default',
            is_airgap             INTEGER NOT NULL DEFAULT 0,
            current_sequence      INTEGER NOT NULL DEFAULT -1,  -- -1 until first version
            license_id            TEXT    NOT NULL,
            last_update_check_at  TEXT,               -- ISO-8601 or NULL
            created_at            TEXT    NOT NULL,
            updated_at            TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS app_versions (
            app_id         TEXT    NOT NULL,
            sequence       INTEGER NOT NULL,
            source         TEXT    NOT NULL,
            version_label  TEXT    NOT NULL,
            archive_path   TEXT    NOT NULL,
            created_at     TEXT    NOT NULL,
            PRIMARY KEY (app_id, sequence)
        ) STRICT;

        CREATE TABLE IF NOT EXISTS downstreams (
            app_id                   TEXT    NOT NULL,
            cluster_id               TEXT    NOT NULL,
            name                     TEXT    NOT NULL,
            current_parent_sequence  INTEGER,          -- NULL until first deploy
            created_at               TEXT    NOT NULL,
            PRIMARY KEY (app_id, cluster_id)
        ) STRICT;

        CREATE TABLE IF NOT EXISTS task_status (
            name        TEXT NOT NULL PRIMARY KEY,
            status      TEXT NOT NULL,
            message     TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS licenses (
            id          TEXT NOT NULL PRIMARY KEY,
            app_id      TEXT NOT NULL,
            payload     TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS downstream_output (
            app_id         TEXT    NOT NULL,
            cluster_id     TEXT    NOT NULL,
            sequence       INTEGER NOT NULL,
            dryrun_stdout  TEXT    NOT NULL DEFAULT '',
            dryrun_stderr  TEXT    NOT NULL DEFAULT '',
            apply_stdout   TEXT    NOT NULL DEFAULT '',
            apply_stderr   TEXT    NOT NULL DEFAULT '',
            render_error   TEXT    NOT NULL DEFAULT '',
            updated_at     TEXT    NOT NULL,
            PRIMARY KEY (app_id, cluster_id, sequence)
        ) STRICT;

        -- latest_license scans per app, newest first
        CREATE INDEX IF NOT EXISTS idx_licenses_app ON licenses (app_id, updated_at);
        ",
    )?;
    Ok(())
}
