use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, instrument};
use uuid::Uuid;

use quarterdeck_core::types::{
    App, AppId, AppVersion, ClusterId, Downstream, DownstreamOutput, License, TaskStatus,
    VersionSource,
};

use crate::archive::{copy_dir_all, replace_dir};
use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::store::Store;

/// SQLite-backed [`Store`] with a durable archive directory on disk.
///
/// Wraps a single connection in a `Mutex`. Store calls are short; the one
/// long operation (archive copy inside `create_version`) deliberately stays
/// under the lock so sequence assignment and archive materialization are a
/// single critical section.
pub struct SqliteStore {
    db: Mutex<Connection>,
    archives_root: PathBuf,
}

impl SqliteStore {
    /// Wrap an already-open connection, running migrations and creating the
    /// archive root if needed.
    pub fn new(conn: Connection, archives_root: impl Into<PathBuf>) -> Result<Self> {
        init_db(&conn)?;
        let archives_root = archives_root.into();
        std::fs::create_dir_all(&archives_root)?;
        Ok(Self {
            db: Mutex::new(conn),
            archives_root,
        })
    }

    /// In-memory store for tests.
    pub fn in_memory(archives_root: impl Into<PathBuf>) -> Result<Self> {
        Self::new(Connection::open_in_memory()?, archives_root)
    }

    fn durable_dir(&self, app_id: &AppId, sequence: i64) -> PathBuf {
        self.archives_root.join(app_id.as_str()).join(sequence.to_string())
    }
}

/// Map a SELECT row (column order from APP_SELECT_SQL) to an App.
fn row_to_app(row: &rusqlite::Row<'_>) -> rusqlite::Result<App> {
    Ok(App {
        id: AppId(row.get(0)?),
        slug: row.get(1)?,
        name: row.get(2)?,
        update_check_spec: row.get(3)?,
        is_airgap: row.get::<_, i64>(4)? != 0,
        current_sequence: row.get(5)?,
        license_id: row.get(6)?,
        last_update_check_at: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

const APP_SELECT_SQL: &str = "SELECT id, slug, name, update_check_spec, is_airgap,
        current_sequence, license_id, last_update_check_at, created_at, updated_at
 FROM apps";

fn row_to_version(row: &rusqlite::Row<'_>) -> rusqlite::Result<(AppVersion, String)> {
    let source_str: String = row.get(2)?;
    Ok((
        AppVersion {
            app_id: AppId(row.get(0)?),
            sequence: row.get(1)?,
            // placeholder; replaced by the caller once parsed
            source: VersionSource::Release,
            version_label: row.get(3)?,
            archive_path: row.get(4)?,
            created_at: row.get(5)?,
        },
        source_str,
    ))
}

fn parse_version(raw: (AppVersion, String)) -> Result<AppVersion> {
    let (mut version, source_str) = raw;
    version.source = source_str
        .parse::<VersionSource>()
        .map_err(StoreError::Corrupt)?;
    Ok(version)
}

const VERSION_SELECT_SQL: &str =
    "SELECT app_id, sequence, source, version_label, archive_path, created_at
 FROM app_versions";

fn row_to_downstream(row: &rusqlite::Row<'_>) -> rusqlite::Result<Downstream> {
    Ok(Downstream {
        app_id: AppId(row.get(0)?),
        cluster_id: ClusterId(row.get(1)?),
        name: row.get(2)?,
        current_parent_sequence: row.get(3)?,
    })
}

impl Store for SqliteStore {
    fn list_installed_apps(&self) -> Result<Vec<App>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!("{APP_SELECT_SQL} ORDER BY created_at"))?;
        let apps = stmt
            .query_map([], row_to_app)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(apps)
    }

    fn get_app(&self, app_id: &AppId) -> Result<App> {
        let db = self.db.lock().unwrap();
        db.query_row(
            &format!("{APP_SELECT_SQL} WHERE id = ?1"),
            [app_id.as_str()],
            row_to_app,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                what: format!("app {app_id}"),
            },
            e => StoreError::Database(e),
        })
    }

    fn get_app_from_slug(&self, slug: &str) -> Result<App> {
        let db = self.db.lock().unwrap();
        db.query_row(
            &format!("{APP_SELECT_SQL} WHERE slug = ?1"),
            [slug],
            row_to_app,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                what: format!("app slug {slug}"),
            },
            e => StoreError::Database(e),
        })
    }

    #[instrument(skip(self, license_payload), fields(slug))]
    fn create_app(
        &self,
        slug: &str,
        name: &str,
        update_check_spec: &str,
        is_airgap: bool,
        license_payload: &str,
    ) -> Result<App> {
        let now = Utc::now().to_rfc3339();
        let app_id = AppId::new();
        let license_id = Uuid::now_v7().to_string();

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO apps
             (id, slug, name, update_check_spec, is_airgap, current_sequence,
              license_id, last_update_check_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, -1, ?6, NULL, ?7, ?7)",
            rusqlite::params![
                app_id.as_str(),
                slug,
                name,
                update_check_spec,
                is_airgap as i64,
                license_id,
                now
            ],
        )?;
        db.execute(
            "INSERT INTO licenses (id, app_id, payload, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![license_id, app_id.as_str(), license_payload, now],
        )?;
        debug!(app_id = %app_id, slug, "app created");

        Ok(App {
            id: app_id,
            slug: slug.to_string(),
            name: name.to_string(),
            update_check_spec: update_check_spec.to_string(),
            is_airgap,
            current_sequence: -1,
            license_id,
            last_update_check_at: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    #[instrument(skip(self), fields(app_id = %app_id, spec))]
    fn set_update_check_spec(&self, app_id: &AppId, spec: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE apps SET update_check_spec = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![spec, now, app_id.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                what: format!("app {app_id}"),
            });
        }
        Ok(())
    }

    fn set_last_update_check_at(&self, app_id: &AppId, when: DateTime<Utc>) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE apps SET last_update_check_at = ?1 WHERE id = ?2",
            rusqlite::params![when.to_rfc3339(), app_id.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                what: format!("app {app_id}"),
            });
        }
        Ok(())
    }

    fn list_versions(&self, app_id: &AppId) -> Result<Vec<AppVersion>> {
        let db = self.db.lock().unwrap();
        let mut stmt =
            db.prepare(&format!("{VERSION_SELECT_SQL} WHERE app_id = ?1 ORDER BY sequence"))?;
        let rows = stmt
            .query_map([app_id.as_str()], row_to_version)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(parse_version).collect()
    }

    fn get_version(&self, app_id: &AppId, sequence: i64) -> Result<AppVersion> {
        let db = self.db.lock().unwrap();
        let raw = db
            .query_row(
                &format!("{VERSION_SELECT_SQL} WHERE app_id = ?1 AND sequence = ?2"),
                rusqlite::params![app_id.as_str(), sequence],
                row_to_version,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                    what: format!("version {sequence} of app {app_id}"),
                },
                e => StoreError::Database(e),
            })?;
        parse_version(raw)
    }

    #[instrument(skip(self, staging_dir), fields(app_id = %app_id, source = %source))]
    fn create_version(
        &self,
        app_id: &AppId,
        source: VersionSource,
        version_label: &str,
        staging_dir: &Path,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();

        // Sequence assignment, archive copy, and the version row are one
        // critical section: a concurrent create_version for the same app
        // must observe the advanced max(sequence).
        let db = self.db.lock().unwrap();
        let sequence: i64 = db.query_row(
            "SELECT COALESCE(MAX(sequence), -1) + 1 FROM app_versions WHERE app_id = ?1",
            [app_id.as_str()],
            |row| row.get(0),
        )?;

        let durable = self.durable_dir(app_id, sequence);
        replace_dir(staging_dir, &durable)?;

        db.execute(
            "INSERT INTO app_versions
             (app_id, sequence, source, version_label, archive_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                app_id.as_str(),
                sequence,
                source.to_string(),
                version_label,
                durable.to_string_lossy(),
                now
            ],
        )?;
        db.execute(
            "UPDATE apps SET current_sequence = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![sequence, now, app_id.as_str()],
        )?;

        debug!(app_id = %app_id, sequence, "version created");
        Ok(sequence)
    }

    fn get_version_archive(&self, app_id: &AppId, sequence: i64, dest: &Path) -> Result<()> {
        let version = self.get_version(app_id, sequence)?;
        let src = PathBuf::from(&version.archive_path);
        if !src.is_dir() {
            return Err(StoreError::NotFound {
                what: format!("archive for version {sequence} of app {app_id}"),
            });
        }
        copy_dir_all(&src, dest)
    }

    fn list_downstreams(&self, app_id: &AppId) -> Result<Vec<Downstream>> {
        let db = self.db.lock().unwrap();
        // Stable order: the first row is the primary target.
        let mut stmt = db.prepare(
            "SELECT app_id, cluster_id, name, current_parent_sequence
             FROM downstreams WHERE app_id = ?1 ORDER BY created_at, cluster_id",
        )?;
        let rows = stmt
            .query_map([app_id.as_str()], row_to_downstream)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    #[instrument(skip(self), fields(app_id = %app_id, cluster_id = %cluster_id))]
    fn create_downstream(&self, app_id: &AppId, cluster_id: &ClusterId, name: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO downstreams (app_id, cluster_id, name, current_parent_sequence, created_at)
             VALUES (?1, ?2, ?3, NULL, ?4)",
            rusqlite::params![app_id.as_str(), cluster_id.as_str(), name, now],
        )?;
        Ok(())
    }

    fn current_parent_sequence(
        &self,
        app_id: &AppId,
        cluster_id: &ClusterId,
    ) -> Result<Option<i64>> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT current_parent_sequence FROM downstreams
             WHERE app_id = ?1 AND cluster_id = ?2",
            rusqlite::params![app_id.as_str(), cluster_id.as_str()],
            |row| row.get(0),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                what: format!("downstream {cluster_id} of app {app_id}"),
            },
            e => StoreError::Database(e),
        })
    }

    #[instrument(skip(self), fields(app_id = %app_id, cluster_id = %cluster_id, sequence))]
    fn set_parent_sequence(
        &self,
        app_id: &AppId,
        cluster_id: &ClusterId,
        sequence: i64,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE downstreams SET current_parent_sequence = ?1
             WHERE app_id = ?2 AND cluster_id = ?3",
            rusqlite::params![sequence, app_id.as_str(), cluster_id.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                what: format!("downstream {cluster_id} of app {app_id}"),
            });
        }
        Ok(())
    }

    fn get_task_status(&self, name: &str) -> Result<Option<TaskStatus>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT status, message, updated_at FROM task_status WHERE name = ?1",
            [name],
            |row| {
                Ok(TaskStatus {
                    status: row.get(0)?,
                    message: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            },
        ) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    #[instrument(skip(self), fields(name, status))]
    fn set_task_status(&self, name: &str, message: &str, status: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO task_status (name, status, message, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (name) DO UPDATE SET
               status = excluded.status,
               message = excluded.message,
               updated_at = excluded.updated_at",
            rusqlite::params![name, status, message, now],
        )?;
        Ok(())
    }

    #[instrument(skip(self), fields(name))]
    fn clear_task_status(&self, name: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM task_status WHERE name = ?1", [name])?;
        Ok(())
    }

    fn latest_license(&self, app_id: &AppId) -> Result<License> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, app_id, payload, updated_at FROM licenses
             WHERE app_id = ?1 ORDER BY updated_at DESC LIMIT 1",
            [app_id.as_str()],
            |row| {
                Ok(License {
                    id: row.get(0)?,
                    app_id: AppId(row.get(1)?),
                    payload: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                what: format!("license for app {app_id}"),
            },
            e => StoreError::Database(e),
        })
    }

    #[instrument(skip(self, license), fields(license_id = %license.id))]
    fn put_license(&self, license: &License) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO licenses (id, app_id, payload, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (id) DO UPDATE SET
               payload = excluded.payload,
               updated_at = excluded.updated_at",
            rusqlite::params![
                license.id,
                license.app_id.as_str(),
                license.payload,
                license.updated_at
            ],
        )?;
        Ok(())
    }

    fn get_downstream_output(
        &self,
        app_id: &AppId,
        cluster_id: &ClusterId,
        sequence: i64,
    ) -> Result<DownstreamOutput> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT dryrun_stdout, dryrun_stderr, apply_stdout, apply_stderr, render_error
             FROM downstream_output
             WHERE app_id = ?1 AND cluster_id = ?2 AND sequence = ?3",
            rusqlite::params![app_id.as_str(), cluster_id.as_str(), sequence],
            |row| {
                Ok(DownstreamOutput {
                    dryrun_stdout: row.get(0)?,
                    dryrun_stderr: row.get(1)?,
                    apply_stdout: row.get(2)?,
                    apply_stderr: row.get(3)?,
                    render_error: row.get(4)?,
                })
            },
        ) {
            Ok(output) => Ok(output),
            // No output captured yet is not an error — the UI polls early.
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(DownstreamOutput::default()),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    #[instrument(skip(self, output), fields(app_id = %app_id, cluster_id = %cluster_id, sequence))]
    fn put_downstream_output(
        &self,
        app_id: &AppId,
        cluster_id: &ClusterId,
        sequence: i64,
        output: &DownstreamOutput,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO downstream_output
             (app_id, cluster_id, sequence, dryrun_stdout, dryrun_stderr,
              apply_stdout, apply_stderr, render_error, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (app_id, cluster_id, sequence) DO UPDATE SET
               dryrun_stdout = excluded.dryrun_stdout,
               dryrun_stderr = excluded.dryrun_stderr,
               apply_stdout = excluded.apply_stdout,
               apply_stderr = excluded.apply_stderr,
               render_error = excluded.render_error,
               updated_at = excluded.updated_at",
            rusqlite::params![
                app_id.as_str(),
                cluster_id.as_str(),
                sequence,
                output.dryrun_stdout,
                output.dryrun_stderr,
                output.apply_stdout,
                output.apply_stderr,
                output.render_error,
                now
            ],
        )?;
        Ok(())
    }
}
