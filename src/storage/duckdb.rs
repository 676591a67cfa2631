use super::lock::LockToken;
use super::traits::{EventStore, JobLock, ReferenceStore, SettingsStore, StorageError};
use crate::export::targets::AllowedTargetSet;
use crate::record::{ContextLevel, CourseRef, LogRecord, ModuleRef, UserRef};
use async_trait::async_trait;
use chrono::Utc;
use duckdb::types::Value;
use duckdb::Connection;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Check if a process with the given PID is still running
fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use std::process::Command;
        Command::new("ps")
            .arg("-p")
            .arg(pid.to_string())
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        // On non-Unix systems, assume process is running to be safe
        true
    }
}

/// Extract PID from DuckDB lock error message
fn extract_pid_from_lock_error(error_msg: &str) -> Option<u32> {
    // Error format: "... (PID 12345) ..."
    let start = error_msg.find("(PID ")? + 5;
    let end = error_msg[start..].find(')')?;
    error_msg[start..start + end].parse().ok()
}

/// Describe a lock conflict on open, naming the holder when DuckDB reports it.
fn lock_conflict_message(db_path: &Path, error_msg: &str) -> Option<String> {
    if !error_msg.contains("Could not set lock") {
        return None;
    }

    let holder = match extract_pid_from_lock_error(error_msg) {
        Some(pid) if is_process_running(pid) => format!("PID {} is still running", pid),
        Some(pid) => format!("PID {} no longer runs, retry once its lock is released", pid),
        None => "holder unknown".to_string(),
    };
    Some(format!(
        "database '{}' is locked ({}): {}",
        db_path.display(),
        holder,
        error_msg
    ))
}

fn lock_conn(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StorageError> {
    conn.lock()
        .map_err(|_| StorageError::Generic("connection mutex poisoned".to_string()))
}

fn join_error(e: tokio::task::JoinError) -> StorageError {
    StorageError::Database(format!("Task join error: {}", e))
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Event log, reference data, settings and job locks in one DuckDB database.
pub struct DuckDbStorage {
    conn: Arc<Mutex<Connection>>,
    site_url: Option<String>,
}

impl DuckDbStorage {
    /// Open (or create) the database file at `path`.
    ///
    /// Nothing beside the database file is ever removed. A lock conflict is
    /// reported with the holder's PID.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Generic(format!(
                        "failed to create storage directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        // The WAL beside the file holds committed writes; DuckDB replays it here
        match Connection::open(path) {
            Ok(conn) => Ok(Self::from_connection(conn)),
            Err(e) => match lock_conflict_message(path, &e.to_string()) {
                Some(message) => {
                    tracing::error!("{}", message);
                    Err(StorageError::Database(message))
                }
                None => Err(e.into()),
            },
        }
    }

    /// Create an in-memory DuckDB storage instance (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            site_url: None,
        }
    }

    /// Base URL used to build activity links in module lookups.
    pub fn with_site_url(mut self, site_url: Option<String>) -> Self {
        self.site_url = site_url.map(|url| url.trim_end_matches('/').to_string());
        self
    }

    pub async fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn)?;

            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS logstore_standard_log (
                    id BIGINT PRIMARY KEY,
                    eventname VARCHAR NOT NULL,
                    component VARCHAR NOT NULL,
                    action VARCHAR NOT NULL,
                    target VARCHAR NOT NULL,
                    crud VARCHAR NOT NULL,
                    edulevel BIGINT NOT NULL,
                    contextid BIGINT NOT NULL,
                    contextlevel BIGINT NOT NULL,
                    contextinstanceid BIGINT NOT NULL,
                    userid BIGINT,
                    courseid BIGINT,
                    relateduserid BIGINT,
                    timecreated BIGINT NOT NULL,
                    extra VARCHAR
                );
                CREATE INDEX IF NOT EXISTS idx_log_target ON logstore_standard_log(target);

                CREATE TABLE IF NOT EXISTS users (
                    id BIGINT PRIMARY KEY,
                    email VARCHAR NOT NULL,
                    username VARCHAR NOT NULL
                );

                CREATE TABLE IF NOT EXISTS courses (
                    id BIGINT PRIMARY KEY,
                    fullname VARCHAR NOT NULL,
                    summary VARCHAR NOT NULL
                );

                CREATE TABLE IF NOT EXISTS course_modules (
                    id BIGINT PRIMARY KEY,
                    course BIGINT NOT NULL,
                    modname VARCHAR NOT NULL,
                    instance BIGINT NOT NULL,
                    deletioninprogress BOOLEAN NOT NULL DEFAULT FALSE
                );
                CREATE INDEX IF NOT EXISTS idx_course_modules_course ON course_modules(course);

                CREATE TABLE IF NOT EXISTS activities (
                    modname VARCHAR NOT NULL,
                    id BIGINT NOT NULL,
                    name VARCHAR NOT NULL,
                    intro VARCHAR NOT NULL,
                    PRIMARY KEY (modname, id)
                );

                CREATE TABLE IF NOT EXISTS settings (
                    name VARCHAR PRIMARY KEY,
                    value VARCHAR NOT NULL
                );

                CREATE TABLE IF NOT EXISTS locks (
                    resource VARCHAR PRIMARY KEY,
                    owner VARCHAR NOT NULL,
                    expires_at BIGINT NOT NULL
                );",
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    pub async fn write_logs(&self, logs: &[LogRecord]) -> Result<(), StorageError> {
        if logs.is_empty() {
            return Ok(());
        }

        let conn = self.conn.clone();
        let logs = logs.to_vec();

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn)?;
            let mut stmt = conn.prepare(
                "INSERT INTO logstore_standard_log (id, eventname, component, action, target, crud, edulevel,
                     contextid, contextlevel, contextinstanceid, userid, courseid, relateduserid, timecreated, extra)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;

            for log in logs {
                let extra = serde_json::to_string(&log.extra)?;
                stmt.execute(duckdb::params![
                    log.id,
                    log.event_name,
                    log.component,
                    log.action,
                    log.target,
                    log.crud,
                    log.edu_level,
                    log.context_id,
                    log.context_level.code(),
                    log.context_instance_id,
                    log.user_id,
                    log.course_id,
                    log.related_user_id,
                    log.time_created,
                    extra,
                ])?;
            }

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    pub async fn write_users(&self, users: &[UserRef]) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let users = users.to_vec();

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn)?;
            let mut stmt = conn
                .prepare("INSERT OR REPLACE INTO users (id, email, username) VALUES (?, ?, ?)")?;
            for user in users {
                stmt.execute(duckdb::params![user.id, user.email, user.username])?;
            }
            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    pub async fn write_courses(&self, courses: &[CourseRef]) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let courses = courses.to_vec();

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn)?;
            let mut stmt = conn.prepare(
                "INSERT OR REPLACE INTO courses (id, fullname, summary) VALUES (?, ?, ?)",
            )?;
            for course in courses {
                stmt.execute(duckdb::params![course.id, course.fullname, course.summary])?;
            }
            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    /// Register a course module together with its activity instance.
    pub async fn write_course_module(
        &self,
        course_id: i64,
        module: &ModuleRef,
        instance: i64,
    ) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let module = module.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO course_modules (id, course, modname, instance, deletioninprogress)
                 VALUES (?, ?, ?, ?, FALSE)",
                duckdb::params![module.cmid, course_id, module.modname, instance],
            )?;
            conn.execute(
                "INSERT OR REPLACE INTO activities (modname, id, name, intro) VALUES (?, ?, ?, ?)",
                duckdb::params![module.modname, instance, module.name, module.intro],
            )?;
            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    pub async fn delete_course_module(&self, cmid: i64) -> Result<(), StorageError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn)?;
            conn.execute("DELETE FROM course_modules WHERE id = ?", duckdb::params![cmid])?;
            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }
}

fn conversion_error(idx: usize, err: serde_json::Error) -> duckdb::Error {
    duckdb::Error::FromSqlConversionFailure(idx, duckdb::types::Type::Text, Box::new(err))
}

fn row_to_log(row: &duckdb::Row<'_>) -> duckdb::Result<LogRecord> {
    let extra: Option<String> = row.get(14)?;
    let extra = match extra {
        Some(json) if !json.is_empty() => {
            serde_json::from_str::<BTreeMap<String, serde_json::Value>>(&json)
                .map_err(|e| conversion_error(14, e))?
        }
        _ => BTreeMap::new(),
    };

    let mut log = LogRecord {
        id: row.get(0)?,
        event_name: row.get(1)?,
        component: row.get(2)?,
        action: row.get(3)?,
        target: row.get(4)?,
        crud: row.get(5)?,
        edu_level: row.get(6)?,
        context_id: row.get(7)?,
        context_level: ContextLevel::from(row.get::<_, i64>(8)?),
        context_instance_id: row.get(9)?,
        user_id: row.get(10)?,
        course_id: row.get(11)?,
        related_user_id: row.get(12)?,
        time_created: row.get(13)?,
        extra,
    };

    let dropped = log.drop_shadowing_extra();
    if !dropped.is_empty() {
        tracing::debug!(id = log.id, ?dropped, "Dropped opaque columns that shadow typed fields");
    }
    Ok(log)
}

#[async_trait]
impl EventStore for DuckDbStorage {
    async fn fetch_after(
        &self,
        after: i64,
        limit: usize,
        targets: &AllowedTargetSet,
    ) -> Result<Vec<LogRecord>, StorageError> {
        let mut sql = String::from(
            "SELECT id, eventname, component, action, target, crud, edulevel, contextid, contextlevel,
                    contextinstanceid, userid, courseid, relateduserid, timecreated, extra
             FROM logstore_standard_log
             WHERE id > ? AND userid IS NOT NULL AND userid <> 0",
        );
        let mut params = vec![Value::BigInt(after)];

        // An empty set never restricts
        if let AllowedTargetSet::Only(allowed) = targets {
            if !allowed.is_empty() {
                sql.push_str(&format!(" AND target IN ({})", placeholders(allowed.len())));
                params.extend(allowed.iter().cloned().map(Value::Text));
            }
        }

        sql.push_str(" ORDER BY id ASC LIMIT ?");
        params.push(Value::BigInt(limit as i64));

        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn)?;
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(duckdb::params_from_iter(params), row_to_log)?;

            let mut logs = Vec::new();
            for row in rows {
                logs.push(row?);
            }
            Ok(logs)
        })
        .await
        .map_err(join_error)?
    }

    async fn distinct_targets(&self) -> Result<Vec<String>, StorageError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn)?;
            let mut stmt = conn
                .prepare("SELECT DISTINCT target FROM logstore_standard_log ORDER BY target")?;

            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

            let mut targets = Vec::new();
            for row in rows {
                targets.push(row?);
            }
            Ok(targets)
        })
        .await
        .map_err(join_error)?
    }
}

#[async_trait]
impl ReferenceStore for DuckDbStorage {
    async fn users(&self, ids: &[i64]) -> Result<HashMap<i64, UserRef>, StorageError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.conn.clone();
        let sql = format!(
            "SELECT id, email, username FROM users WHERE id IN ({})",
            placeholders(ids.len())
        );
        let params: Vec<Value> = ids.iter().copied().map(Value::BigInt).collect();

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn)?;
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(duckdb::params_from_iter(params), |row| {
                Ok(UserRef {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    username: row.get(2)?,
                })
            })?;

            let mut users = HashMap::new();
            for row in rows {
                let user = row?;
                users.insert(user.id, user);
            }
            Ok(users)
        })
        .await
        .map_err(join_error)?
    }

    async fn courses(&self, ids: &[i64]) -> Result<HashMap<i64, CourseRef>, StorageError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.conn.clone();
        let sql = format!(
            "SELECT id, fullname, summary FROM courses WHERE id IN ({})",
            placeholders(ids.len())
        );
        let params: Vec<Value> = ids.iter().copied().map(Value::BigInt).collect();

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn)?;
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(duckdb::params_from_iter(params), |row| {
                Ok(CourseRef {
                    id: row.get(0)?,
                    fullname: row.get(1)?,
                    summary: row.get(2)?,
                })
            })?;

            let mut courses = HashMap::new();
            for row in rows {
                let course = row?;
                courses.insert(course.id, course);
            }
            Ok(courses)
        })
        .await
        .map_err(join_error)?
    }

    async fn module_index(&self, course_id: i64) -> Result<HashMap<i64, ModuleRef>, StorageError> {
        let conn = self.conn.clone();
        let site_url = self.site_url.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT cm.id, cm.modname, a.name, a.intro
                 FROM course_modules cm
                 INNER JOIN activities a ON a.modname = cm.modname AND a.id = cm.instance
                 WHERE cm.course = ? AND NOT cm.deletioninprogress",
            )?;

            let rows = stmt.query_map(duckdb::params![course_id], |row| {
                let cmid: i64 = row.get(0)?;
                let modname: String = row.get(1)?;
                let url = site_url
                    .as_ref()
                    .map(|base| format!("{}/mod/{}/view.php?id={}", base, modname, cmid));

                Ok(ModuleRef {
                    cmid,
                    modname,
                    name: row.get(2)?,
                    intro: row.get(3)?,
                    url,
                })
            })?;

            let mut modules = HashMap::new();
            for row in rows {
                let module = row?;
                modules.insert(module.cmid, module);
            }
            Ok(modules)
        })
        .await
        .map_err(join_error)?
    }
}

#[async_trait]
impl SettingsStore for DuckDbStorage {
    async fn get_setting(&self, name: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn.clone();
        let name = name.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn)?;
            let mut stmt = conn.prepare("SELECT value FROM settings WHERE name = ?")?;
            let mut rows = stmt.query(duckdb::params![name])?;

            if let Some(row) = rows.next()? {
                Ok(Some(row.get::<_, String>(0)?))
            } else {
                Ok(None)
            }
        })
        .await
        .map_err(join_error)?
    }

    async fn set_setting(&self, name: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let name = name.to_string();
        let value = value.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO settings (name, value) VALUES (?, ?)",
                duckdb::params![name, value],
            )?;
            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    async fn list_settings(&self) -> Result<Vec<(String, String)>, StorageError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn)?;
            let mut stmt = conn.prepare("SELECT name, value FROM settings ORDER BY name")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut settings = Vec::new();
            for row in rows {
                settings.push(row?);
            }
            Ok(settings)
        })
        .await
        .map_err(join_error)?
    }
}

#[async_trait]
impl JobLock for DuckDbStorage {
    async fn try_acquire(
        &self,
        resource: &str,
        ttl: Duration,
    ) -> Result<Option<LockToken>, StorageError> {
        let conn = self.conn.clone();
        let token = LockToken::new(resource);
        let ttl_micros = i64::try_from(ttl.as_micros()).unwrap_or(i64::MAX);

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn)?;
            let now = Utc::now().timestamp_micros();

            // Expired holders are reclaimable
            conn.execute(
                "DELETE FROM locks WHERE resource = ? AND expires_at <= ?",
                duckdb::params![token.resource, now],
            )?;

            let held: i64 = conn.query_row(
                "SELECT count(*) FROM locks WHERE resource = ?",
                duckdb::params![token.resource],
                |row| row.get(0),
            )?;
            if held > 0 {
                return Ok(None);
            }

            conn.execute(
                "INSERT INTO locks (resource, owner, expires_at) VALUES (?, ?, ?)",
                duckdb::params![token.resource, token.owner, now.saturating_add(ttl_micros)],
            )?;
            Ok(Some(token))
        })
        .await
        .map_err(join_error)?
    }

    async fn release(&self, token: &LockToken) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let token = token.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn)?;
            conn.execute(
                "DELETE FROM locks WHERE resource = ? AND owner = ?",
                duckdb::params![token.resource, token.owner],
            )?;
            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }
}
