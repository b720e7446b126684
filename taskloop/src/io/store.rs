//! SQLite-backed task store and conversation history.
//!
//! Every mutation is a single SQL statement, so readers never observe a
//! half-applied update. The connection sits behind a mutex so the shutdown
//! handler can close it from another thread.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};

use crate::core::types::{ConversationTurn, NewTask, Role, Task, TaskId, TaskStatus, TaskType};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  description TEXT NOT NULL,
  command TEXT,
  type TEXT NOT NULL DEFAULT 'shell' CHECK (type IN (
    'shell', 'node', 'write_file', 'append_file', 'spawn_child_process',
    'retrieve_child_process', 'close_child_process', 'list_files',
    'read_file', 'delete_file'
  )),
  status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN (
    'pending', 'in_progress', 'completed', 'failed'
  )),
  output TEXT NOT NULL DEFAULT '',
  error TEXT NOT NULL DEFAULT '',
  retries INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);

CREATE TABLE IF NOT EXISTS conversation_turns (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  role TEXT NOT NULL CHECK (role IN ('user', 'model')),
  message TEXT NOT NULL
);
"#;

const TASK_COLUMNS: &str = "id, description, command, type, status, output, error, retries";

/// Fields written by a status transition. `None` leaves the column unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskUpdate {
    pub status: TaskStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub retries: Option<u32>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status,
            output: None,
            error: None,
            retries: None,
        }
    }
}

pub struct TaskStore {
    conn: Mutex<Option<Connection>>,
}

impl TaskStore {
    /// Open (or create) the store file and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "opening task store");
        let conn = Connection::open(path)
            .with_context(|| format!("open task store {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("configure busy timeout")?;
        Self::init(conn)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory task store")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).context("apply task store schema")?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("task store mutex poisoned"))
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn()?;
        let conn = guard.as_ref().ok_or_else(|| anyhow!("task store is closed"))?;
        f(conn)
    }

    /// Insert a new `pending` task and return it with its assigned id.
    pub fn enqueue(&self, task: &NewTask) -> Result<Task> {
        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (description, command, type) VALUES (?1, ?2, ?3)",
                params![task.description, task.command, task.kind.as_str()],
            )
            .context("insert task")?;
            Ok(conn.last_insert_rowid())
        })?;
        debug!(task_id = id, kind = %task.kind, "task enqueued");
        Ok(Task {
            id,
            description: task.description.clone(),
            command: task.command.clone(),
            kind: task.kind,
            status: TaskStatus::Pending,
            output: String::new(),
            error: String::new(),
            retries: 0,
        })
    }

    /// Lowest-id task with `status = pending`.
    pub fn next_pending(&self) -> Result<Option<Task>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE status = 'pending' ORDER BY id ASC LIMIT 1"
                ),
                [],
                row_to_task,
            )
            .optional()
            .context("select next pending task")
        })
    }

    pub fn get(&self, id: TaskId) -> Result<Option<Task>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                row_to_task,
            )
            .optional()
            .with_context(|| format!("select task {id}"))
        })
    }

    /// All tasks in id order.
    pub fn list(&self) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY id ASC"))
                .context("prepare task listing")?;
            let rows = stmt.query_map([], row_to_task).context("list tasks")?;
            let mut tasks = Vec::new();
            for task in rows {
                tasks.push(task.context("read task row")?);
            }
            Ok(tasks)
        })
    }

    /// Apply one status transition in a single statement.
    pub fn update_status(&self, id: TaskId, update: &TaskUpdate) -> Result<()> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET status = ?1, \
                   output = COALESCE(?2, output), \
                   error = COALESCE(?3, error), \
                   retries = COALESCE(?4, retries) \
                 WHERE id = ?5",
                params![
                    update.status.as_str(),
                    update.output,
                    update.error,
                    update.retries,
                    id
                ],
            )
            .with_context(|| format!("update task {id}"))
        })?;
        if changed == 0 {
            return Err(anyhow!("task {id} not found"));
        }
        debug!(task_id = id, status = %update.status, "task status updated");
        Ok(())
    }

    pub fn append_history(&self, role: Role, message: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversation_turns (role, message) VALUES (?1, ?2)",
                params![role.as_str(), message],
            )
            .context("insert conversation turn")?;
            Ok(())
        })
    }

    pub fn history(&self) -> Result<Vec<ConversationTurn>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT role, message FROM conversation_turns ORDER BY id ASC")
                .context("prepare history query")?;
            let rows = stmt
                .query_map([], |row| {
                    let role: String = row.get(0)?;
                    let message: String = row.get(1)?;
                    Ok((role, message))
                })
                .context("query history")?;
            let mut turns = Vec::new();
            for row in rows {
                let (role, message) = row.context("read history row")?;
                let role = role.parse::<Role>().map_err(|err| anyhow!(err))?;
                turns.push(ConversationTurn { role, message });
            }
            Ok(turns)
        })
    }

    /// Number of tasks still `pending` or `in_progress`.
    pub fn pending_or_in_progress_count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM tasks WHERE status IN ('pending', 'in_progress')",
                    [],
                    |row| row.get(0),
                )
                .context("count open tasks")?;
            Ok(u64::try_from(count).unwrap_or_default())
        })
    }

    /// Return tasks left `in_progress` by an interrupted run to `pending`.
    pub fn requeue_in_progress(&self) -> Result<usize> {
        let requeued = self.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET status = 'pending' WHERE status = 'in_progress'",
                [],
            )
            .context("requeue in-progress tasks")
        })?;
        if requeued > 0 {
            info!(requeued, "requeued tasks interrupted by a previous run");
        }
        Ok(requeued)
    }

    /// Close the underlying connection. Later calls report a closed store.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.conn()?;
        if let Some(conn) = guard.take() {
            conn.close()
                .map_err(|(_, err)| err)
                .context("close task store")?;
            debug!("task store closed");
        }
        Ok(())
    }
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let kind: String = row.get(3)?;
    let status: String = row.get(4)?;
    let retries: i64 = row.get(7)?;
    Ok(Task {
        id: row.get(0)?,
        description: row.get(1)?,
        command: row.get(2)?,
        kind: kind.parse::<TaskType>().map_err(|err| invalid_column(3, err))?,
        status: status
            .parse::<TaskStatus>()
            .map_err(|err| invalid_column(4, err))?,
        output: row.get(5)?,
        error: row.get(6)?,
        retries: u32::try_from(retries).unwrap_or_default(),
    })
}

fn invalid_column(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        Box::<dyn std::error::Error + Send + Sync>::from(message),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_task(description: &str, kind: TaskType, command: Option<&str>) -> NewTask {
        NewTask {
            description: description.to_string(),
            command: command.map(str::to_string),
            kind,
        }
    }

    #[test]
    fn dequeue_follows_ascending_id() {
        let store = TaskStore::in_memory().expect("store");
        let a = store
            .enqueue(&new_task("a", TaskType::Shell, Some("echo a")))
            .expect("a");
        let b = store
            .enqueue(&new_task("b", TaskType::Shell, Some("echo b")))
            .expect("b");
        let c = store
            .enqueue(&new_task("c", TaskType::Shell, Some("echo c")))
            .expect("c");
        assert!(a.id < b.id && b.id < c.id);

        store
            .update_status(a.id, &TaskUpdate::status(TaskStatus::Completed))
            .expect("complete a");
        assert_eq!(store.next_pending().expect("next").map(|t| t.id), Some(b.id));

        // A retried task keeps its place ahead of later ids.
        store
            .update_status(b.id, &TaskUpdate::status(TaskStatus::InProgress))
            .expect("start b");
        assert_eq!(store.next_pending().expect("next").map(|t| t.id), Some(c.id));
        store
            .update_status(
                b.id,
                &TaskUpdate {
                    retries: Some(1),
                    ..TaskUpdate::status(TaskStatus::Pending)
                },
            )
            .expect("retry b");
        let next = store.next_pending().expect("next").expect("task");
        assert_eq!(next.id, b.id);
        assert_eq!(next.retries, 1);
    }

    #[test]
    fn update_keeps_unspecified_columns() {
        let store = TaskStore::in_memory().expect("store");
        let task = store
            .enqueue(&new_task("run", TaskType::Node, Some("app.js")))
            .expect("enqueue");
        store
            .update_status(
                task.id,
                &TaskUpdate {
                    output: Some("out".to_string()),
                    error: Some("err".to_string()),
                    ..TaskUpdate::status(TaskStatus::Completed)
                },
            )
            .expect("complete");
        store
            .update_status(
                task.id,
                &TaskUpdate {
                    error: Some("boom".to_string()),
                    ..TaskUpdate::status(TaskStatus::Failed)
                },
            )
            .expect("fail");

        let stored = store.get(task.id).expect("get").expect("task");
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.output, "out");
        assert_eq!(stored.error, "boom");
        assert_eq!(stored.kind, TaskType::Node);
    }

    #[test]
    fn update_of_missing_task_errors() {
        let store = TaskStore::in_memory().expect("store");
        let err = store
            .update_status(42, &TaskUpdate::status(TaskStatus::Completed))
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn counts_open_tasks_and_requeues_in_progress() {
        let store = TaskStore::in_memory().expect("store");
        let a = store.enqueue(&new_task("a", TaskType::Shell, None)).expect("a");
        let b = store.enqueue(&new_task("b", TaskType::Shell, None)).expect("b");
        store
            .update_status(a.id, &TaskUpdate::status(TaskStatus::InProgress))
            .expect("start");
        store
            .update_status(b.id, &TaskUpdate::status(TaskStatus::Failed))
            .expect("fail");
        assert_eq!(store.pending_or_in_progress_count().expect("count"), 1);

        assert_eq!(store.requeue_in_progress().expect("requeue"), 1);
        let next = store.next_pending().expect("next").expect("task");
        assert_eq!(next.id, a.id);
    }

    #[test]
    fn history_is_append_only_and_ordered() {
        let store = TaskStore::in_memory().expect("store");
        store.append_history(Role::User, "build a thing").expect("u");
        store.append_history(Role::Model, "1. step").expect("m");
        let turns = store.history().expect("history");
        assert_eq!(
            turns,
            vec![
                ConversationTurn::user("build a thing"),
                ConversationTurn::model("1. step")
            ]
        );
    }

    #[test]
    fn closed_store_reports_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = TaskStore::open(&temp.path().join("tasks.db")).expect("open");
        store.close().expect("close");
        assert!(store.next_pending().is_err());
        store.close().expect("second close is a no-op");
    }

    #[test]
    fn tasks_persist_across_reopen() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.db");
        {
            let store = TaskStore::open(&path).expect("open");
            store
                .enqueue(&new_task("persist", TaskType::WriteFile, Some("a.txt||x")))
                .expect("enqueue");
            store.close().expect("close");
        }
        let store = TaskStore::open(&path).expect("reopen");
        let tasks = store.list().expect("list");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].kind, TaskType::WriteFile);
    }
}
