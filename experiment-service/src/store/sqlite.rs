use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::store::models::{
    ParamSetExecution, RunRecord, RunStatus, SpaceExecution, TaskCounts, TaskExecution, TaskKey,
    TaskUpdate, UnitStatus,
};
use crate::store::{StateStore, StoreError};

use async_trait::async_trait;

/// Child tables of `runs`, deleted before the run row itself
const CHILD_TABLES: [&str; 5] = [
    "data_mappings",
    "task_executions",
    "param_set_executions",
    "space_executions",
    "control_state",
];

/// SQLite-based store implementation.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `url` and apply migrations.
    ///
    /// `sqlite::memory:` is supported; the pool is then pinned to a single
    /// connection that is never recycled, since every connection would
    /// otherwise see its own empty database.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let in_memory = url.contains(":memory:");
        if !in_memory {
            if let Some(parent) = options.get_filename().parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| StoreError::Backend(e.to_string()))?;
                }
            }
        }

        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(4)
                .connect_with(options)
                .await?
        };

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn parse_status<T: FromStr<Err = String>>(raw: &str) -> Result<T, StoreError> {
    raw.parse().map_err(StoreError::Corrupt)
}

fn index_of(row: &SqliteRow) -> Result<usize, StoreError> {
    let raw: i64 = row.try_get("param_set_index")?;
    usize::try_from(raw).map_err(|_| StoreError::Corrupt(format!("negative index {}", raw)))
}

fn run_from_row(row: &SqliteRow) -> Result<RunRecord, StoreError> {
    let status: String = row.try_get("status")?;
    let current_param_set: Option<i64> = row.try_get("current_param_set")?;
    Ok(RunRecord {
        id: row.try_get("id")?,
        experiment_name: row.try_get("experiment_name")?,
        experiment_version: row.try_get("experiment_version")?,
        artifact_path: row.try_get("artifact_path")?,
        artifact_hash: row.try_get("artifact_hash")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        status: parse_status(&status)?,
        current_space: row.try_get("current_space")?,
        current_param_set: current_param_set.map(|i| i as usize),
    })
}

const RUN_COLUMNS: &str = "id, experiment_name, experiment_version, artifact_path, artifact_hash, \
     start_time, end_time, status, current_space, current_param_set";

#[async_trait]
impl StateStore for SqliteStore {
    async fn create_run(&self, run: &RunRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO runs (id, experiment_name, experiment_version, artifact_path, artifact_hash,
                              start_time, end_time, status, current_space, current_param_set)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.experiment_name)
        .bind(&run.experiment_version)
        .bind(&run.artifact_path)
        .bind(&run.artifact_hash)
        .bind(run.start_time)
        .bind(run.end_time)
        .bind(run.status.as_str())
        .bind(&run.current_space)
        .bind(run.current_param_set.map(|i| i as i64))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Conflict(format!(
                    "run for {}@{} already exists",
                    run.experiment_name, run.experiment_version
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, StoreError> {
        let sql = format!("SELECT {} FROM runs WHERE id = ?", RUN_COLUMNS);
        sqlx::query(&sql)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| run_from_row(&row))
            .transpose()
    }

    async fn find_run(
        &self,
        experiment_name: &str,
        experiment_version: &str,
    ) -> Result<Option<RunRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM runs WHERE experiment_name = ? AND experiment_version = ?",
            RUN_COLUMNS
        );
        sqlx::query(&sql)
            .bind(experiment_name)
            .bind(experiment_version)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| run_from_row(&row))
            .transpose()
    }

    async fn update_run_status(&self, run_id: &str, status: RunStatus) -> Result<(), StoreError> {
        let end_time: Option<DateTime<Utc>> = status.is_terminal().then(Utc::now);
        let result = sqlx::query("UPDATE runs SET status = ?, end_time = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(end_time)
            .bind(run_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("run {}", run_id)));
        }
        Ok(())
    }

    async fn update_run_position(
        &self,
        run_id: &str,
        current_space: Option<&str>,
        current_param_set: Option<usize>,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE runs SET current_space = ?, current_param_set = ? WHERE id = ?")
                .bind(current_space)
                .bind(current_param_set.map(|i| i as i64))
                .bind(run_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("run {}", run_id)));
        }
        Ok(())
    }

    async fn update_run_hash(&self, run_id: &str, artifact_hash: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE runs SET artifact_hash = ? WHERE id = ?")
            .bind(artifact_hash)
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_run(&self, run_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for table in CHILD_TABLES {
            let sql = format!("DELETE FROM {} WHERE run_id = ?", table);
            sqlx::query(&sql).bind(run_id).execute(&mut *tx).await?;
        }
        sqlx::query("DELETE FROM runs WHERE id = ?")
            .bind(run_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_space_status(
        &self,
        run_id: &str,
        space_id: &str,
        status: UnitStatus,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let end_time = (status != UnitStatus::Running).then_some(now);
        sqlx::query(
            r#"
            INSERT INTO space_executions (run_id, space_id, status, start_time, end_time)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (run_id, space_id) DO UPDATE
            SET status = excluded.status, end_time = excluded.end_time
            "#,
        )
        .bind(run_id)
        .bind(space_id)
        .bind(status.as_str())
        .bind(now)
        .bind(end_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_space_execution(
        &self,
        run_id: &str,
        space_id: &str,
    ) -> Result<Option<SpaceExecution>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT run_id, space_id, status, start_time, end_time
            FROM space_executions
            WHERE run_id = ? AND space_id = ?
            "#,
        )
        .bind(run_id)
        .bind(space_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let status: String = row.try_get("status")?;
        Ok(Some(SpaceExecution {
            run_id: row.try_get("run_id")?,
            space_id: row.try_get("space_id")?,
            status: parse_status(&status)?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
        }))
    }

    async fn set_param_set_status(
        &self,
        run_id: &str,
        space_id: &str,
        param_set_index: usize,
        status: UnitStatus,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let end_time = (status != UnitStatus::Running).then_some(now);
        sqlx::query(
            r#"
            INSERT INTO param_set_executions (run_id, space_id, param_set_index, status, start_time, end_time)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (run_id, space_id, param_set_index) DO UPDATE
            SET status = excluded.status,
                end_time = excluded.end_time,
                start_time = CASE WHEN excluded.status = 'running'
                                  THEN excluded.start_time
                                  ELSE param_set_executions.start_time END
            "#,
        )
        .bind(run_id)
        .bind(space_id)
        .bind(param_set_index as i64)
        .bind(status.as_str())
        .bind(now)
        .bind(end_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_param_set_execution(
        &self,
        run_id: &str,
        space_id: &str,
        param_set_index: usize,
    ) -> Result<Option<ParamSetExecution>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT run_id, space_id, param_set_index, status, start_time, end_time
            FROM param_set_executions
            WHERE run_id = ? AND space_id = ? AND param_set_index = ?
            "#,
        )
        .bind(run_id)
        .bind(space_id)
        .bind(param_set_index as i64)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let status: String = row.try_get("status")?;
        Ok(Some(ParamSetExecution {
            run_id: row.try_get("run_id")?,
            space_id: row.try_get("space_id")?,
            param_set_index: index_of(&row)?,
            status: parse_status(&status)?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
        }))
    }

    async fn set_task_status(&self, key: &TaskKey, update: TaskUpdate) -> Result<(), StoreError> {
        let now = Utc::now();
        let end_time = (update.status != UnitStatus::Running).then_some(now);
        sqlx::query(
            r#"
            INSERT INTO task_executions (run_id, space_id, param_set_index, task_id, status,
                                         start_time, end_time, output_dir, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (run_id, space_id, param_set_index, task_id) DO UPDATE
            SET status = excluded.status,
                end_time = excluded.end_time,
                error_message = excluded.error_message,
                output_dir = COALESCE(excluded.output_dir, task_executions.output_dir),
                start_time = CASE WHEN excluded.status = 'running'
                                  THEN excluded.start_time
                                  ELSE task_executions.start_time END
            "#,
        )
        .bind(&key.run_id)
        .bind(&key.space_id)
        .bind(key.param_set_index as i64)
        .bind(&key.task_id)
        .bind(update.status.as_str())
        .bind(now)
        .bind(end_time)
        .bind(update.output_dir)
        .bind(update.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task_execution(
        &self,
        key: &TaskKey,
    ) -> Result<Option<TaskExecution>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT run_id, space_id, param_set_index, task_id, status, start_time, end_time,
                   output_dir, error_message
            FROM task_executions
            WHERE run_id = ? AND space_id = ? AND param_set_index = ? AND task_id = ?
            "#,
        )
        .bind(&key.run_id)
        .bind(&key.space_id)
        .bind(key.param_set_index as i64)
        .bind(&key.task_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let status: String = row.try_get("status")?;
        Ok(Some(TaskExecution {
            run_id: row.try_get("run_id")?,
            space_id: row.try_get("space_id")?,
            param_set_index: index_of(&row)?,
            task_id: row.try_get("task_id")?,
            status: parse_status(&status)?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            output_dir: row.try_get("output_dir")?,
            error_message: row.try_get("error_message")?,
        }))
    }

    async fn put_data(
        &self,
        run_id: &str,
        space_id: &str,
        param_set_index: usize,
        data_name: &str,
        data_value: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO data_mappings (run_id, space_id, param_set_index, data_name, data_value)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (run_id, space_id, param_set_index, data_name) DO UPDATE
            SET data_value = excluded.data_value
            "#,
        )
        .bind(run_id)
        .bind(space_id)
        .bind(param_set_index as i64)
        .bind(data_name)
        .bind(data_value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_data(
        &self,
        run_id: &str,
        space_id: &str,
        param_set_index: usize,
        data_name: &str,
    ) -> Result<Option<String>, StoreError> {
        let value = sqlx::query_scalar::<_, String>(
            r#"
            SELECT data_value FROM data_mappings
            WHERE run_id = ? AND space_id = ? AND param_set_index = ? AND data_name = ?
            "#,
        )
        .bind(run_id)
        .bind(space_id)
        .bind(param_set_index as i64)
        .bind(data_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn set_control_state(
        &self,
        run_id: &str,
        current_space: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO control_state (run_id, current_space) VALUES (?, ?)
            ON CONFLICT (run_id) DO UPDATE SET current_space = excluded.current_space
            "#,
        )
        .bind(run_id)
        .bind(current_space)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_control_state(&self, run_id: &str) -> Result<Option<String>, StoreError> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT current_space FROM control_state WHERE run_id = ?",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn completed_spaces(&self, run_id: &str) -> Result<Vec<String>, StoreError> {
        let spaces = sqlx::query_scalar::<_, String>(
            r#"
            SELECT space_id FROM space_executions
            WHERE run_id = ? AND status = 'completed'
            ORDER BY start_time ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(spaces)
    }

    async fn count_completed_param_sets(&self, run_id: &str) -> Result<usize, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM param_set_executions WHERE run_id = ? AND status = 'completed'",
        )
        .bind(run_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }

    async fn task_counts(&self, run_id: &str) -> Result<TaskCounts, StoreError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS total FROM task_executions WHERE run_id = ? GROUP BY status",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = TaskCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let total: i64 = row.try_get("total")?;
            match parse_status::<UnitStatus>(&status)? {
                UnitStatus::Running => counts.running = total as usize,
                UnitStatus::Completed => counts.completed = total as usize,
                UnitStatus::Failed => counts.failed = total as usize,
                UnitStatus::Skipped => counts.skipped = total as usize,
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    fn run(id: &str, version: &str) -> RunRecord {
        RunRecord::new(id, "exp", version, "/tmp/a.json", "hash")
    }

    #[tokio::test]
    async fn test_run_round_trip() {
        let store = store().await;
        store.create_run(&run("r1", "v1")).await.unwrap();
        store
            .update_run_position("r1", Some("S1"), Some(2))
            .await
            .unwrap();

        let loaded = store.find_run("exp", "v1").await.unwrap().unwrap();
        assert_eq!(loaded.id, "r1");
        assert_eq!(loaded.status, RunStatus::Running);
        assert_eq!(loaded.current_space.as_deref(), Some("S1"));
        assert_eq!(loaded.current_param_set, Some(2));

        let conflict = store.create_run(&run("r2", "v1")).await.unwrap_err();
        assert!(matches!(conflict, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = store().await;
        store.create_run(&run("r1", "v1")).await.unwrap();
        store.create_run(&run("r2", "v2")).await.unwrap();
        let key = TaskKey::new("r1", "S1", 0, "T1");
        let other = TaskKey::new("r2", "S1", 0, "T1");

        store
            .set_space_status("r1", "S1", UnitStatus::Completed)
            .await
            .unwrap();
        store
            .set_param_set_status("r1", "S1", 0, UnitStatus::Completed)
            .await
            .unwrap();
        store
            .set_task_status(&key, TaskUpdate::completed())
            .await
            .unwrap();
        store
            .set_task_status(&other, TaskUpdate::completed())
            .await
            .unwrap();
        store.put_data("r1", "S1", 0, "out", "7").await.unwrap();
        store.set_control_state("r1", "END").await.unwrap();

        store.delete_run("r1").await.unwrap();

        assert!(store.get_run("r1").await.unwrap().is_none());
        assert!(store.get_task_execution(&key).await.unwrap().is_none());
        assert!(store.get_data("r1", "S1", 0, "out").await.unwrap().is_none());
        assert!(store.get_control_state("r1").await.unwrap().is_none());
        assert!(store.completed_spaces("r1").await.unwrap().is_empty());
        assert!(store.get_task_execution(&other).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_task_status_upsert() {
        let store = store().await;
        store.create_run(&run("r1", "v1")).await.unwrap();
        let key = TaskKey::new("r1", "S1", 0, "T1");

        store
            .set_task_status(&key, TaskUpdate::running(Some("/out".to_string())))
            .await
            .unwrap();
        store
            .set_task_status(&key, TaskUpdate::failed("exit code 2"))
            .await
            .unwrap();

        let record = store.get_task_execution(&key).await.unwrap().unwrap();
        assert_eq!(record.status, UnitStatus::Failed);
        assert_eq!(record.output_dir.as_deref(), Some("/out"));
        assert_eq!(record.error_message.as_deref(), Some("exit code 2"));
        assert!(record.end_time.is_some());

        let counts = store.task_counts("r1").await.unwrap();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.completed, 0);
    }

    #[tokio::test]
    async fn test_data_and_control_state_overwrite() {
        let store = store().await;
        store.create_run(&run("r1", "v1")).await.unwrap();

        store.put_data("r1", "S1", 1, "acc", "0.5").await.unwrap();
        store.put_data("r1", "S1", 1, "acc", "0.9").await.unwrap();
        assert_eq!(
            store.get_data("r1", "S1", 1, "acc").await.unwrap().as_deref(),
            Some("0.9")
        );

        store.set_control_state("r1", "S2").await.unwrap();
        store.set_control_state("r1", "END").await.unwrap();
        assert_eq!(
            store.get_control_state("r1").await.unwrap().as_deref(),
            Some("END")
        );
    }
}
