//! SQLite-backed instruction store.
//!
//! The node's single authoritative store. All timestamps are persisted as
//! epoch milliseconds so SQL comparisons are exact, and every multi-row
//! mutation runs inside a transaction. The compare-and-set transition is a
//! single conditional `UPDATE` checked by affected-row count.

use crate::constants::{DEFAULT_MAX_RESULT_PARAM_LENGTH, LOCAL_INSTRUCTOR_ID};
use crate::error::Result;
use crate::models::{Instruction, InstructionState, InstructionStatus};
use crate::store::InstructionStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

static IN_MEMORY_DB_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Columns shared by every instruction query; one row per parameter, with
/// instruction and status columns repeated.
const SELECT_INSTRUCTIONS: &str = r#"
    SELECT i.id, i.instructor_id, i.topic, i.instruction_date, i.execution_date,
           s.state, s.status_date, s.ack_state, s.result_params,
           p.pname, p.pvalue
    FROM reactor_instruction i
    INNER JOIN reactor_instruction_status s
        ON s.instruction_id = i.id AND s.instructor_id = i.instructor_id
    LEFT JOIN reactor_instruction_param p
        ON p.instruction_id = i.id AND p.instructor_id = i.instructor_id
"#;

const ORDER_INSTRUCTIONS: &str = " ORDER BY i.instruction_date, i.id, i.instructor_id, p.pos";

#[derive(Debug, FromRow)]
struct InstructionRow {
    id: i64,
    instructor_id: String,
    topic: String,
    instruction_date: i64,
    execution_date: i64,
    state: String,
    status_date: i64,
    ack_state: Option<String>,
    result_params: Option<String>,
    pname: Option<String>,
    pvalue: Option<String>,
}

/// SQLite implementation of [`InstructionStore`].
pub struct SqliteInstructionStore {
    pool: SqlitePool,
    max_result_param_length: usize,
}

impl SqliteInstructionStore {
    /// Open (and bootstrap) a store at the given SQLite connection string,
    /// e.g. `sqlite:reactor.db` or `sqlite::memory:`.
    pub async fn new(database_url: &str) -> Result<Self> {
        let is_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(if is_memory { 1 } else { 0 })
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    if !is_memory {
                        // WAL for concurrent readers alongside the writer
                        sqlx::query("PRAGMA journal_mode = WAL")
                            .execute(&mut *conn)
                            .await?;
                    }
                    sqlx::query("PRAGMA busy_timeout = 30000")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA foreign_keys = ON")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await?;

        Self::create_schema(&pool).await?;

        Ok(Self {
            pool,
            max_result_param_length: DEFAULT_MAX_RESULT_PARAM_LENGTH,
        })
    }

    /// In-memory store for tests. Each call gets a private database; the
    /// shared-cache URI lets pooled connections see the same data.
    pub async fn new_in_memory() -> Result<Self> {
        let n = IN_MEMORY_DB_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let url = format!("sqlite:file:reactor-mem-{n}?mode=memory&cache=shared");
        Self::new(&url).await
    }

    /// Set a maximum length for status result-parameter values. Longer
    /// values are truncated in the middle before persistence.
    pub fn with_max_result_param_length(mut self, max: usize) -> Self {
        self.max_result_param_length = max;
        self
    }

    async fn create_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reactor_instruction (
                id INTEGER NOT NULL,
                instructor_id TEXT NOT NULL,
                topic TEXT NOT NULL,
                instruction_date INTEGER NOT NULL,
                execution_date INTEGER NOT NULL,
                PRIMARY KEY (id, instructor_id)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reactor_instruction_param (
                instruction_id INTEGER NOT NULL,
                instructor_id TEXT NOT NULL,
                pos INTEGER NOT NULL,
                pname TEXT NOT NULL,
                pvalue TEXT NOT NULL,
                PRIMARY KEY (instruction_id, instructor_id, pos)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reactor_instruction_status (
                instruction_id INTEGER NOT NULL,
                instructor_id TEXT NOT NULL,
                state TEXT NOT NULL,
                status_date INTEGER NOT NULL,
                ack_state TEXT,
                result_params TEXT,
                PRIMARY KEY (instruction_id, instructor_id)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_reactor_status_state ON reactor_instruction_status(state)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Serialize result parameters as JSON, truncating each value to the
    /// configured maximum length with a middle ellipsis.
    fn encode_result_parameters(&self, status: &InstructionStatus) -> Result<Option<String>> {
        let Some(params) = status.result_parameters.as_ref().filter(|p| !p.is_empty()) else {
            return Ok(None);
        };
        let truncated: BTreeMap<&str, String> = params
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str(),
                    truncate_middle(v, self.max_result_param_length),
                )
            })
            .collect();
        let json = serde_json::to_string(&truncated)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        Ok(Some(json))
    }

    /// Walk joined rows into instructions, folding the repeated parameter
    /// rows back into ordered parameter lists.
    fn extract_instructions(rows: Vec<InstructionRow>) -> Result<Vec<Instruction>> {
        let mut results: Vec<Instruction> = Vec::new();
        for row in rows {
            let is_new = match results.last() {
                Some(last) => last.id != row.id || last.instructor_id != row.instructor_id,
                None => true,
            };
            if is_new {
                let state = parse_state(&row.state)?;
                let ack_state = row.ack_state.as_deref().map(parse_state).transpose()?;
                let result_parameters = row
                    .result_params
                    .as_deref()
                    .map(serde_json::from_str::<BTreeMap<String, String>>)
                    .transpose()
                    .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

                let mut instruction = Instruction::new(
                    row.id,
                    row.instructor_id.clone(),
                    row.topic.clone(),
                    from_millis(row.instruction_date),
                );
                instruction.execution_date = from_millis(row.execution_date);
                instruction.status = InstructionStatus {
                    instruction_id: row.id,
                    instructor_id: row.instructor_id.clone(),
                    state,
                    status_date: from_millis(row.status_date),
                    acknowledged_state: ack_state,
                    result_parameters,
                };
                results.push(instruction);
            }
            if let (Some(name), Some(value)) = (row.pname, row.pvalue) {
                if let Some(instruction) = results.last_mut() {
                    instruction.add_parameter(name, value);
                }
            }
        }
        Ok(results)
    }

    async fn query_instructions(
        &self,
        where_clause: &str,
        args: &[QueryArg<'_>],
    ) -> Result<Vec<Instruction>> {
        let sql = format!("{SELECT_INSTRUCTIONS} WHERE {where_clause} {ORDER_INSTRUCTIONS}");
        let mut query = sqlx::query_as::<_, InstructionRow>(&sql);
        for arg in args {
            query = match arg {
                QueryArg::Int(v) => query.bind(*v),
                QueryArg::Text(v) => query.bind(*v),
            };
        }
        let rows = query.fetch_all(&self.pool).await?;
        Self::extract_instructions(rows)
    }
}

/// Typed bind argument for the shared instruction query, so integer keys
/// and timestamps compare numerically rather than through column affinity.
enum QueryArg<'a> {
    Int(i64),
    Text(&'a str),
}

#[async_trait]
impl InstructionStore for SqliteInstructionStore {
    async fn create(&self, instruction: &Instruction) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO reactor_instruction
                (id, instructor_id, topic, instruction_date, execution_date)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(instruction.id)
        .bind(&instruction.instructor_id)
        .bind(&instruction.topic)
        .bind(to_millis(instruction.instruction_date))
        .bind(to_millis(instruction.execution_date))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            // already present, leave the existing rows untouched
            tx.rollback().await?;
            return Ok(false);
        }

        for (pos, (name, value)) in instruction.parameter_rows().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO reactor_instruction_param
                    (instruction_id, instructor_id, pos, pname, pvalue)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(instruction.id)
            .bind(&instruction.instructor_id)
            .bind(pos as i64)
            .bind(name)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        let status = &instruction.status;
        sqlx::query(
            r#"
            INSERT INTO reactor_instruction_status
                (instruction_id, instructor_id, state, status_date, ack_state, result_params)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(instruction.id)
        .bind(&instruction.instructor_id)
        .bind(status.state.to_string())
        .bind(to_millis(status.status_date))
        .bind(status.acknowledged_state.map(|s| s.to_string()))
        .bind(self.encode_result_parameters(status)?)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        trace!(
            id = instruction.id,
            instructor_id = %instruction.instructor_id,
            topic = %instruction.topic,
            "stored instruction"
        );
        Ok(true)
    }

    async fn get(&self, id: i64, instructor_id: &str) -> Result<Option<Instruction>> {
        let mut found = self
            .query_instructions(
                "i.id = ? AND i.instructor_id = ?",
                &[QueryArg::Int(id), QueryArg::Text(instructor_id)],
            )
            .await?;
        Ok(if found.is_empty() {
            None
        } else {
            Some(found.swap_remove(0))
        })
    }

    async fn find_by_state(&self, state: InstructionState) -> Result<Vec<Instruction>> {
        let state_str = state.to_string();
        self.query_instructions(
            "s.state = ? AND i.execution_date <= ?",
            &[
                QueryArg::Text(&state_str),
                QueryArg::Int(to_millis(Utc::now())),
            ],
        )
        .await
    }

    async fn find_pending_acknowledgement(&self) -> Result<Vec<Instruction>> {
        self.query_instructions(
            "(s.ack_state IS NULL OR s.ack_state <> s.state) AND i.instructor_id <> ?",
            &[QueryArg::Text(LOCAL_INSTRUCTOR_ID)],
        )
        .await
    }

    async fn compare_and_set_status(
        &self,
        id: i64,
        instructor_id: &str,
        expected: InstructionState,
        status: &InstructionStatus,
    ) -> Result<bool> {
        let count = sqlx::query(
            r#"
            UPDATE reactor_instruction_status
            SET state = ?, status_date = ?, ack_state = ?, result_params = ?
            WHERE instruction_id = ? AND instructor_id = ? AND state = ?
            "#,
        )
        .bind(status.state.to_string())
        .bind(to_millis(status.status_date))
        .bind(status.acknowledged_state.map(|s| s.to_string()))
        .bind(self.encode_result_parameters(status)?)
        .bind(id)
        .bind(instructor_id)
        .bind(expected.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(count > 0)
    }

    async fn store_status(
        &self,
        id: i64,
        instructor_id: &str,
        status: &InstructionStatus,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE reactor_instruction_status
            SET state = ?, status_date = ?, ack_state = ?, result_params = ?
            WHERE instruction_id = ? AND instructor_id = ?
            "#,
        )
        .bind(status.state.to_string())
        .bind(to_millis(status.status_date))
        .bind(status.acknowledged_state.map(|s| s.to_string()))
        .bind(self.encode_result_parameters(status)?)
        .bind(id)
        .bind(instructor_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_older_than(&self, hours: u32) -> Result<u64> {
        let cutoff = to_millis(Utc::now() - Duration::hours(i64::from(hours)));
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM reactor_instruction_param
            WHERE EXISTS (
                SELECT 1 FROM reactor_instruction_status s
                WHERE s.instruction_id = reactor_instruction_param.instruction_id
                  AND s.instructor_id = reactor_instruction_param.instructor_id
                  AND s.state IN ('Completed', 'Declined')
                  AND s.status_date < ?
            )
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM reactor_instruction
            WHERE EXISTS (
                SELECT 1 FROM reactor_instruction_status s
                WHERE s.instruction_id = reactor_instruction.id
                  AND s.instructor_id = reactor_instruction.instructor_id
                  AND s.state IN ('Completed', 'Declined')
                  AND s.status_date < ?
            )
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        let count = sqlx::query(
            r#"
            DELETE FROM reactor_instruction_status
            WHERE state IN ('Completed', 'Declined') AND status_date < ?
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        debug!(count, hours, "deleted old terminal instructions");
        Ok(count)
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn parse_state(s: &str) -> std::result::Result<InstructionState, sqlx::Error> {
    s.parse::<InstructionState>()
        .map_err(|e| sqlx::Error::Decode(e.into()))
}

/// Truncate `s` to at most `max` characters, removing the middle and
/// inserting an ellipsis.
fn truncate_middle(s: &str, max: usize) -> String {
    let len = s.chars().count();
    if len <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max / 2).collect();
    let tail: String = s.chars().skip(len - max / 2).collect();
    format!("{head}\u{2026}{tail}")
}
