//! [`SqliteStore`]: the SQLite implementation of [`NumericStore`].

use std::{
  path::Path,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
  time::Duration,
};

use rusqlite::{InterruptHandle, OptionalExtension as _, types::Value};
use tabula_core::{
  aggregate::{AggregateQuery, OBSERVATIONS_TABLE},
  observation::{ColumnSeries, Observation},
  result::{AggregateValue, ComputedResult},
  store::NumericStore,
};

use crate::{
  Error, Result,
  encode::{RawComputedResult, decode_value, encode_dt, encode_value},
  schema::STORE_SCHEMA,
};

/// How long a writer waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Progress of one aggregate read on the connection thread.
///
/// The connection runs one closure at a time, so a read that times out may
/// still be queued behind another caller. Only a read that is `Running` may
/// be interrupted; a `Queued` one is marked `Abandoned` and skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
  Queued,
  Running,
  Done,
  Abandoned,
}

fn lock(state: &Mutex<ReadState>) -> MutexGuard<'_, ReadState> {
  state.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A numeric store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn:      tokio_rusqlite::Connection,
  interrupt: Arc<InterruptHandle>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn).await
  }

  /// Open an in-memory store for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn).await
  }

  async fn init(conn: tokio_rusqlite::Connection) -> Result<Self> {
    let interrupt = conn
      .call(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(STORE_SCHEMA)?;
        Ok(conn.get_interrupt_handle())
      })
      .await?;
    Ok(Self { conn, interrupt: Arc::new(interrupt) })
  }
}

fn run_aggregate(
  conn: &mut rusqlite::Connection,
  sql: &str,
  query: &AggregateQuery,
) -> tokio_rusqlite::Result<Option<Value>> {
  let mut stmt = conn.prepare(sql)?;
  if !stmt.readonly() {
    return Err(tokio_rusqlite::Error::Other(Box::new(Error::NotReadOnly)));
  }
  let value = stmt
    .query_row(rusqlite::params![query.column, query.user_id], |row| row.get(0))
    .optional()?;
  Ok(value)
}

// ─── NumericStore impl ───────────────────────────────────────────────────────

impl NumericStore for SqliteStore {
  type Error = Error;

  // ── Observations ──────────────────────────────────────────────────────────

  async fn replace_observations(
    &self,
    user_id: String,
    columns: Vec<ColumnSeries>,
  ) -> Result<usize> {
    let inserted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "DELETE FROM observations WHERE user_id = ?1",
          rusqlite::params![user_id],
        )?;

        let mut inserted = 0usize;
        {
          let mut stmt = tx.prepare(
            "INSERT INTO observations (user_id, column_name, value) VALUES (?1, ?2, ?3)",
          )?;
          for series in &columns {
            for value in &series.values {
              stmt.execute(rusqlite::params![user_id, series.name, value])?;
              inserted += 1;
            }
          }
        }

        tx.commit()?;
        Ok(inserted)
      })
      .await?;

    Ok(inserted)
  }

  async fn list_observations(&self, user_id: String) -> Result<Vec<Observation>> {
    let rows = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT id, user_id, column_name, value
           FROM observations
           WHERE user_id = ?1
           ORDER BY id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![user_id], |row| {
            Ok(Observation {
              id:          row.get(0)?,
              user_id:     row.get(1)?,
              column_name: row.get(2)?,
              value:       row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(rows)
  }

  async fn column_names(&self, user_id: String) -> Result<Vec<String>> {
    let names = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT column_name
           FROM observations
           WHERE user_id = ?1
           GROUP BY column_name
           ORDER BY MIN(id)",
        )?;
        let names = stmt
          .query_map(rusqlite::params![user_id], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
      })
      .await?;

    Ok(names)
  }

  // ── Aggregation ───────────────────────────────────────────────────────────

  async fn aggregate(&self, query: AggregateQuery, timeout: Duration) -> Result<AggregateValue> {
    // The function keyword comes from a closed enum; everything the caller
    // supplied is bound as a parameter.
    let sql = format!(
      "SELECT {}(value) FROM {OBSERVATIONS_TABLE} WHERE column_name = ?1 AND user_id = ?2",
      query.function.keyword()
    );

    let state = Arc::new(Mutex::new(ReadState::Queued));
    let read_state = state.clone();

    let read = self.conn.call(move |conn| {
      {
        let mut state = lock(&read_state);
        if *state == ReadState::Abandoned {
          return Ok(None);
        }
        *state = ReadState::Running;
      }
      let value = run_aggregate(conn, &sql, &query);
      *lock(&read_state) = ReadState::Done;
      value
    });

    match tokio::time::timeout(timeout, read).await {
      Ok(value) => Ok(value?.map(decode_value).unwrap_or(AggregateValue::Null)),
      Err(_) => {
        // Holding the lock keeps the read from finishing, so the interrupt
        // cannot land on the next caller's statement.
        let mut state = lock(&state);
        if *state == ReadState::Running {
          self.interrupt.interrupt();
        }
        *state = ReadState::Abandoned;
        Err(Error::Timeout(timeout))
      }
    }
  }

  // ── Computed results ──────────────────────────────────────────────────────

  async fn upsert_result(&self, result: ComputedResult) -> Result<()> {
    let value = encode_value(&result.result);
    let at_str = encode_dt(result.computed_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO computed_results
             (user_id, column_name, operation, query_text, result, computed_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)
           ON CONFLICT (user_id) DO UPDATE SET
             column_name = excluded.column_name,
             operation   = excluded.operation,
             query_text  = excluded.query_text,
             result      = excluded.result,
             computed_at = excluded.computed_at",
          rusqlite::params![
            result.user_id,
            result.column_name,
            result.operation,
            result.query_text,
            value,
            at_str,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(())
  }

  async fn get_result(&self, user_id: String) -> Result<Option<ComputedResult>> {
    let raw: Option<RawComputedResult> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT user_id, column_name, operation, query_text, result, computed_at
               FROM computed_results
               WHERE user_id = ?1",
              rusqlite::params![user_id],
              |row| {
                Ok(RawComputedResult {
                  user_id:     row.get(0)?,
                  column_name: row.get(1)?,
                  operation:   row.get(2)?,
                  query_text:  row.get(3)?,
                  result:      row.get(4)?,
                  computed_at: row.get(5)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawComputedResult::into_result).transpose()
  }
}
