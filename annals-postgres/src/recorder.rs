use annals_core::{
    config::Config,
    recorder::{
        EventSelect, NonEmpty, Notification, Recorder, RecorderError, RecordConflict, StoredEvent,
        validate_batch,
    },
};
use sqlx::{
    PgPool, Postgres, QueryBuilder, Row,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use uuid::Uuid;

/// Application-wide advisory lock key serializing appenders.
const APPEND_LOCK_KEY: i64 = 0x616e_6e61_6c73; // "annals"

/// A `PostgreSQL`-backed [`Recorder`].
///
/// Events and snapshots live in two tables keyed by
/// `(originator_id, originator_version)`; notification ids are a dense
/// `BIGINT` column assigned under an advisory lock (see the crate docs for
/// the density argument).
#[derive(Clone)]
pub struct PgRecorder {
    pool: PgPool,
}

impl PgRecorder {
    /// Topic selecting this backend via `INFRASTRUCTURE_FACTORY`.
    pub const TOPIC: &'static str = "annals.postgres:PgRecorder";

    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the `POSTGRES_*` options of a [`Config`].
    ///
    /// Unset options fall back to the driver's defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`RecorderError::Persistence`] if the connection cannot be
    /// established.
    pub async fn from_config(config: &Config) -> Result<Self, RecorderError> {
        let mut options = PgConnectOptions::new();
        if let Some(host) = &config.postgres_host {
            options = options.host(host);
        }
        if let Some(port) = config.postgres_port {
            options = options.port(port);
        }
        if let Some(user) = &config.postgres_user {
            options = options.username(user);
        }
        if let Some(password) = &config.postgres_password {
            options = options.password(password);
        }
        if let Some(dbname) = &config.postgres_dbname {
            options = options.database(dbname);
        }
        let pool = PgPoolOptions::new()
            .connect_with(options)
            .await
            .map_err(RecorderError::persistence)?;
        Ok(Self::new(pool))
    }

    /// Apply the initial schema (idempotent).
    ///
    /// This uses `CREATE TABLE IF NOT EXISTS` style DDL so it can be run on
    /// startup.
    ///
    /// # Errors
    ///
    /// Returns a [`RecorderError::Persistence`] if any of the schema
    /// creation queries fail.
    #[tracing::instrument(skip(self))]
    pub async fn migrate(&self) -> Result<(), RecorderError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS annals_events (
                originator_id      UUID NOT NULL,
                originator_version BIGINT NOT NULL,
                topic              TEXT NOT NULL,
                state              BYTEA NOT NULL,
                notification_id    BIGINT NOT NULL UNIQUE,
                PRIMARY KEY (originator_id, originator_version)
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(RecorderError::persistence)?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS annals_snapshots (
                originator_id      UUID NOT NULL,
                originator_version BIGINT NOT NULL,
                topic              TEXT NOT NULL,
                state              BYTEA NOT NULL,
                PRIMARY KEY (originator_id, originator_version)
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(RecorderError::persistence)?;

        Ok(())
    }
}

/// Versions are `u64` in the API and `BIGINT` in the schema.
fn version_to_db(version: u64) -> Result<i64, RecorderError> {
    i64::try_from(version)
        .map_err(|_| RecorderError::Integrity(format!("version {version} exceeds BIGINT range")))
}

fn u64_from_db(value: i64, column: &str) -> Result<u64, RecorderError> {
    u64::try_from(value)
        .map_err(|_| RecorderError::Integrity(format!("negative {column} {value} in database")))
}

fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<StoredEvent, RecorderError> {
    Ok(StoredEvent {
        originator_id: row
            .try_get("originator_id")
            .map_err(RecorderError::persistence)?,
        originator_version: u64_from_db(
            row.try_get("originator_version")
                .map_err(RecorderError::persistence)?,
            "originator_version",
        )?,
        topic: row.try_get("topic").map_err(RecorderError::persistence)?,
        state: row.try_get("state").map_err(RecorderError::persistence)?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505")
}

impl Recorder for PgRecorder {
    #[tracing::instrument(skip(self, batch), fields(event_count = batch.len()))]
    async fn insert_events(
        &self,
        batch: NonEmpty<StoredEvent>,
    ) -> Result<Vec<u64>, RecorderError> {
        validate_batch(&batch)?;
        let keys = batch
            .iter()
            .map(|event| Ok((event.originator_id, version_to_db(event.originator_version)?)))
            .collect::<Result<Vec<_>, RecorderError>>()?;

        let mut tx = self.pool.begin().await.map_err(RecorderError::persistence)?;

        // Serialize appenders until commit; see the crate docs.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(RecorderError::persistence)?;

        // Conflict probe. Under the advisory lock, check-then-insert is
        // race-free, and probing first lets the conflict carry the colliding
        // pair.
        let mut probe = QueryBuilder::<Postgres>::new(
            "SELECT originator_id, originator_version FROM annals_events \
             WHERE (originator_id, originator_version) IN ",
        );
        probe.push_tuples(&keys, |mut b, (originator_id, version)| {
            b.push_bind(*originator_id);
            b.push_bind(*version);
        });
        probe.push(" LIMIT 1");
        if let Some(row) = probe
            .build()
            .fetch_optional(&mut *tx)
            .await
            .map_err(RecorderError::persistence)?
        {
            let originator_id: Uuid = row.try_get(0).map_err(RecorderError::persistence)?;
            let version: i64 = row.try_get(1).map_err(RecorderError::persistence)?;
            tracing::debug!(
                %originator_id,
                originator_version = version,
                "version collision, rejecting batch"
            );
            return Err(RecordConflict {
                originator_id,
                originator_version: u64_from_db(version, "originator_version")?,
            }
            .into());
        }

        let max: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(notification_id), 0) FROM annals_events")
            .fetch_one(&mut *tx)
            .await
            .map_err(RecorderError::persistence)?;
        let max = u64_from_db(max, "notification_id")?;
        let ids: Vec<u64> = (1..=batch.len() as u64).map(|offset| max + offset).collect();

        let mut insert = QueryBuilder::<Postgres>::new(
            "INSERT INTO annals_events \
             (originator_id, originator_version, topic, state, notification_id) ",
        );
        let rows = batch
            .iter()
            .zip(&keys)
            .zip(&ids)
            .map(|((event, (originator_id, version)), id)| {
                Ok((
                    *originator_id,
                    *version,
                    event.topic.as_str(),
                    event.state.as_slice(),
                    version_to_db(*id)?,
                ))
            })
            .collect::<Result<Vec<_>, RecorderError>>()?;
        insert.push_values(rows, |mut b, (id, version, topic, state, notification_id)| {
            b.push_bind(id);
            b.push_bind(version);
            b.push_bind(topic);
            b.push_bind(state);
            b.push_bind(notification_id);
        });
        insert.build().execute(&mut *tx).await.map_err(|err| {
            if is_unique_violation(&err) {
                // Unreachable under the advisory lock; kept as a backstop.
                RecorderError::from(RecordConflict {
                    originator_id: batch.first().originator_id,
                    originator_version: batch.first().originator_version,
                })
            } else {
                RecorderError::persistence(err)
            }
        })?;

        tx.commit().await.map_err(RecorderError::persistence)?;
        tracing::debug!(notification_ids = ?ids, "batch recorded");
        Ok(ids)
    }

    #[tracing::instrument(skip(self))]
    async fn select_events(
        &self,
        originator_id: Uuid,
        select: EventSelect,
    ) -> Result<Vec<StoredEvent>, RecorderError> {
        let mut query = QueryBuilder::<Postgres>::new(
            "SELECT originator_id, originator_version, topic, state \
             FROM annals_events WHERE originator_id = ",
        );
        query.push_bind(originator_id);
        if let Some(gt) = select.gt {
            query.push(" AND originator_version > ");
            query.push_bind(version_to_db(gt)?);
        }
        if let Some(lte) = select.lte {
            query.push(" AND originator_version <= ");
            query.push_bind(version_to_db(lte)?);
        }
        query.push(if select.desc {
            " ORDER BY originator_version DESC"
        } else {
            " ORDER BY originator_version ASC"
        });
        if let Some(limit) = select.limit {
            query.push(" LIMIT ");
            query.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(RecorderError::persistence)?;
        rows.iter().map(row_to_event).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn select_notifications(
        &self,
        start: u64,
        limit: usize,
    ) -> Result<Vec<Notification>, RecorderError> {
        let Ok(start) = i64::try_from(start) else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query(
            "SELECT notification_id, originator_id, originator_version, topic, state \
             FROM annals_events WHERE notification_id >= $1 \
             ORDER BY notification_id ASC LIMIT $2",
        )
        .bind(start)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(RecorderError::persistence)?;

        rows.iter()
            .map(|row| {
                let id: i64 = row
                    .try_get("notification_id")
                    .map_err(RecorderError::persistence)?;
                Ok(Notification {
                    id: u64_from_db(id, "notification_id")?,
                    event: row_to_event(row)?,
                })
            })
            .collect()
    }

    async fn max_notification_id(&self) -> Result<u64, RecorderError> {
        let max: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(notification_id), 0) FROM annals_events")
                .fetch_one(&self.pool)
                .await
                .map_err(RecorderError::persistence)?;
        u64_from_db(max, "notification_id")
    }

    #[tracing::instrument(skip(self, snapshot), fields(originator_id = %snapshot.originator_id, originator_version = snapshot.originator_version))]
    async fn insert_snapshot(&self, snapshot: StoredEvent) -> Result<(), RecorderError> {
        sqlx::query(
            "INSERT INTO annals_snapshots (originator_id, originator_version, topic, state) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (originator_id, originator_version) \
             DO UPDATE SET topic = EXCLUDED.topic, state = EXCLUDED.state",
        )
        .bind(snapshot.originator_id)
        .bind(version_to_db(snapshot.originator_version)?)
        .bind(&snapshot.topic)
        .bind(&snapshot.state)
        .execute(&self.pool)
        .await
        .map_err(RecorderError::persistence)?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn select_snapshot(
        &self,
        originator_id: Uuid,
        lte: Option<u64>,
    ) -> Result<Option<StoredEvent>, RecorderError> {
        let mut query = QueryBuilder::<Postgres>::new(
            "SELECT originator_id, originator_version, topic, state \
             FROM annals_snapshots WHERE originator_id = ",
        );
        query.push_bind(originator_id);
        if let Some(lte) = lte {
            query.push(" AND originator_version <= ");
            query.push_bind(version_to_db(lte)?);
        }
        query.push(" ORDER BY originator_version DESC LIMIT 1");

        let row = query
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(RecorderError::persistence)?;
        row.as_ref().map(row_to_event).transpose()
    }
}
