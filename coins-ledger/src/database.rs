//! Shared Ledger Store on PostgreSQL
//!
//! One database backs every node in the cluster, so multiplier ids are
//! allocated once (`BIGSERIAL`) and a cache miss on any node sees every other
//! node's writes.
//!
//! The [`LedgerStore`] seam is synchronous. Calls made from inside a tokio
//! runtime go through `block_in_place`, which requires the multi-threaded
//! runtime; calls from plain threads block on the runtime the pool was
//! connected from.

use crate::{
    config::StorageConfig,
    store::{LedgerStore, MultiplierFilter},
    types::{Account, Multiplier, MultiplierData, MultiplierKind, PlayerId},
    Error, Result,
};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS coins_accounts (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        balance NUMERIC NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS coins_accounts_balance_idx
        ON coins_accounts (balance DESC, name ASC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS coins_multipliers (
        id BIGSERIAL PRIMARY KEY,
        realm TEXT NOT NULL,
        owner UUID NOT NULL,
        owner_name TEXT NOT NULL,
        amount INTEGER NOT NULL,
        minutes INTEGER NOT NULL,
        kind TEXT NOT NULL,
        start_millis BIGINT NOT NULL DEFAULT 0,
        queue_millis BIGINT NOT NULL DEFAULT 0
    )
    "#,
];

const MULTIPLIER_COLUMNS: &str =
    "id, realm, owner, owner_name, amount, minutes, kind, start_millis, queue_millis";

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    name: String,
    balance: Decimal,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account::new(PlayerId::new(row.id), row.name, row.balance)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MultiplierRow {
    id: i64,
    realm: String,
    owner: Uuid,
    owner_name: String,
    amount: i32,
    minutes: i32,
    kind: String,
    start_millis: i64,
    queue_millis: i64,
}

impl TryFrom<MultiplierRow> for Multiplier {
    type Error = Error;

    fn try_from(row: MultiplierRow) -> Result<Self> {
        let kind = MultiplierKind::parse(&row.kind).ok_or_else(|| {
            Error::Serialization(format!("Unknown multiplier kind '{}' in row #{}", row.kind, row.id))
        })?;
        let data = MultiplierData::new(
            PlayerId::new(row.owner),
            row.owner_name,
            row.amount,
            row.minutes,
            kind,
        )
        .map_err(|e| Error::Serialization(format!("Invalid multiplier row #{}: {}", row.id, e)))?;

        Ok(Multiplier::from_row(
            row.id,
            row.realm,
            data,
            row.start_millis,
            row.queue_millis,
        ))
    }
}

/// Cluster-wide PostgreSQL store
pub struct PgStore {
    pool: PgPool,
    runtime: Handle,
}

impl PgStore {
    /// Connect the pool and create missing tables
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.database_url)
            .await?;

        let store = Self {
            pool,
            runtime: Handle::current(),
        };
        store.ensure_schema().await?;

        tracing::info!(max_connections = config.max_connections, "Connected PostgreSQL ledger store");
        Ok(store)
    }

    /// Connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        match Handle::try_current() {
            Ok(_) => tokio::task::block_in_place(|| self.runtime.block_on(future)),
            Err(_) => self.runtime.block_on(future),
        }
    }
}

impl LedgerStore for PgStore {
    fn create_account(&self, id: PlayerId, name: &str, balance: Decimal) -> Result<()> {
        let account = Account::new(id, name, balance);
        self.block_on(async {
            let result = sqlx::query(
                r#"
                INSERT INTO coins_accounts (id, name, balance)
                VALUES ($1, $2, $3)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(*account.id.as_uuid())
            .bind(&account.name)
            .bind(account.balance)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() > 0 {
                tracing::debug!(player = %account.id, name = %account.name, "Account created");
            }
            Ok(())
        })
    }

    fn read_balance(&self, id: PlayerId) -> Result<Option<Decimal>> {
        self.block_on(async {
            let balance = sqlx::query_scalar::<_, Decimal>(
                "SELECT balance FROM coins_accounts WHERE id = $1",
            )
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
            Ok(balance)
        })
    }

    fn write_balance(&self, id: PlayerId, balance: Decimal) -> Result<()> {
        self.block_on(async {
            let result = sqlx::query("UPDATE coins_accounts SET balance = $1 WHERE id = $2")
                .bind(balance)
                .bind(*id.as_uuid())
                .execute(&self.pool)
                .await?;

            if result.rows_affected() == 0 {
                return Err(Error::unknown_player(id));
            }
            Ok(())
        })
    }

    fn account_exists(&self, id: PlayerId) -> Result<bool> {
        self.block_on(async {
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM coins_accounts WHERE id = $1)",
            )
            .bind(*id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
            Ok(exists)
        })
    }

    fn account_exists_by_name(&self, name: &str) -> Result<bool> {
        self.block_on(async {
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM coins_accounts WHERE name = $1)",
            )
            .bind(name.to_lowercase())
            .fetch_one(&self.pool)
            .await?;
            Ok(exists)
        })
    }

    fn account_by_name(&self, name: &str) -> Result<Option<Account>> {
        self.block_on(async {
            let row = sqlx::query_as::<_, AccountRow>(
                "SELECT id, name, balance FROM coins_accounts WHERE name = $1",
            )
            .bind(name.to_lowercase())
            .fetch_optional(&self.pool)
            .await?;
            Ok(row.map(Account::from))
        })
    }

    fn top_n(&self, n: usize) -> Result<Vec<Account>> {
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        self.block_on(async {
            let rows = sqlx::query_as::<_, AccountRow>(
                r#"
                SELECT id, name, balance FROM coins_accounts
                ORDER BY balance DESC, name ASC
                LIMIT $1
                "#,
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(Account::from).collect())
        })
    }

    fn create_multiplier(&self, multiplier: &Multiplier) -> Result<i64> {
        self.block_on(async {
            let data = multiplier.data();
            let id = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO coins_multipliers
                    (realm, owner, owner_name, amount, minutes, kind, start_millis, queue_millis)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING id
                "#,
            )
            .bind(multiplier.realm())
            .bind(*data.owner().as_uuid())
            .bind(data.owner_name())
            .bind(data.amount())
            .bind(data.minutes())
            .bind(data.kind().to_string())
            .bind(multiplier.start_millis())
            .bind(multiplier.queue_millis())
            .fetch_one(&self.pool)
            .await?;

            tracing::debug!(multiplier_id = id, "Multiplier persisted");
            Ok(id)
        })
    }

    fn read_multiplier(&self, id: i64) -> Result<Option<Multiplier>> {
        self.block_on(async {
            let row = sqlx::query_as::<_, MultiplierRow>(&format!(
                "SELECT {} FROM coins_multipliers WHERE id = $1",
                MULTIPLIER_COLUMNS
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            row.map(Multiplier::try_from).transpose()
        })
    }

    fn list_multipliers(&self, filter: Option<&MultiplierFilter>) -> Result<Vec<Multiplier>> {
        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM coins_multipliers WHERE TRUE",
            MULTIPLIER_COLUMNS
        ));

        if let Some(filter) = filter {
            if let Some(realm) = &filter.realm {
                query.push(" AND realm = ").push_bind(realm.to_lowercase());
            }
            if let Some(owner) = filter.owner {
                query.push(" AND owner = ").push_bind(*owner.as_uuid());
            }
            if let Some(kind) = filter.kind {
                query.push(" AND kind = ").push_bind(kind.to_string());
            }
            match filter.enabled {
                Some(true) => {
                    query.push(" AND start_millis <> 0");
                }
                Some(false) => {
                    query.push(" AND start_millis = 0");
                }
                None => {}
            }
        }
        query.push(" ORDER BY id");

        self.block_on(async {
            let rows = query
                .build_query_as::<MultiplierRow>()
                .fetch_all(&self.pool)
                .await?;
            rows.into_iter().map(Multiplier::try_from).collect()
        })
    }

    fn delete_multiplier(&self, id: i64) -> Result<()> {
        self.block_on(async {
            sqlx::query("DELETE FROM coins_multipliers WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }

    fn update_multiplier(&self, multiplier: &Multiplier) -> Result<()> {
        self.block_on(async {
            let data = multiplier.data();
            let result = sqlx::query(
                r#"
                UPDATE coins_multipliers
                SET amount = $1, minutes = $2, start_millis = $3, queue_millis = $4
                WHERE id = $5
                "#,
            )
            .bind(data.amount())
            .bind(data.minutes())
            .bind(multiplier.start_millis())
            .bind(multiplier.queue_millis())
            .bind(multiplier.id())
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(Error::UnknownMultiplier(multiplier.id()));
            }
            Ok(())
        })
    }

    fn is_shared(&self) -> bool {
        true
    }
}
