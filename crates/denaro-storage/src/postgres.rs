//! Postgres adapter implementing the authoritative schema.
//!
//! All NUMERIC columns are cast to integers at the SQL boundary (tenths for
//! difficulty, smallest units for money), so Rust only ever sees `i64`.
//! Writes run inside a single SQL transaction per unit of work.

use crate::ports::{ChainStore, PendingOrder, ResolvedUtxo, StoreError, StoreOp};
use async_trait::async_trait;
use denaro_types::{
    hash_from_hex, hash_to_hex, Amount, BlockRecord, Difficulty, Hash, OutPoint, PendingTxRecord,
    TxRecord,
};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, Row, Transaction as PgTransaction};
use tracing::{error, warn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS blocks (
    id SERIAL PRIMARY KEY,
    hash CHAR(64) UNIQUE NOT NULL,
    content TEXT NOT NULL,
    address VARCHAR(128) NOT NULL,
    random BIGINT NOT NULL,
    difficulty NUMERIC(3,1) NOT NULL,
    reward NUMERIC(14,6) NOT NULL,
    timestamp BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS transactions (
    block_hash CHAR(64) NOT NULL REFERENCES blocks (hash) ON DELETE CASCADE,
    tx_hash CHAR(64) UNIQUE NOT NULL,
    tx_hex TEXT NOT NULL,
    inputs_addresses TEXT[] NOT NULL,
    outputs_addresses TEXT[] NOT NULL,
    outputs_amounts BIGINT[] NOT NULL,
    fees NUMERIC(14,6) NOT NULL,
    time_received BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS unspent_outputs (
    tx_hash CHAR(64) NOT NULL REFERENCES transactions (tx_hash) ON DELETE CASCADE,
    \"index\" SMALLINT NOT NULL,
    address TEXT NOT NULL,
    PRIMARY KEY (tx_hash, \"index\")
);
CREATE TABLE IF NOT EXISTS pending_transactions (
    tx_hash CHAR(64) UNIQUE NOT NULL,
    tx_hex TEXT NOT NULL,
    inputs_addresses TEXT[] NOT NULL,
    fees NUMERIC(14,6) NOT NULL,
    propagation_time BIGINT NOT NULL,
    time_received BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS pending_spent_outputs (
    tx_hash CHAR(64) NOT NULL REFERENCES transactions (tx_hash) ON DELETE CASCADE,
    \"index\" SMALLINT NOT NULL,
    PRIMARY KEY (tx_hash, \"index\")
);
CREATE INDEX IF NOT EXISTS unspent_outputs_tx_hash_idx ON unspent_outputs (tx_hash);
CREATE INDEX IF NOT EXISTS transactions_block_hash_idx ON transactions (block_hash);
";

const BLOCK_COLUMNS: &str = "id::int8 AS id, hash, content, address, random, \
     (difficulty * 10)::int4 AS difficulty_tenths, \
     (reward * 1000000)::int8 AS reward_units, timestamp";

const TX_COLUMNS: &str = "block_hash, tx_hash, tx_hex, inputs_addresses, outputs_addresses, \
     outputs_amounts, (fees * 1000000)::int8 AS fee_units, time_received";

const PENDING_COLUMNS: &str = "tx_hash, tx_hex, inputs_addresses, \
     (fees * 1000000)::int8 AS fee_units, propagation_time, time_received";

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl PostgresConfig {
    fn connection_string(&self) -> String {
        format!(
            "host={} dbname={} user={} password={}",
            self.host, self.database, self.user, self.password
        )
    }
}

/// A `ChainStore` over one exclusively-owned Postgres database.
pub struct PostgresStore {
    config: PostgresConfig,
    client: Mutex<Client>,
}

impl PostgresStore {
    /// Connect and bootstrap the schema, retrying with capped backoff.
    pub async fn connect(config: PostgresConfig) -> Result<PostgresStore, StoreError> {
        let client = connect_with_backoff(&config).await?;
        client
            .batch_execute(SCHEMA)
            .await
            .map_err(map_pg_error)?;
        Ok(PostgresStore {
            config,
            client: Mutex::new(client),
        })
    }

    async fn write_ops(tx: &PgTransaction<'_>, ops: &[StoreOp]) -> Result<(), tokio_postgres::Error> {
        for op in ops {
            match op {
                StoreOp::InsertBlock(block) => {
                    tx.execute(
                        "INSERT INTO blocks (id, hash, content, address, random, difficulty, reward, timestamp) \
                         VALUES ($1::int4, $2, $3, $4, $5::int8, $6::int4::numeric / 10, $7::int8::numeric / 1000000, $8::int8)",
                        &[
                            &(block.id as i32),
                            &hash_to_hex(&block.hash),
                            &block.content,
                            &block.miner_address,
                            &(block.nonce as i64),
                            &i32::from(block.difficulty.tenths()),
                            &(block.reward.units() as i64),
                            &(block.timestamp as i64),
                        ],
                    )
                    .await?;
                }
                StoreOp::InsertTransactions(records) => {
                    for record in records {
                        let amounts: Vec<i64> = record
                            .outputs_amounts
                            .iter()
                            .map(|a| a.units() as i64)
                            .collect();
                        tx.execute(
                            "INSERT INTO transactions (block_hash, tx_hash, tx_hex, inputs_addresses, \
                             outputs_addresses, outputs_amounts, fees, time_received) \
                             VALUES ($1, $2, $3, $4, $5, $6, $7::int8::numeric / 1000000, $8::int8)",
                            &[
                                &hash_to_hex(&record.block_hash),
                                &hash_to_hex(&record.tx_hash),
                                &record.tx_hex,
                                &record.inputs_addresses,
                                &record.outputs_addresses,
                                &amounts,
                                &(record.fees.units() as i64),
                                &(record.time_received as i64),
                            ],
                        )
                        .await?;
                    }
                }
                StoreOp::SpendOutput(outpoint) => {
                    tx.execute(
                        "DELETE FROM unspent_outputs WHERE tx_hash = $1 AND \"index\" = $2::int2",
                        &[&hash_to_hex(&outpoint.tx_hash), &i16::from(outpoint.index)],
                    )
                    .await?;
                }
                StoreOp::CreateOutput(entry) => {
                    tx.execute(
                        "INSERT INTO unspent_outputs (tx_hash, \"index\", address) \
                         VALUES ($1, $2::int2, $3) ON CONFLICT DO NOTHING",
                        &[
                            &hash_to_hex(&entry.tx_hash),
                            &i16::from(entry.index),
                            &entry.address,
                        ],
                    )
                    .await?;
                }
                StoreOp::DeleteBlock(height) => {
                    tx.execute(
                        "DELETE FROM blocks WHERE id = $1::int4",
                        &[&(*height as i32)],
                    )
                    .await?;
                }
                StoreOp::UpsertPending(record) => {
                    tx.execute(
                        "INSERT INTO pending_transactions (tx_hash, tx_hex, inputs_addresses, fees, \
                         propagation_time, time_received) \
                         VALUES ($1, $2, $3, $4::int8::numeric / 1000000, $5::int8, $6::int8) \
                         ON CONFLICT (tx_hash) DO UPDATE SET propagation_time = EXCLUDED.propagation_time",
                        &[
                            &hash_to_hex(&record.tx_hash),
                            &record.tx_hex,
                            &record.inputs_addresses,
                            &(record.fees.units() as i64),
                            &(record.propagation_time as i64),
                            &(record.time_received as i64),
                        ],
                    )
                    .await?;
                }
                StoreOp::DeletePending(tx_hash) => {
                    tx.execute(
                        "DELETE FROM pending_transactions WHERE tx_hash = $1",
                        &[&hash_to_hex(tx_hash)],
                    )
                    .await?;
                }
                StoreOp::ReserveOutputs(outpoints) => {
                    for outpoint in outpoints {
                        tx.execute(
                            "INSERT INTO pending_spent_outputs (tx_hash, \"index\") \
                             VALUES ($1, $2::int2) ON CONFLICT DO NOTHING",
                            &[&hash_to_hex(&outpoint.tx_hash), &i16::from(outpoint.index)],
                        )
                        .await?;
                    }
                }
                StoreOp::ReleaseOutputs(outpoints) => {
                    for outpoint in outpoints {
                        tx.execute(
                            "DELETE FROM pending_spent_outputs WHERE tx_hash = $1 AND \"index\" = $2::int2",
                            &[&hash_to_hex(&outpoint.tx_hash), &i16::from(outpoint.index)],
                        )
                        .await?;
                    }
                }
                StoreOp::ClearPending => {
                    tx.execute("DELETE FROM pending_spent_outputs", &[]).await?;
                    tx.execute("DELETE FROM pending_transactions", &[]).await?;
                }
            }
        }
        Ok(())
    }
}

async fn connect_with_backoff(config: &PostgresConfig) -> Result<Client, StoreError> {
    let mut delay = Duration::from_millis(500);
    let mut last_error = String::new();
    for attempt in 0..5 {
        match tokio_postgres::connect(&config.connection_string(), NoTls).await {
            Ok((client, connection)) => {
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        error!(error = %e, "database connection terminated");
                    }
                });
                return Ok(client);
            }
            Err(e) => {
                last_error = e.to_string();
                warn!(attempt, error = %e, "database connect failed, backing off");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(8));
            }
        }
    }
    Err(StoreError::Unavailable(last_error))
}

fn map_pg_error(err: tokio_postgres::Error) -> StoreError {
    if err.is_closed() {
        return StoreError::Unavailable(err.to_string());
    }
    match err.code() {
        Some(&SqlState::UNIQUE_VIOLATION) | Some(&SqlState::FOREIGN_KEY_VIOLATION) => {
            StoreError::Conflict(err.to_string())
        }
        _ => StoreError::Internal(err.to_string()),
    }
}

fn parse_hash(s: &str) -> Result<Hash, StoreError> {
    hash_from_hex(s.trim()).ok_or_else(|| StoreError::Corrupt(format!("bad hash column: {s}")))
}

fn parse_units(units: i64) -> Result<Amount, StoreError> {
    u64::try_from(units)
        .ok()
        .and_then(Amount::from_units)
        .ok_or_else(|| StoreError::Corrupt(format!("negative amount column: {units}")))
}

fn block_from_row(row: &Row) -> Result<BlockRecord, StoreError> {
    Ok(BlockRecord {
        id: row.get::<_, i64>("id") as u64,
        hash: parse_hash(row.get("hash"))?,
        content: row.get("content"),
        miner_address: row.get("address"),
        nonce: row.get::<_, i64>("random") as u64,
        difficulty: Difficulty::from_tenths(row.get::<_, i32>("difficulty_tenths") as u16),
        reward: parse_units(row.get("reward_units"))?,
        timestamp: row.get::<_, i64>("timestamp") as u64,
    })
}

fn tx_from_row(row: &Row) -> Result<TxRecord, StoreError> {
    let amounts: Vec<i64> = row.get("outputs_amounts");
    Ok(TxRecord {
        block_hash: parse_hash(row.get("block_hash"))?,
        tx_hash: parse_hash(row.get("tx_hash"))?,
        tx_hex: row.get("tx_hex"),
        inputs_addresses: row.get("inputs_addresses"),
        outputs_addresses: row.get("outputs_addresses"),
        outputs_amounts: amounts
            .into_iter()
            .map(parse_units)
            .collect::<Result<_, _>>()?,
        fees: parse_units(row.get("fee_units"))?,
        time_received: row.get::<_, i64>("time_received") as u64,
    })
}

fn pending_from_row(row: &Row) -> Result<PendingTxRecord, StoreError> {
    Ok(PendingTxRecord {
        tx_hash: parse_hash(row.get("tx_hash"))?,
        tx_hex: row.get("tx_hex"),
        inputs_addresses: row.get("inputs_addresses"),
        fees: parse_units(row.get("fee_units"))?,
        propagation_time: row.get::<_, i64>("propagation_time") as u64,
        time_received: row.get::<_, i64>("time_received") as u64,
    })
}

#[async_trait]
impl ChainStore for PostgresStore {
    async fn apply(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        let mut guard = self.client.lock().await;
        if guard.is_closed() {
            *guard = connect_with_backoff(&self.config).await?;
        }
        let tx = guard.transaction().await.map_err(map_pg_error)?;
        Self::write_ops(&tx, &ops).await.map_err(map_pg_error)?;
        tx.commit().await.map_err(map_pg_error)
    }

    async fn get_tip(&self) -> Result<Option<BlockRecord>, StoreError> {
        let guard = self.client.lock().await;
        let row = guard
            .query_opt(
                &*format!("SELECT {BLOCK_COLUMNS} FROM blocks ORDER BY id DESC LIMIT 1"),
                &[],
            )
            .await
            .map_err(map_pg_error)?;
        row.as_ref().map(block_from_row).transpose()
    }

    async fn get_block_by_height(&self, height: u64) -> Result<Option<BlockRecord>, StoreError> {
        let guard = self.client.lock().await;
        let row = guard
            .query_opt(
                &*format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE id = $1::int4"),
                &[&(height as i32)],
            )
            .await
            .map_err(map_pg_error)?;
        row.as_ref().map(block_from_row).transpose()
    }

    async fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<BlockRecord>, StoreError> {
        let guard = self.client.lock().await;
        let row = guard
            .query_opt(
                &*format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE hash = $1"),
                &[&hash_to_hex(hash)],
            )
            .await
            .map_err(map_pg_error)?;
        row.as_ref().map(block_from_row).transpose()
    }

    async fn get_block_range(&self, lo: u64, hi: u64) -> Result<Vec<BlockRecord>, StoreError> {
        let guard = self.client.lock().await;
        let rows = guard
            .query(
                &*format!(
                    "SELECT {BLOCK_COLUMNS} FROM blocks \
                     WHERE id >= $1::int4 AND id <= $2::int4 ORDER BY id"
                ),
                &[&(lo as i32), &(hi as i32)],
            )
            .await
            .map_err(map_pg_error)?;
        rows.iter().map(block_from_row).collect()
    }

    async fn get_block_transactions(&self, block_hash: &Hash) -> Result<Vec<TxRecord>, StoreError> {
        let guard = self.client.lock().await;
        let rows = guard
            .query(
                &*format!("SELECT {TX_COLUMNS} FROM transactions WHERE block_hash = $1"),
                &[&hash_to_hex(block_hash)],
            )
            .await
            .map_err(map_pg_error)?;
        rows.iter().map(tx_from_row).collect()
    }

    async fn get_transaction(&self, tx_hash: &Hash) -> Result<Option<TxRecord>, StoreError> {
        let guard = self.client.lock().await;
        let row = guard
            .query_opt(
                &*format!("SELECT {TX_COLUMNS} FROM transactions WHERE tx_hash = $1"),
                &[&hash_to_hex(tx_hash)],
            )
            .await
            .map_err(map_pg_error)?;
        row.as_ref().map(tx_from_row).transpose()
    }

    async fn get_unspent_outputs(
        &self,
        outpoints: &[OutPoint],
    ) -> Result<Vec<ResolvedUtxo>, StoreError> {
        let guard = self.client.lock().await;
        let mut result = Vec::with_capacity(outpoints.len());
        for outpoint in outpoints {
            let row = guard
                .query_opt(
                    "SELECT u.address, t.outputs_amounts[u.\"index\" + 1] AS units \
                     FROM unspent_outputs u \
                     JOIN transactions t ON t.tx_hash = u.tx_hash \
                     WHERE u.tx_hash = $1 AND u.\"index\" = $2::int2",
                    &[&hash_to_hex(&outpoint.tx_hash), &i16::from(outpoint.index)],
                )
                .await
                .map_err(map_pg_error)?;
            if let Some(row) = row {
                result.push(ResolvedUtxo {
                    outpoint: *outpoint,
                    address: row.get("address"),
                    amount: parse_units(row.get("units"))?,
                });
            }
        }
        Ok(result)
    }

    async fn get_unspent_for_address(
        &self,
        address: &str,
    ) -> Result<Vec<ResolvedUtxo>, StoreError> {
        let guard = self.client.lock().await;
        let rows = guard
            .query(
                "SELECT u.tx_hash, u.\"index\"::int4 AS idx, u.address, \
                 t.outputs_amounts[u.\"index\" + 1] AS units \
                 FROM unspent_outputs u \
                 JOIN transactions t ON t.tx_hash = u.tx_hash \
                 WHERE u.address = $1 ORDER BY u.tx_hash, u.\"index\"",
                &[&address],
            )
            .await
            .map_err(map_pg_error)?;
        rows.iter()
            .map(|row| {
                Ok(ResolvedUtxo {
                    outpoint: OutPoint {
                        tx_hash: parse_hash(row.get("tx_hash"))?,
                        index: row.get::<_, i32>("idx") as u8,
                    },
                    address: row.get("address"),
                    amount: parse_units(row.get("units"))?,
                })
            })
            .collect()
    }

    async fn get_supply(&self) -> Result<Amount, StoreError> {
        let guard = self.client.lock().await;
        let row = guard
            .query_one(
                "SELECT COALESCE((SUM(reward) * 1000000)::int8, 0::int8) AS units FROM blocks",
                &[],
            )
            .await
            .map_err(map_pg_error)?;
        parse_units(row.get("units"))
    }

    async fn list_pending(&self, order: PendingOrder) -> Result<Vec<PendingTxRecord>, StoreError> {
        let order_sql = match order {
            PendingOrder::FeeDesc => {
                "(fees * 1000000)::int8 / GREATEST(length(tx_hex), 1) DESC, time_received ASC"
            }
            PendingOrder::OldestFirst => "time_received ASC",
        };
        let guard = self.client.lock().await;
        let rows = guard
            .query(
                &*format!(
                    "SELECT {PENDING_COLUMNS} FROM pending_transactions ORDER BY {order_sql}"
                ),
                &[],
            )
            .await
            .map_err(map_pg_error)?;
        rows.iter().map(pending_from_row).collect()
    }

    async fn get_pending(&self, tx_hash: &Hash) -> Result<Option<PendingTxRecord>, StoreError> {
        let guard = self.client.lock().await;
        let row = guard
            .query_opt(
                &*format!("SELECT {PENDING_COLUMNS} FROM pending_transactions WHERE tx_hash = $1"),
                &[&hash_to_hex(tx_hash)],
            )
            .await
            .map_err(map_pg_error)?;
        row.as_ref().map(pending_from_row).transpose()
    }

    async fn get_pending_by_hashes(
        &self,
        hashes: &[Hash],
    ) -> Result<Vec<PendingTxRecord>, StoreError> {
        let hex_hashes: Vec<String> = hashes.iter().map(hash_to_hex).collect();
        let guard = self.client.lock().await;
        let rows = guard
            .query(
                &*format!(
                    "SELECT {PENDING_COLUMNS} FROM pending_transactions WHERE tx_hash = ANY($1)"
                ),
                &[&hex_hashes],
            )
            .await
            .map_err(map_pg_error)?;
        rows.iter().map(pending_from_row).collect()
    }

    async fn count_pending(&self) -> Result<u64, StoreError> {
        let guard = self.client.lock().await;
        let row = guard
            .query_one("SELECT COUNT(*) AS n FROM pending_transactions", &[])
            .await
            .map_err(map_pg_error)?;
        Ok(row.get::<_, i64>("n") as u64)
    }

    async fn reserved_outpoints(&self, outpoints: &[OutPoint]) -> Result<Vec<OutPoint>, StoreError> {
        let guard = self.client.lock().await;
        let mut reserved = Vec::new();
        for outpoint in outpoints {
            let row = guard
                .query_opt(
                    "SELECT 1 FROM pending_spent_outputs WHERE tx_hash = $1 AND \"index\" = $2::int2",
                    &[&hash_to_hex(&outpoint.tx_hash), &i16::from(outpoint.index)],
                )
                .await
                .map_err(map_pg_error)?;
            if row.is_some() {
                reserved.push(*outpoint);
            }
        }
        Ok(reserved)
    }

    async fn pending_needing_propagation(
        &self,
        cutoff: u64,
    ) -> Result<Vec<PendingTxRecord>, StoreError> {
        let guard = self.client.lock().await;
        let rows = guard
            .query(
                &*format!(
                    "SELECT {PENDING_COLUMNS} FROM pending_transactions \
                     WHERE propagation_time < $1::int8 ORDER BY time_received"
                ),
                &[&(cutoff as i64)],
            )
            .await
            .map_err(map_pg_error)?;
        rows.iter().map(pending_from_row).collect()
    }

    async fn mark_pending_propagated(&self, hashes: &[Hash], now: u64) -> Result<(), StoreError> {
        let hex_hashes: Vec<String> = hashes.iter().map(hash_to_hex).collect();
        let guard = self.client.lock().await;
        guard
            .execute(
                "UPDATE pending_transactions SET propagation_time = $1::int8 WHERE tx_hash = ANY($2)",
                &[&(now as i64), &hex_hashes],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(())
    }
}
