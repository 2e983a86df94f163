use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::StoreError;
use crate::types::{
    Asset, AssetId, CloseReason, OrderBucketEntry, Position, PositionId, PositionState, Side,
    StopBucketEntry, StopType, TraderAddr,
};

use super::{
    IngestExecuted, IngestOpened, IngestRemoved, IngestStopsUpdated, ListOrder, PositionBuckets,
    Store, StoreOp,
};

/// `Store` over a Postgres pool. Every `apply` call is one transaction;
/// bucket rows are deleted and reinserted rather than diffed, matching the
/// teacher's "recompute, don't patch" style of state mutation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(StoreError::from)?;
        Ok(Self::new(pool))
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

fn side_code(side: Side) -> i16 {
    if side.is_long() { 0 } else { 1 }
}

async fn delete_order_buckets(tx: &mut Transaction<'_, Postgres>, id: PositionId) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM order_buckets WHERE position_id = $1")
        .bind(id as i64)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn delete_stop_buckets(
    tx: &mut Transaction<'_, Postgres>,
    id: PositionId,
    stop_types: &[i16],
) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM stop_buckets WHERE position_id = $1 AND stop_type = ANY($2)")
        .bind(id as i64)
        .bind(stop_types)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn insert_stop_bucket(
    tx: &mut Transaction<'_, Postgres>,
    asset_id: i32,
    bucket_id: Option<i64>,
    id: PositionId,
    stop_type: StopType,
    lots: i16,
    side: Side,
) -> Result<(), StoreError> {
    let Some(bucket_id) = bucket_id else {
        return Ok(());
    };
    sqlx::query(
        "INSERT INTO stop_buckets (asset_id, bucket_id, position_id, stop_type, lots, side)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (asset_id, bucket_id, position_id, stop_type) DO UPDATE SET lots = EXCLUDED.lots",
    )
    .bind(asset_id)
    .bind(bucket_id)
    .bind(id as i64)
    .bind(stop_type.as_i16())
    .bind(lots)
    .bind(side_code(side))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn apply(&self, op: StoreOp) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        match op {
            StoreOp::IngestOpened(op) => apply_ingest_opened(&mut tx, op).await?,
            StoreOp::IngestExecuted(op) => apply_ingest_executed(&mut tx, op).await?,
            StoreOp::IngestStopsUpdated(op) => apply_ingest_stops_updated(&mut tx, op).await?,
            StoreOp::IngestRemoved(op) => apply_ingest_removed(&mut tx, op).await?,
            StoreOp::PatchState { id, state } => {
                sqlx::query("UPDATE positions SET state = $2 WHERE id = $1")
                    .bind(id as i64)
                    .bind(state)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn read_position(&self, id: PositionId) -> Result<Option<Position>, StoreError> {
        let row = sqlx::query_as::<_, PositionRow>(
            "SELECT id, owner_addr, asset_id, state, long_side, lots, leverage_x, entry_x6,
                    target_x6, sl_x6, tp_x6, liq_x6, notional_usd6, margin_usd6, opened_at,
                    executed_at, closed_at, cancelled_at, close_reason, exec_x6, pnl_usd6,
                    last_tx_hash, last_block_num, target_bucket, sl_bucket, tp_bucket, liq_bucket
             FROM positions WHERE id = $1",
        )
        .bind(id as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Position::from))
    }

    async fn read_asset(&self, asset_id: AssetId) -> Result<Option<Asset>, StoreError> {
        let row = sqlx::query_as::<_, AssetRow>(
            "SELECT asset_id, symbol, tick_x6, lot_num, lot_den FROM assets WHERE asset_id = $1",
        )
        .bind(asset_id as i32)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Asset::from))
    }

    async fn read_buckets(&self, id: PositionId) -> Result<PositionBuckets, StoreError> {
        let order_rows = sqlx::query_as::<_, OrderBucketRow>(
            "SELECT asset_id, bucket_id, position_id, lots, side FROM order_buckets WHERE position_id = $1",
        )
        .bind(id as i64)
        .fetch_all(&self.pool)
        .await?;

        let stop_rows = sqlx::query_as::<_, StopBucketRow>(
            "SELECT asset_id, bucket_id, position_id, stop_type, lots, side FROM stop_buckets WHERE position_id = $1",
        )
        .bind(id as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(PositionBuckets {
            order: order_rows.into_iter().map(OrderBucketEntry::from).collect(),
            stops: stop_rows
                .into_iter()
                .filter_map(|r| StopBucketEntry::try_from(r).ok())
                .collect(),
        })
    }

    async fn list_ids(
        &self,
        limit: i64,
        offset: i64,
        order: ListOrder,
    ) -> Result<Vec<PositionId>, StoreError> {
        let query = match order {
            ListOrder::Asc => "SELECT id FROM positions ORDER BY id ASC LIMIT $1 OFFSET $2",
            ListOrder::Desc => "SELECT id FROM positions ORDER BY id DESC LIMIT $1 OFFSET $2",
        };
        let rows: Vec<(i64,)> = sqlx::query_as(query)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id as PositionId).collect())
    }

    async fn max_id(&self) -> Result<Option<PositionId>, StoreError> {
        let row: (Option<i64>,) = sqlx::query_as("SELECT max(id) FROM positions")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0.map(|id| id as PositionId))
    }
}

async fn apply_ingest_opened(
    tx: &mut Transaction<'_, Postgres>,
    op: IngestOpened,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO positions (id, owner_addr, asset_id, state, long_side, lots, leverage_x,
            entry_x6, target_x6, sl_x6, tp_x6, liq_x6, notional_usd6, margin_usd6,
            target_bucket, sl_bucket, tp_bucket, liq_bucket, last_tx_hash, last_block_num)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
         ON CONFLICT (id) DO UPDATE SET
            state = EXCLUDED.state,
            asset_id = EXCLUDED.asset_id,
            long_side = EXCLUDED.long_side,
            lots = EXCLUDED.lots,
            leverage_x = EXCLUDED.leverage_x,
            entry_x6 = EXCLUDED.entry_x6,
            target_x6 = EXCLUDED.target_x6,
            sl_x6 = EXCLUDED.sl_x6,
            tp_x6 = EXCLUDED.tp_x6,
            liq_x6 = EXCLUDED.liq_x6,
            notional_usd6 = EXCLUDED.notional_usd6,
            margin_usd6 = EXCLUDED.margin_usd6,
            target_bucket = EXCLUDED.target_bucket,
            sl_bucket = EXCLUDED.sl_bucket,
            tp_bucket = EXCLUDED.tp_bucket,
            liq_bucket = EXCLUDED.liq_bucket,
            last_tx_hash = EXCLUDED.last_tx_hash,
            last_block_num = EXCLUDED.last_block_num",
    )
    .bind(op.id as i64)
    .bind(op.trader.lowercase_hex())
    .bind(op.asset_id as i32)
    .bind(op.state)
    .bind(op.long_side)
    .bind(op.lots)
    .bind(op.leverage_x)
    .bind(op.entry_x6)
    .bind(op.target_x6)
    .bind(op.sl_x6)
    .bind(op.tp_x6)
    .bind(op.liq_x6)
    .bind(op.notional_usd6.map(|v| v.to_string()).as_deref().map(str_to_numeric))
    .bind(op.margin_usd6.map(|v| v.to_string()).as_deref().map(str_to_numeric))
    .bind(op.target_bucket)
    .bind(op.sl_bucket)
    .bind(op.tp_bucket)
    .bind(op.liq_bucket)
    .bind(op.seen_at.tx_hash.to_string())
    .bind(op.seen_at.block as i64)
    .execute(&mut **tx)
    .await?;

    delete_order_buckets(tx, op.id).await?;
    delete_stop_buckets(tx, op.id, &[1, 2, 3]).await?;

    match op.state {
        PositionState::Order => {
            if let Some(bucket_id) = op.target_bucket {
                sqlx::query(
                    "INSERT INTO order_buckets (asset_id, bucket_id, position_id, lots, side)
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(op.asset_id as i32)
                .bind(bucket_id)
                .bind(op.id as i64)
                .bind(op.lots)
                .bind(side_code(Side::of(op.long_side)))
                .execute(&mut **tx)
                .await?;
            }
        }
        PositionState::Open => {
            let antagonistic = Side::antagonistic(op.long_side);
            if op.sl_x6 != 0 {
                insert_stop_bucket(tx, op.asset_id as i32, op.sl_bucket, op.id, StopType::Sl, op.lots, antagonistic).await?;
            }
            if op.tp_x6 != 0 {
                insert_stop_bucket(tx, op.asset_id as i32, op.tp_bucket, op.id, StopType::Tp, op.lots, antagonistic).await?;
            }
            if op.liq_x6 != 0 {
                insert_stop_bucket(tx, op.asset_id as i32, op.liq_bucket, op.id, StopType::Liq, op.lots, antagonistic).await?;
            }
        }
        _ => {}
    }

    Ok(())
}

async fn apply_ingest_executed(
    tx: &mut Transaction<'_, Postgres>,
    op: IngestExecuted,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE positions SET
            state = 'OPEN',
            entry_x6 = $2,
            target_x6 = 0,
            notional_usd6 = $3,
            margin_usd6 = $4,
            executed_at = COALESCE(executed_at, now()),
            last_tx_hash = $5,
            last_block_num = $6
         WHERE id = $1",
    )
    .bind(op.id as i64)
    .bind(op.entry_x6)
    .bind(str_to_numeric(&op.notional_usd6.to_string()))
    .bind(str_to_numeric(&op.margin_usd6.to_string()))
    .bind(op.seen_at.tx_hash.to_string())
    .bind(op.seen_at.block as i64)
    .execute(&mut **tx)
    .await?;

    delete_order_buckets(tx, op.id).await?;
    delete_stop_buckets(tx, op.id, &[1, 2, 3]).await?;

    let long_side: (bool,) = sqlx::query_as("SELECT long_side FROM positions WHERE id = $1")
        .bind(op.id as i64)
        .fetch_one(&mut **tx)
        .await?;
    let antagonistic = Side::antagonistic(long_side.0);
    let asset_id: (i32,) = sqlx::query_as("SELECT asset_id FROM positions WHERE id = $1")
        .bind(op.id as i64)
        .fetch_one(&mut **tx)
        .await?;
    let lots: (i16,) = sqlx::query_as("SELECT lots FROM positions WHERE id = $1")
        .bind(op.id as i64)
        .fetch_one(&mut **tx)
        .await?;

    if op.sl_x6 != 0 {
        insert_stop_bucket(tx, asset_id.0, op.sl_bucket, op.id, StopType::Sl, lots.0, antagonistic).await?;
    }
    if op.tp_x6 != 0 {
        insert_stop_bucket(tx, asset_id.0, op.tp_bucket, op.id, StopType::Tp, lots.0, antagonistic).await?;
    }
    if op.liq_x6 != 0 {
        insert_stop_bucket(tx, asset_id.0, op.liq_bucket, op.id, StopType::Liq, lots.0, antagonistic).await?;
    }

    Ok(())
}

async fn apply_ingest_stops_updated(
    tx: &mut Transaction<'_, Postgres>,
    op: IngestStopsUpdated,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE positions SET sl_x6 = $2, tp_x6 = $3, sl_bucket = $4, tp_bucket = $5,
            last_tx_hash = $6, last_block_num = $7
         WHERE id = $1",
    )
    .bind(op.id as i64)
    .bind(op.sl_x6)
    .bind(op.tp_x6)
    .bind(op.sl_bucket)
    .bind(op.tp_bucket)
    .bind(op.seen_at.tx_hash.to_string())
    .bind(op.seen_at.block as i64)
    .execute(&mut **tx)
    .await?;

    delete_stop_buckets(tx, op.id, &[1, 2]).await?;

    let (asset_id, lots, long_side): (i32, i16, bool) =
        sqlx::query_as("SELECT asset_id, lots, long_side FROM positions WHERE id = $1")
            .bind(op.id as i64)
            .fetch_one(&mut **tx)
            .await?;
    let antagonistic = Side::antagonistic(long_side);

    if op.sl_x6 != 0 {
        insert_stop_bucket(tx, asset_id, op.sl_bucket, op.id, StopType::Sl, lots, antagonistic).await?;
    }
    if op.tp_x6 != 0 {
        insert_stop_bucket(tx, asset_id, op.tp_bucket, op.id, StopType::Tp, lots, antagonistic).await?;
    }

    Ok(())
}

async fn apply_ingest_removed(
    tx: &mut Transaction<'_, Postgres>,
    op: IngestRemoved,
) -> Result<(), StoreError> {
    let terminal = op.reason.terminal_state();
    match terminal {
        PositionState::Cancelled => {
            sqlx::query(
                "UPDATE positions SET state = 'CANCELLED', close_reason = $2, exec_x6 = $3,
                    pnl_usd6 = $4, cancelled_at = COALESCE(cancelled_at, now()),
                    last_tx_hash = $5, last_block_num = $6
                 WHERE id = $1",
            )
            .bind(op.id as i64)
            .bind(op.reason)
            .bind(op.exec_x6)
            .bind(str_to_numeric(&op.pnl_usd6.to_string()))
            .bind(op.seen_at.tx_hash.to_string())
            .bind(op.seen_at.block as i64)
            .execute(&mut **tx)
            .await?;
        }
        _ => {
            sqlx::query(
                "UPDATE positions SET state = 'CLOSED', close_reason = $2, exec_x6 = $3,
                    pnl_usd6 = $4, closed_at = COALESCE(closed_at, now()),
                    last_tx_hash = $5, last_block_num = $6
                 WHERE id = $1",
            )
            .bind(op.id as i64)
            .bind(op.reason)
            .bind(op.exec_x6)
            .bind(str_to_numeric(&op.pnl_usd6.to_string()))
            .bind(op.seen_at.tx_hash.to_string())
            .bind(op.seen_at.block as i64)
            .execute(&mut **tx)
            .await?;
        }
    }

    delete_order_buckets(tx, op.id).await?;
    delete_stop_buckets(tx, op.id, &[1, 2, 3]).await?;

    Ok(())
}

/// `NUMERIC` columns carry i128 magnitudes `sqlx` has no native bind for;
/// round-tripping through Postgres's own decimal text form keeps precision
/// without pulling in `bigdecimal` for a single conversion.
fn str_to_numeric(value: &str) -> sqlx::types::Decimal {
    value.parse().unwrap_or_default()
}

#[derive(sqlx::FromRow)]
struct PositionRow {
    id: i64,
    owner_addr: String,
    asset_id: i32,
    state: PositionState,
    long_side: bool,
    lots: i16,
    leverage_x: i16,
    entry_x6: i64,
    target_x6: i64,
    sl_x6: i64,
    tp_x6: i64,
    liq_x6: i64,
    notional_usd6: Option<sqlx::types::Decimal>,
    margin_usd6: Option<sqlx::types::Decimal>,
    opened_at: DateTime<Utc>,
    executed_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    close_reason: Option<CloseReason>,
    exec_x6: Option<i64>,
    pnl_usd6: Option<sqlx::types::Decimal>,
    last_tx_hash: Option<String>,
    last_block_num: Option<i64>,
    target_bucket: Option<i64>,
    sl_bucket: Option<i64>,
    tp_bucket: Option<i64>,
    liq_bucket: Option<i64>,
}

impl From<PositionRow> for Position {
    fn from(row: PositionRow) -> Self {
        let _ = (row.exec_x6, row.pnl_usd6);
        Position {
            id: row.id as PositionId,
            state: row.state,
            asset_id: row.asset_id as u32,
            trader_addr: parse_addr(&row.owner_addr),
            long_side: row.long_side,
            lots: row.lots,
            leverage_x: row.leverage_x,
            entry_x6: row.entry_x6,
            target_x6: row.target_x6,
            sl_x6: row.sl_x6,
            tp_x6: row.tp_x6,
            liq_x6: row.liq_x6,
            notional_usd6: row.notional_usd6.map(|d| decimal_to_i128(&d)),
            margin_usd6: row.margin_usd6.map(|d| decimal_to_i128(&d)),
            close_reason: row.close_reason,
            opened_at: row.opened_at,
            executed_at: row.executed_at,
            closed_at: row.closed_at,
            cancelled_at: row.cancelled_at,
            last_tx_hash: row.last_tx_hash,
            last_block_num: row.last_block_num,
            target_bucket: row.target_bucket,
            sl_bucket: row.sl_bucket,
            tp_bucket: row.tp_bucket,
            liq_bucket: row.liq_bucket,
        }
    }
}

fn parse_addr(raw: &str) -> TraderAddr {
    raw.parse()
        .map(TraderAddr::new)
        .unwrap_or_else(|_| TraderAddr::new(alloy::primitives::Address::ZERO))
}

fn decimal_to_i128(value: &sqlx::types::Decimal) -> i128 {
    value.to_string().parse().unwrap_or(0)
}

#[derive(sqlx::FromRow)]
struct AssetRow {
    asset_id: i32,
    symbol: String,
    tick_x6: i64,
    lot_num: sqlx::types::Decimal,
    lot_den: sqlx::types::Decimal,
}

impl From<AssetRow> for Asset {
    fn from(row: AssetRow) -> Self {
        Asset {
            asset_id: row.asset_id as u32,
            symbol: row.symbol,
            tick_x6: row.tick_x6,
            lot_num: row.lot_num.to_string().parse().unwrap_or(1),
            lot_den: row.lot_den.to_string().parse().unwrap_or(1),
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrderBucketRow {
    asset_id: i32,
    bucket_id: i64,
    position_id: i64,
    lots: i16,
    side: i16,
}

impl From<OrderBucketRow> for OrderBucketEntry {
    fn from(row: OrderBucketRow) -> Self {
        OrderBucketEntry {
            asset_id: row.asset_id as u32,
            bucket_id: row.bucket_id,
            position_id: row.position_id as PositionId,
            lots: row.lots,
            side: if row.side == 0 { Side::Long } else { Side::Short },
        }
    }
}

#[derive(sqlx::FromRow)]
struct StopBucketRow {
    asset_id: i32,
    bucket_id: i64,
    position_id: i64,
    stop_type: i16,
    lots: i16,
    side: i16,
}

impl TryFrom<StopBucketRow> for StopBucketEntry {
    type Error = ();

    fn try_from(row: StopBucketRow) -> Result<Self, Self::Error> {
        let stop_type = match row.stop_type {
            1 => StopType::Sl,
            2 => StopType::Tp,
            3 => StopType::Liq,
            _ => return Err(()),
        };
        Ok(StopBucketEntry {
            asset_id: row.asset_id as u32,
            bucket_id: row.bucket_id,
            position_id: row.position_id as PositionId,
            stop_type,
            lots: row.lots,
            side: if row.side == 0 { Side::Long } else { Side::Short },
        })
    }
}
