// Copyright 2025 Chainflip Labs GmbH
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Rebalance operations: one liquidity move each, possibly multi-leg.
//! Creation inserts the operation and its origin receipts in a single
//! transaction; updates merge per-chain receipts rather than replacing them.

use super::{
	transactions::{upsert_operation_transaction, Transaction, TransactionReceiptInput},
	Database, DbError,
};
use chrono::{DateTime, Utc};
use mark_primitives::{
	status::{BridgeTag, OperationType, RebalanceStatus, TransactionReason},
	ChainIdentifier, TickerHash,
};
use serde::Serialize;
use sqlx::QueryBuilder;
use std::{collections::HashMap, str::FromStr};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceOperation {
	pub id: Uuid,
	pub earmark_id: Option<Uuid>,
	pub origin_chain_id: ChainIdentifier,
	pub destination_chain_id: ChainIdentifier,
	pub ticker_hash: TickerHash,
	/// Origin-chain native decimals.
	pub amount: String,
	/// Deci-basis points; 10000 = 1%.
	pub slippage_dbps: u64,
	pub status: RebalanceStatus,
	pub bridge: BridgeTag,
	pub operation_type: OperationType,
	/// Captured at creation; where the destination leg must deliver.
	pub recipient: Option<String>,
	/// Recorded receipts keyed by chain id. Omitted when none exist.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub transactions: Option<HashMap<String, Transaction>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl RebalanceOperation {
	pub fn transaction_for_chain(&self, chain_id: ChainIdentifier) -> Option<&Transaction> {
		self.transactions.as_ref().and_then(|txs| txs.get(&chain_id.to_string()))
	}

	pub fn origin_transaction(&self) -> Option<&Transaction> {
		self.transaction_for_chain(self.origin_chain_id)
	}
}

#[derive(Debug, Clone)]
pub struct CreateRebalanceOperation {
	pub earmark_id: Option<Uuid>,
	pub origin_chain_id: ChainIdentifier,
	pub destination_chain_id: ChainIdentifier,
	pub ticker_hash: TickerHash,
	pub amount: String,
	pub slippage_dbps: u64,
	pub bridge: BridgeTag,
	pub operation_type: OperationType,
	pub recipient: Option<String>,
	/// Origin receipts keyed by chain id, recorded with reason `Rebalance`.
	pub transactions: HashMap<String, TransactionReceiptInput>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateRebalanceOperation {
	pub status: Option<RebalanceStatus>,
	/// Merged into the recorded receipts, keyed by chain id.
	pub tx_hashes: Option<HashMap<String, TransactionReceiptInput>>,
}

#[derive(Debug, Clone, Default)]
pub struct RebalanceOperationFilter {
	pub statuses: Option<Vec<RebalanceStatus>>,
	/// Matches `origin_chain_id`.
	pub chain_id: Option<ChainIdentifier>,
	/// `Some(None)` selects threshold-driven operations (no earmark).
	pub earmark_id: Option<Option<Uuid>>,
}

#[derive(sqlx::FromRow)]
struct RebalanceOperationRow {
	id: Uuid,
	earmark_id: Option<Uuid>,
	origin_chain_id: i64,
	destination_chain_id: i64,
	ticker_hash: String,
	amount: String,
	slippage: i64,
	status: String,
	bridge: String,
	operation_type: String,
	recipient: Option<String>,
	created_at: DateTime<Utc>,
	updated_at: DateTime<Utc>,
}

impl TryFrom<RebalanceOperationRow> for RebalanceOperation {
	type Error = DbError;

	fn try_from(row: RebalanceOperationRow) -> Result<Self, Self::Error> {
		Ok(RebalanceOperation {
			id: row.id,
			earmark_id: row.earmark_id,
			origin_chain_id: row.origin_chain_id as ChainIdentifier,
			destination_chain_id: row.destination_chain_id as ChainIdentifier,
			ticker_hash: TickerHash::new(row.ticker_hash),
			amount: row.amount,
			slippage_dbps: row.slippage as u64,
			status: RebalanceStatus::from_str(&row.status).map_err(|_| {
				DbError::Decode(format!("unknown rebalance status '{}'", row.status))
			})?,
			bridge: BridgeTag::from_str(&row.bridge)
				.map_err(|_| DbError::Decode(format!("unknown bridge tag '{}'", row.bridge)))?,
			operation_type: OperationType::from_str(&row.operation_type).map_err(|_| {
				DbError::Decode(format!("unknown operation type '{}'", row.operation_type))
			})?,
			recipient: row.recipient,
			transactions: None,
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
	}
}

const OPERATION_COLUMNS: &str = "id, earmark_id, origin_chain_id, destination_chain_id, \
	ticker_hash, amount, slippage, status, bridge, operation_type, recipient, created_at, \
	updated_at";

impl Database {
	/// Inserts the operation and one transaction row per `(chainId, receipt)`
	/// in `input.transactions`, atomically. Returns the operation merged with
	/// its transactions.
	pub async fn create_rebalance_operation(
		&self,
		input: CreateRebalanceOperation,
	) -> Result<RebalanceOperation, DbError> {
		let mut tx = self.pool().begin().await?;

		let row = sqlx::query_as::<_, RebalanceOperationRow>(&format!(
			"INSERT INTO rebalance_operations (id, earmark_id, origin_chain_id, \
				destination_chain_id, ticker_hash, amount, slippage, status, bridge, \
				operation_type, recipient) \
			VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
			RETURNING {OPERATION_COLUMNS}"
		))
		.bind(Uuid::new_v4())
		.bind(input.earmark_id)
		.bind(input.origin_chain_id as i64)
		.bind(input.destination_chain_id as i64)
		.bind(input.ticker_hash.as_str())
		.bind(&input.amount)
		.bind(input.slippage_dbps as i64)
		.bind(RebalanceStatus::Pending.to_string())
		.bind(input.bridge.to_string())
		.bind(input.operation_type.to_string())
		.bind(&input.recipient)
		.fetch_one(&mut *tx)
		.await?;

		for (chain_id, receipt) in &input.transactions {
			upsert_operation_transaction(
				&mut *tx,
				row.id,
				chain_id,
				TransactionReason::Rebalance,
				receipt,
			)
			.await?;
		}

		tx.commit().await?;

		let operation = RebalanceOperation::try_from(row)?;
		self.hydrate(vec![operation]).await.map(|mut ops| ops.remove(0))
	}

	/// Updates only the provided fields; `tx_hashes` merge by chain id.
	pub async fn update_rebalance_operation(
		&self,
		id: Uuid,
		update: UpdateRebalanceOperation,
	) -> Result<RebalanceOperation, DbError> {
		let mut tx = self.pool().begin().await?;

		let row = sqlx::query_as::<_, RebalanceOperationRow>(&format!(
			"UPDATE rebalance_operations \
			SET status = COALESCE($2, status), updated_at = NOW() \
			WHERE id = $1 \
			RETURNING {OPERATION_COLUMNS}"
		))
		.bind(id)
		.bind(update.status.map(|status| status.to_string()))
		.fetch_optional(&mut *tx)
		.await?
		.ok_or(DbError::NotFound { entity: "rebalance operation", id: id.to_string() })?;

		if let Some(tx_hashes) = &update.tx_hashes {
			for (chain_id, receipt) in tx_hashes {
				upsert_operation_transaction(
					&mut *tx,
					id,
					chain_id,
					TransactionReason::Rebalance,
					receipt,
				)
				.await?;
			}
		}

		tx.commit().await?;

		let operation = RebalanceOperation::try_from(row)?;
		self.hydrate(vec![operation]).await.map(|mut ops| ops.remove(0))
	}

	/// Operations attached to the earmark, in creation order.
	pub async fn get_rebalance_operations_by_earmark(
		&self,
		earmark_id: Uuid,
	) -> Result<Vec<RebalanceOperation>, DbError> {
		let rows = sqlx::query_as::<_, RebalanceOperationRow>(&format!(
			"SELECT {OPERATION_COLUMNS} FROM rebalance_operations \
			WHERE earmark_id = $1 ORDER BY created_at ASC"
		))
		.bind(earmark_id)
		.fetch_all(self.pool())
		.await?;

		self.hydrate(rows.into_iter().map(TryFrom::try_from).collect::<Result<_, _>>()?).await
	}

	pub async fn get_rebalance_operations(
		&self,
		filter: RebalanceOperationFilter,
	) -> Result<Vec<RebalanceOperation>, DbError> {
		let mut query = QueryBuilder::new(format!(
			"SELECT {OPERATION_COLUMNS} FROM rebalance_operations WHERE TRUE"
		));
		if let Some(statuses) = &filter.statuses {
			query.push(" AND status = ANY(").push_bind(
				statuses.iter().map(ToString::to_string).collect::<Vec<_>>(),
			);
			query.push(")");
		}
		if let Some(chain_id) = filter.chain_id {
			query.push(" AND origin_chain_id = ").push_bind(chain_id as i64);
		}
		match filter.earmark_id {
			Some(Some(earmark_id)) => {
				query.push(" AND earmark_id = ").push_bind(earmark_id);
			},
			Some(None) => {
				query.push(" AND earmark_id IS NULL");
			},
			None => {},
		}
		query.push(" ORDER BY created_at ASC");

		let rows = query.build_query_as::<RebalanceOperationRow>().fetch_all(self.pool()).await?;
		self.hydrate(rows.into_iter().map(TryFrom::try_from).collect::<Result<_, _>>()?).await
	}

	/// Case-insensitive on the transaction hash. Returns the parent operation
	/// hydrated with every transaction of every chain it touched.
	pub async fn get_rebalance_operation_by_transaction_hash(
		&self,
		transaction_hash: &str,
		chain_id: &str,
	) -> Result<Option<RebalanceOperation>, DbError> {
		let row = sqlx::query_as::<_, RebalanceOperationRow>(&format!(
			"SELECT ro.id, ro.earmark_id, ro.origin_chain_id, ro.destination_chain_id, \
				ro.ticker_hash, ro.amount, ro.slippage, ro.status, ro.bridge, \
				ro.operation_type, ro.recipient, ro.created_at, ro.updated_at \
			FROM rebalance_operations ro \
			JOIN transactions t ON t.rebalance_operation_id = ro.id \
			WHERE LOWER(t.transaction_hash) = LOWER($1) AND t.chain_id = $2 \
			LIMIT 1"
		))
		.bind(transaction_hash)
		.bind(chain_id)
		.fetch_optional(self.pool())
		.await?;

		match row {
			Some(row) => {
				let operation = RebalanceOperation::try_from(row)?;
				Ok(Some(self.hydrate(vec![operation]).await?.remove(0)))
			},
			None => Ok(None),
		}
	}

	/// Attaches recorded transactions; operations without any keep
	/// `transactions: None`.
	async fn hydrate(
		&self,
		mut operations: Vec<RebalanceOperation>,
	) -> Result<Vec<RebalanceOperation>, DbError> {
		let ids = operations.iter().map(|op| op.id).collect::<Vec<_>>();
		let mut grouped = self.transactions_by_operation(&ids).await?;
		for operation in &mut operations {
			if let Some(transactions) = grouped.remove(&operation.id) {
				if !transactions.is_empty() {
					operation.transactions = Some(transactions);
				}
			}
		}
		Ok(operations)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn operation_with_transactions(
		origin: ChainIdentifier,
		chains: &[ChainIdentifier],
	) -> RebalanceOperation {
		let transactions = chains
			.iter()
			.map(|chain| {
				(chain.to_string(), Transaction {
					id: Uuid::new_v4(),
					rebalance_operation_id: Some(Uuid::nil()),
					transaction_hash: format!("0xhash{chain}"),
					chain_id: chain.to_string(),
					from: "0xfrom".to_string(),
					to: "0xto".to_string(),
					cumulative_gas_used: "21000".to_string(),
					effective_gas_price: "5".to_string(),
					reason: TransactionReason::Rebalance,
					metadata: serde_json::json!({}),
					created_at: Utc::now(),
					updated_at: Utc::now(),
				})
			})
			.collect();
		RebalanceOperation {
			id: Uuid::nil(),
			earmark_id: None,
			origin_chain_id: origin,
			destination_chain_id: 10,
			ticker_hash: TickerHash::new("0x1234"),
			amount: "1000".to_string(),
			slippage_dbps: 1000,
			status: RebalanceStatus::Pending,
			bridge: BridgeTag::Across,
			operation_type: OperationType::Bridge,
			recipient: None,
			transactions: Some(transactions),
			created_at: Utc::now(),
			updated_at: Utc::now(),
		}
	}

	#[test]
	fn origin_transaction_is_looked_up_by_chain_key() {
		let operation = operation_with_transactions(1, &[1, 10]);
		assert_eq!(operation.origin_transaction().unwrap().chain_id, "1");
		assert_eq!(operation.transaction_for_chain(10).unwrap().chain_id, "10");
		assert!(operation.transaction_for_chain(137).is_none());
	}

	#[test]
	fn row_conversion_rejects_unknown_bridge() {
		let row = RebalanceOperationRow {
			id: Uuid::new_v4(),
			earmark_id: None,
			origin_chain_id: 1,
			destination_chain_id: 10,
			ticker_hash: "0x1234".to_string(),
			amount: "1000".to_string(),
			slippage: 1000,
			status: "pending".to_string(),
			bridge: "teleporter".to_string(),
			operation_type: "bridge".to_string(),
			recipient: None,
			created_at: Utc::now(),
			updated_at: Utc::now(),
		};
		assert!(matches!(RebalanceOperation::try_from(row), Err(DbError::Decode(_))));
	}

	#[test]
	fn operation_serialises_with_external_names() {
		let operation = operation_with_transactions(1, &[]);
		let json = serde_json::to_value(&operation).unwrap();
		assert_eq!(json["originChainId"], 1);
		assert_eq!(json["destinationChainId"], 10);
		assert_eq!(json["slippageDbps"], 1000);
		assert_eq!(json["operationType"], "bridge");
	}
}
