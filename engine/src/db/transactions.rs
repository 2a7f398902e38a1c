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

//! Transaction receipts tied to rebalance operations. One recorded receipt
//! per chain per operation; merging an update for an already-recorded chain
//! overwrites that chain's entry.

use super::{Database, DbError};
use chrono::{DateTime, Utc};
use mark_primitives::status::TransactionReason;
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use std::{collections::HashMap, str::FromStr};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
	pub id: Uuid,
	pub rebalance_operation_id: Option<Uuid>,
	pub transaction_hash: String,
	pub chain_id: String,
	pub from: String,
	pub to: String,
	pub cumulative_gas_used: String,
	pub effective_gas_price: String,
	pub reason: TransactionReason,
	pub metadata: serde_json::Value,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

/// The receipt fields persisted alongside every recorded transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMetadata {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub block_number: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub status: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub confirmations: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceiptInput {
	pub transaction_hash: String,
	pub from: String,
	pub to: String,
	pub cumulative_gas_used: String,
	pub effective_gas_price: String,
	pub metadata: TransactionMetadata,
}

#[derive(sqlx::FromRow)]
pub(super) struct TransactionRow {
	id: Uuid,
	rebalance_operation_id: Option<Uuid>,
	transaction_hash: String,
	chain_id: String,
	#[sqlx(rename = "from")]
	from_address: String,
	#[sqlx(rename = "to")]
	to_address: String,
	cumulative_gas_used: String,
	effective_gas_price: String,
	reason: String,
	metadata: serde_json::Value,
	created_at: DateTime<Utc>,
	updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
	type Error = DbError;

	fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
		Ok(Transaction {
			id: row.id,
			rebalance_operation_id: row.rebalance_operation_id,
			transaction_hash: row.transaction_hash,
			chain_id: row.chain_id,
			from: row.from_address,
			to: row.to_address,
			cumulative_gas_used: row.cumulative_gas_used,
			effective_gas_price: row.effective_gas_price,
			reason: TransactionReason::from_str(&row.reason).map_err(|_| {
				DbError::Decode(format!("unknown transaction reason '{}'", row.reason))
			})?,
			metadata: row.metadata,
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
	}
}

pub(super) const TRANSACTION_COLUMNS: &str = "id, rebalance_operation_id, transaction_hash, \
	chain_id, \"from\", \"to\", cumulative_gas_used, effective_gas_price, reason, metadata, \
	created_at, updated_at";

/// Upserts one chain's receipt for an operation inside the caller's
/// transaction.
pub(super) async fn upsert_operation_transaction(
	conn: &mut PgConnection,
	operation_id: Uuid,
	chain_id: &str,
	reason: TransactionReason,
	receipt: &TransactionReceiptInput,
) -> Result<(), DbError> {
	sqlx::query(
		"INSERT INTO transactions (id, rebalance_operation_id, transaction_hash, chain_id, \
			\"from\", \"to\", cumulative_gas_used, effective_gas_price, reason, metadata) \
		VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
		ON CONFLICT (rebalance_operation_id, chain_id) WHERE rebalance_operation_id IS NOT NULL \
		DO UPDATE SET transaction_hash = EXCLUDED.transaction_hash, \
			\"from\" = EXCLUDED.\"from\", \"to\" = EXCLUDED.\"to\", \
			cumulative_gas_used = EXCLUDED.cumulative_gas_used, \
			effective_gas_price = EXCLUDED.effective_gas_price, \
			reason = EXCLUDED.reason, metadata = EXCLUDED.metadata, updated_at = NOW()",
	)
	.bind(Uuid::new_v4())
	.bind(operation_id)
	.bind(&receipt.transaction_hash)
	.bind(chain_id)
	.bind(&receipt.from)
	.bind(&receipt.to)
	.bind(&receipt.cumulative_gas_used)
	.bind(&receipt.effective_gas_price)
	.bind(reason.to_string())
	.bind(serde_json::to_value(&receipt.metadata).expect("metadata serialises"))
	.execute(&mut *conn)
	.await?;
	Ok(())
}

impl Database {
	/// Every recorded transaction for the given operations, keyed by
	/// operation then by chain id.
	pub(super) async fn transactions_by_operation(
		&self,
		operation_ids: &[Uuid],
	) -> Result<HashMap<Uuid, HashMap<String, Transaction>>, DbError> {
		if operation_ids.is_empty() {
			return Ok(HashMap::new());
		}
		let rows = sqlx::query_as::<_, TransactionRow>(&format!(
			"SELECT {TRANSACTION_COLUMNS} FROM transactions \
			WHERE rebalance_operation_id = ANY($1) \
			ORDER BY created_at ASC"
		))
		.bind(operation_ids)
		.fetch_all(self.pool())
		.await?;

		let mut grouped: HashMap<Uuid, HashMap<String, Transaction>> = HashMap::new();
		for row in rows {
			let transaction = Transaction::try_from(row)?;
			let operation_id =
				transaction.rebalance_operation_id.expect("filtered on operation id");
			grouped
				.entry(operation_id)
				.or_default()
				.insert(transaction.chain_id.clone(), transaction);
		}
		Ok(grouped)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn metadata_serialises_with_external_names() {
		let metadata = TransactionMetadata {
			block_number: Some(19000000),
			status: Some(1),
			confirmations: Some(3),
		};
		let json = serde_json::to_value(&metadata).unwrap();
		assert_eq!(json["blockNumber"], 19000000);
		assert_eq!(json["status"], 1);
		assert_eq!(json["confirmations"], 3);
	}

	#[test]
	fn row_conversion_parses_reason() {
		let row = TransactionRow {
			id: Uuid::new_v4(),
			rebalance_operation_id: None,
			transaction_hash: "0xabc".to_string(),
			chain_id: "1".to_string(),
			from_address: "0xfrom".to_string(),
			to_address: "0xto".to_string(),
			cumulative_gas_used: "21000".to_string(),
			effective_gas_price: "1000000000".to_string(),
			reason: "Rebalance".to_string(),
			metadata: serde_json::json!({}),
			created_at: Utc::now(),
			updated_at: Utc::now(),
		};
		assert_eq!(Transaction::try_from(row).unwrap().reason, TransactionReason::Rebalance);
	}
}
