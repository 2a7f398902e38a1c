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

//! Swap sub-operations owned by `swap_and_bridge` rebalance operations.
//! `order_id` is unique when present; platform callbacks look swaps up by it.

use super::{unique_violation, Database, DbError};
use chrono::{DateTime, Utc};
use mark_primitives::status::SwapStatus;
use serde::Serialize;
use sqlx::QueryBuilder;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapOperation {
	pub id: Uuid,
	pub rebalance_operation_id: Uuid,
	pub platform: String,
	pub from_asset: String,
	pub to_asset: String,
	pub from_amount: String,
	/// Expected, not realised; `actual_rate` carries the realised rate.
	pub to_amount: String,
	pub expected_rate: String,
	pub quote_id: Option<String>,
	pub order_id: Option<String>,
	pub actual_rate: Option<String>,
	pub status: SwapStatus,
	pub metadata: serde_json::Value,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateSwapOperation {
	pub rebalance_operation_id: Uuid,
	pub platform: String,
	pub from_asset: String,
	pub to_asset: String,
	pub from_amount: String,
	pub to_amount: String,
	pub expected_rate: String,
	pub quote_id: Option<String>,
	pub order_id: Option<String>,
	pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct SwapOperationFilter {
	pub status: Option<SwapStatus>,
	pub rebalance_operation_id: Option<Uuid>,
}

#[derive(sqlx::FromRow)]
struct SwapOperationRow {
	id: Uuid,
	rebalance_operation_id: Uuid,
	platform: String,
	from_asset: String,
	to_asset: String,
	from_amount: String,
	to_amount: String,
	expected_rate: String,
	quote_id: Option<String>,
	order_id: Option<String>,
	actual_rate: Option<String>,
	status: String,
	metadata: serde_json::Value,
	created_at: DateTime<Utc>,
	updated_at: DateTime<Utc>,
}

impl TryFrom<SwapOperationRow> for SwapOperation {
	type Error = DbError;

	fn try_from(row: SwapOperationRow) -> Result<Self, Self::Error> {
		Ok(SwapOperation {
			id: row.id,
			rebalance_operation_id: row.rebalance_operation_id,
			platform: row.platform,
			from_asset: row.from_asset,
			to_asset: row.to_asset,
			from_amount: row.from_amount,
			to_amount: row.to_amount,
			expected_rate: row.expected_rate,
			quote_id: row.quote_id,
			order_id: row.order_id,
			actual_rate: row.actual_rate,
			status: SwapStatus::from_str(&row.status)
				.map_err(|_| DbError::Decode(format!("unknown swap status '{}'", row.status)))?,
			metadata: row.metadata,
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
	}
}

const SWAP_COLUMNS: &str = "id, rebalance_operation_id, platform, from_asset, to_asset, \
	from_amount, to_amount, expected_rate, quote_id, order_id, actual_rate, status, metadata, \
	created_at, updated_at";

impl Database {
	/// Fails with [`DbError::Duplicate`] when the order id is already taken.
	pub async fn create_swap_operation(
		&self,
		input: CreateSwapOperation,
	) -> Result<SwapOperation, DbError> {
		sqlx::query_as::<_, SwapOperationRow>(&format!(
			"INSERT INTO swap_operations (id, rebalance_operation_id, platform, from_asset, \
				to_asset, from_amount, to_amount, expected_rate, quote_id, order_id, status, \
				metadata) \
			VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
			RETURNING {SWAP_COLUMNS}"
		))
		.bind(Uuid::new_v4())
		.bind(input.rebalance_operation_id)
		.bind(&input.platform)
		.bind(&input.from_asset)
		.bind(&input.to_asset)
		.bind(&input.from_amount)
		.bind(&input.to_amount)
		.bind(&input.expected_rate)
		.bind(&input.quote_id)
		.bind(&input.order_id)
		.bind(SwapStatus::PendingDeposit.to_string())
		.bind(&input.metadata)
		.fetch_one(self.pool())
		.await
		.map_err(|e| unique_violation("swap operation", e))?
		.try_into()
	}

	pub async fn get_swap_operations(
		&self,
		filter: SwapOperationFilter,
	) -> Result<Vec<SwapOperation>, DbError> {
		let mut query =
			QueryBuilder::new(format!("SELECT {SWAP_COLUMNS} FROM swap_operations WHERE TRUE"));
		if let Some(status) = filter.status {
			query.push(" AND status = ").push_bind(status.to_string());
		}
		if let Some(rebalance_operation_id) = filter.rebalance_operation_id {
			query.push(" AND rebalance_operation_id = ").push_bind(rebalance_operation_id);
		}
		query.push(" ORDER BY created_at ASC");

		query
			.build_query_as::<SwapOperationRow>()
			.fetch_all(self.pool())
			.await?
			.into_iter()
			.map(SwapOperation::try_from)
			.collect()
	}

	pub async fn get_swap_operation_by_order_id(
		&self,
		order_id: &str,
	) -> Result<Option<SwapOperation>, DbError> {
		sqlx::query_as::<_, SwapOperationRow>(&format!(
			"SELECT {SWAP_COLUMNS} FROM swap_operations WHERE order_id = $1"
		))
		.bind(order_id)
		.fetch_optional(self.pool())
		.await?
		.map(SwapOperation::try_from)
		.transpose()
	}

	/// Sets the status, merges `metadata` into the stored map, and promotes
	/// `orderId` / `actualRate` out of the metadata into their columns when
	/// present.
	pub async fn update_swap_operation_status(
		&self,
		id: Uuid,
		status: SwapStatus,
		metadata: Option<serde_json::Value>,
	) -> Result<SwapOperation, DbError> {
		let order_id = metadata
			.as_ref()
			.and_then(|m| m.get("orderId"))
			.and_then(|v| v.as_str())
			.map(ToString::to_string);
		let actual_rate = metadata
			.as_ref()
			.and_then(|m| m.get("actualRate"))
			.and_then(|v| v.as_str())
			.map(ToString::to_string);

		sqlx::query_as::<_, SwapOperationRow>(&format!(
			"UPDATE swap_operations \
			SET status = $2, \
				metadata = metadata || COALESCE($3, '{{}}'::jsonb), \
				order_id = COALESCE($4, order_id), \
				actual_rate = COALESCE($5, actual_rate), \
				updated_at = NOW() \
			WHERE id = $1 \
			RETURNING {SWAP_COLUMNS}"
		))
		.bind(id)
		.bind(status.to_string())
		.bind(metadata)
		.bind(order_id)
		.bind(actual_rate)
		.fetch_optional(self.pool())
		.await
		.map_err(|e| unique_violation("swap operation", e))?
		.ok_or(DbError::NotFound { entity: "swap operation", id: id.to_string() })?
		.try_into()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn row_conversion_parses_status() {
		let row = SwapOperationRow {
			id: Uuid::new_v4(),
			rebalance_operation_id: Uuid::new_v4(),
			platform: "cowswap".to_string(),
			from_asset: "WETH".to_string(),
			to_asset: "USDC".to_string(),
			from_amount: "1000000000000000000".to_string(),
			to_amount: "3000000000".to_string(),
			expected_rate: "3000".to_string(),
			quote_id: None,
			order_id: Some("0xorder".to_string()),
			actual_rate: None,
			status: "pending_deposit".to_string(),
			metadata: serde_json::json!({}),
			created_at: Utc::now(),
			updated_at: Utc::now(),
		};
		let swap = SwapOperation::try_from(row).unwrap();
		assert_eq!(swap.status, SwapStatus::PendingDeposit);
		assert_eq!(swap.order_id.as_deref(), Some("0xorder"));
	}
}
