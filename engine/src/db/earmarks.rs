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

//! Earmarks: reservations tying one external invoice to a planned purchase
//! on a specific chain. At most one earmark exists per invoice, enforced by
//! a unique index rather than application logic.

use super::{unique_violation, Database, DbError};
use chrono::{DateTime, Utc};
use mark_primitives::{status::EarmarkStatus, ChainIdentifier, TickerHash};
use serde::Serialize;
use sqlx::QueryBuilder;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Earmark {
	pub id: Uuid,
	pub invoice_id: String,
	pub designated_purchase_chain: ChainIdentifier,
	pub ticker_hash: TickerHash,
	/// Native-decimal amount string.
	pub min_amount: String,
	pub status: EarmarkStatus,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateEarmark {
	pub invoice_id: String,
	pub designated_purchase_chain: ChainIdentifier,
	pub ticker_hash: TickerHash,
	pub min_amount: String,
}

#[derive(Debug, Clone, Default)]
pub struct EarmarkFilter {
	pub invoice_id: Option<String>,
	pub status: Option<EarmarkStatus>,
}

#[derive(sqlx::FromRow)]
pub(super) struct EarmarkRow {
	id: Uuid,
	invoice_id: String,
	designated_purchase_chain: i64,
	ticker_hash: String,
	min_amount: String,
	status: String,
	created_at: DateTime<Utc>,
	updated_at: DateTime<Utc>,
}

impl TryFrom<EarmarkRow> for Earmark {
	type Error = DbError;

	fn try_from(row: EarmarkRow) -> Result<Self, Self::Error> {
		Ok(Earmark {
			id: row.id,
			invoice_id: row.invoice_id,
			designated_purchase_chain: row.designated_purchase_chain as ChainIdentifier,
			ticker_hash: TickerHash::new(row.ticker_hash),
			min_amount: row.min_amount,
			status: EarmarkStatus::from_str(&row.status)
				.map_err(|_| DbError::Decode(format!("unknown earmark status '{}'", row.status)))?,
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
	}
}

const EARMARK_COLUMNS: &str = "id, invoice_id, designated_purchase_chain, ticker_hash, \
	min_amount, status, created_at, updated_at";

impl Database {
	/// Fails with [`DbError::Duplicate`] when an earmark already exists for
	/// the invoice.
	pub async fn create_earmark(&self, input: CreateEarmark) -> Result<Earmark, DbError> {
		let row = sqlx::query_as::<_, EarmarkRow>(&format!(
			"INSERT INTO earmarks (id, invoice_id, designated_purchase_chain, ticker_hash, \
				min_amount, status) \
			VALUES ($1, $2, $3, $4, $5, $6) \
			RETURNING {EARMARK_COLUMNS}"
		))
		.bind(Uuid::new_v4())
		.bind(&input.invoice_id)
		.bind(input.designated_purchase_chain as i64)
		.bind(input.ticker_hash.as_str())
		.bind(&input.min_amount)
		.bind(EarmarkStatus::Pending.to_string())
		.fetch_one(self.pool())
		.await
		.map_err(|e| unique_violation("earmark", e))?;

		row.try_into()
	}

	/// The unique index guarantees at most one row.
	pub async fn get_earmark_for_invoice(
		&self,
		invoice_id: &str,
	) -> Result<Option<Earmark>, DbError> {
		sqlx::query_as::<_, EarmarkRow>(&format!(
			"SELECT {EARMARK_COLUMNS} FROM earmarks WHERE invoice_id = $1"
		))
		.bind(invoice_id)
		.fetch_optional(self.pool())
		.await?
		.map(Earmark::try_from)
		.transpose()
	}

	pub async fn get_earmarks(&self, filter: EarmarkFilter) -> Result<Vec<Earmark>, DbError> {
		let mut query = QueryBuilder::new(format!("SELECT {EARMARK_COLUMNS} FROM earmarks WHERE TRUE"));
		if let Some(invoice_id) = &filter.invoice_id {
			query.push(" AND invoice_id = ").push_bind(invoice_id);
		}
		if let Some(status) = filter.status {
			query.push(" AND status = ").push_bind(status.to_string());
		}
		query.push(" ORDER BY created_at ASC");

		query
			.build_query_as::<EarmarkRow>()
			.fetch_all(self.pool())
			.await?
			.into_iter()
			.map(Earmark::try_from)
			.collect()
	}

	/// PENDING earmarks for the chain, oldest first.
	pub async fn get_active_earmarks_for_chain(
		&self,
		chain: ChainIdentifier,
	) -> Result<Vec<Earmark>, DbError> {
		sqlx::query_as::<_, EarmarkRow>(&format!(
			"SELECT {EARMARK_COLUMNS} FROM earmarks \
			WHERE status = $1 AND designated_purchase_chain = $2 \
			ORDER BY created_at ASC"
		))
		.bind(EarmarkStatus::Pending.to_string())
		.bind(chain as i64)
		.fetch_all(self.pool())
		.await?
		.into_iter()
		.map(Earmark::try_from)
		.collect()
	}

	pub async fn update_earmark_status(
		&self,
		id: Uuid,
		status: EarmarkStatus,
	) -> Result<Earmark, DbError> {
		sqlx::query_as::<_, EarmarkRow>(&format!(
			"UPDATE earmarks SET status = $2, updated_at = NOW() WHERE id = $1 \
			RETURNING {EARMARK_COLUMNS}"
		))
		.bind(id)
		.bind(status.to_string())
		.fetch_optional(self.pool())
		.await?
		.ok_or(DbError::NotFound { entity: "earmark", id: id.to_string() })?
		.try_into()
	}

	/// Deletes the earmark's rebalance operations, then the earmark, in one
	/// transaction.
	pub async fn remove_earmark(&self, id: Uuid) -> Result<(), DbError> {
		let mut tx = self.pool().begin().await?;

		sqlx::query("DELETE FROM rebalance_operations WHERE earmark_id = $1")
			.bind(id)
			.execute(&mut *tx)
			.await?;

		let deleted = sqlx::query("DELETE FROM earmarks WHERE id = $1")
			.bind(id)
			.execute(&mut *tx)
			.await?;
		if deleted.rows_affected() == 0 {
			return Err(DbError::NotFound { entity: "earmark", id: id.to_string() });
		}

		tx.commit().await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn row_conversion_rejects_unknown_status() {
		let row = EarmarkRow {
			id: Uuid::new_v4(),
			invoice_id: "inv-001".to_string(),
			designated_purchase_chain: 1,
			ticker_hash: "0x1234".to_string(),
			min_amount: "100000000000".to_string(),
			status: "garbage".to_string(),
			created_at: Utc::now(),
			updated_at: Utc::now(),
		};
		assert!(matches!(Earmark::try_from(row), Err(DbError::Decode(_))));
	}

	#[test]
	fn earmark_serialises_with_external_names() {
		let earmark = Earmark {
			id: Uuid::nil(),
			invoice_id: "inv-001".to_string(),
			designated_purchase_chain: 1,
			ticker_hash: TickerHash::new("0x1234"),
			min_amount: "100000000000".to_string(),
			status: EarmarkStatus::Pending,
			created_at: Utc::now(),
			updated_at: Utc::now(),
		};
		let json = serde_json::to_value(&earmark).unwrap();
		assert_eq!(json["invoiceId"], "inv-001");
		assert_eq!(json["designatedPurchaseChain"], 1);
		assert_eq!(json["minAmount"], "100000000000");
		assert_eq!(json["status"], "pending");
	}
}
