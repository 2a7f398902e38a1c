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

//! Postgres persistence for earmarks, rebalance operations, swap operations
//! and transaction receipts. Domain structs carry the external camelCase
//! names over serde; the storage schema is snake_case and the mapping lives
//! entirely in this module.

pub mod earmarks;
pub mod rebalance;
pub mod swaps;
pub mod transactions;

use crate::{
	constants::{DB_CONNECT_TIMEOUT, DB_IDLE_TIMEOUT},
	settings::DatabaseSettings,
};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::{str::FromStr, time::Duration};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{info, warn};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

static DATABASE: OnceCell<Database> = OnceCell::const_new();

#[derive(Error, Debug)]
pub enum DbError {
	#[error("{entity} not found: {id}")]
	NotFound { entity: &'static str, id: String },
	#[error("duplicate {entity}: {detail}")]
	Duplicate { entity: &'static str, detail: String },
	#[error("database has not been initialised")]
	NotInitialized,
	#[error("stored value could not be decoded: {0}")]
	Decode(String),
	#[error(transparent)]
	Sqlx(#[from] sqlx::Error),
	#[error(transparent)]
	Migrate(#[from] sqlx::migrate::MigrateError),
}

impl DbError {
	pub fn is_duplicate(&self) -> bool {
		matches!(self, Self::Duplicate { .. })
	}

	pub fn is_not_found(&self) -> bool {
		matches!(self, Self::NotFound { .. })
	}
}

fn unique_violation(entity: &'static str, error: sqlx::Error) -> DbError {
	match &error {
		sqlx::Error::Database(db_error) if db_error.is_unique_violation() =>
			DbError::Duplicate { entity, detail: db_error.message().to_string() },
		_ => DbError::Sqlx(error),
	}
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
	pub healthy: bool,
	pub latency_ms: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

#[derive(Clone)]
pub struct Database {
	pool: PgPool,
}

impl Database {
	/// Connects a fresh pool, runs migrations. Used directly by tests against
	/// a scratch database; production code goes through
	/// [`initialize_database`].
	pub async fn connect(settings: &DatabaseSettings) -> Result<Self, DbError> {
		let options = PgConnectOptions::from_str(settings.url.expose())
			.map_err(sqlx::Error::from)?;
		let pool = PgPoolOptions::new()
			.max_connections(settings.pool_size)
			.idle_timeout(Some(DB_IDLE_TIMEOUT))
			.acquire_timeout(DB_CONNECT_TIMEOUT)
			.test_before_acquire(true)
			.connect_with(options)
			.await?;

		MIGRATOR.run(&pool).await?;

		Ok(Self { pool })
	}

	/// Retries the initial connection, surfacing only the terminal error
	/// after `attempts`.
	pub async fn connect_with_retry(
		settings: &DatabaseSettings,
		attempts: u32,
		delay: Duration,
	) -> Result<Self, DbError> {
		let mut last_error = None;
		for attempt in 1..=attempts.max(1) {
			match Self::connect(settings).await {
				Ok(database) => return Ok(database),
				Err(error) => {
					warn!("Database connection attempt {attempt}/{attempts} failed: {error}");
					last_error = Some(error);
					if attempt < attempts {
						tokio::time::sleep(delay).await;
					}
				},
			}
		}
		Err(last_error.expect("at least one attempt"))
	}

	pub fn pool(&self) -> &PgPool {
		&self.pool
	}

	pub async fn check_health(&self) -> HealthStatus {
		let started = std::time::Instant::now();
		match sqlx::query("SELECT 1").execute(&self.pool).await {
			Ok(_) => HealthStatus {
				healthy: true,
				latency_ms: started.elapsed().as_millis() as u64,
				error: None,
			},
			Err(error) => HealthStatus {
				healthy: false,
				latency_ms: started.elapsed().as_millis() as u64,
				error: Some(error.to_string()),
			},
		}
	}

	/// Closes the pool, escalating past a close that outlives `timeout`.
	pub async fn graceful_shutdown(&self, timeout: Duration) {
		if tokio::time::timeout(timeout, self.pool.close()).await.is_err() {
			warn!(
				"Database pool did not close within {}ms, terminating outstanding connections",
				timeout.as_millis()
			);
			// close() marks the pool closed on first poll, so dropping here
			// forcibly severs whatever was still in flight.
		} else {
			info!("Database pool closed");
		}
	}
}

/// Idempotent process-wide initialisation; a second call returns the pool
/// created by the first.
pub async fn initialize_database(
	settings: &DatabaseSettings,
	retry_delay: Duration,
) -> Result<Database, DbError> {
	DATABASE
		.get_or_try_init(|| {
			Database::connect_with_retry(settings, settings.connect_attempts, retry_delay)
		})
		.await
		.cloned()
}

/// The process-wide pool. Fails with [`DbError::NotInitialized`] before
/// [`initialize_database`] has succeeded.
pub fn database() -> Result<Database, DbError> {
	DATABASE.get().cloned().ok_or(DbError::NotInitialized)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn database_access_before_initialisation_fails_with_named_error() {
		assert!(matches!(database(), Err(DbError::NotInitialized)));
	}
}
