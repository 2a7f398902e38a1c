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

//! Kill switches. The live values are Redis scalars so an operator can flip
//! them without restarting the agent; settings only seed them on first run.
//! The callback sweep always runs, whatever the flags say.

use crate::settings::PauseSettings;
use redis::{aio::MultiplexedConnection, AsyncCommands};
use tracing::warn;

const REBALANCE_PAUSED_KEY: &str = "mark:paused:rebalance";
const PURCHASE_PAUSED_KEY: &str = "mark:paused:purchase";

#[derive(Clone)]
pub struct PauseFlags {
	conn: MultiplexedConnection,
	defaults: PauseSettings,
}

impl PauseFlags {
	pub fn new(conn: MultiplexedConnection, defaults: PauseSettings) -> Self {
		Self { conn, defaults }
	}

	/// Writes the configured defaults for any flag not yet present.
	pub async fn seed(&self) -> Result<(), redis::RedisError> {
		let mut conn = self.conn.clone();
		let _: bool = conn.set_nx(REBALANCE_PAUSED_KEY, self.defaults.rebalance).await?;
		let _: bool = conn.set_nx(PURCHASE_PAUSED_KEY, self.defaults.purchase).await?;
		Ok(())
	}

	async fn read(&self, key: &str, default: bool) -> bool {
		let mut conn = self.conn.clone();
		match conn.get::<_, Option<String>>(key).await {
			Ok(Some(raw)) => raw == "1" || raw.eq_ignore_ascii_case("true"),
			Ok(None) => default,
			// An unreadable flag must not unpause anything by accident.
			Err(error) => {
				warn!("Could not read pause flag {key}: {error}; treating as paused");
				true
			},
		}
	}

	/// Gates decide/execute only.
	pub async fn is_rebalance_paused(&self) -> bool {
		self.read(REBALANCE_PAUSED_KEY, self.defaults.rebalance).await
	}

	/// Gates invoice purchasing only.
	pub async fn is_purchase_paused(&self) -> bool {
		self.read(PURCHASE_PAUSED_KEY, self.defaults.purchase).await
	}

	pub async fn set_rebalance_paused(&self, paused: bool) -> Result<(), redis::RedisError> {
		let mut conn = self.conn.clone();
		let _: () = conn.set(REBALANCE_PAUSED_KEY, paused).await?;
		Ok(())
	}

	pub async fn set_purchase_paused(&self, paused: bool) -> Result<(), redis::RedisError> {
		let mut conn = self.conn.clone();
		let _: () = conn.set(PURCHASE_PAUSED_KEY, paused).await?;
		Ok(())
	}
}
