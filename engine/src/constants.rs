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

use std::time::Duration;

// ======= Periodic processor =======

/// Fallback polling interval when the settings omit one.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(30);

/// A tick that runs longer than this logs a warning but still completes.
pub const TICK_SOFT_DEADLINE: Duration = Duration::from_secs(120);

/// How many events to pull from the queue per event type per tick.
pub const CONSUME_BATCH_SIZE: usize = 20;

// ======= Rebalance engine =======

/// Operations not confirmed within this window are expired. Routes may
/// override it.
pub const DEFAULT_REBALANCE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

// ======= Database =======

pub const DEFAULT_DB_POOL_SIZE: u32 = 40;
pub const DB_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DB_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_DB_CONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_DB_CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

// ======= Event queue =======

/// Root of every queue key in Redis.
pub const EVENT_QUEUE_KEY_ROOT: &str = "event-queue";

// ======= Settings environment variables =======

pub const ENV_VAR_PREFIX: &str = "MARK";
pub const ENV_VAR_SEPARATOR: &str = "__";
pub const DATABASE_URL: &str = "MARK__DATABASE__URL";
pub const REDIS_URL: &str = "MARK__REDIS__URL";
pub const EVERCLEAR_API_URL: &str = "MARK__EVERCLEAR__API_URL";

// ======= RPC =======

/// Confirmations to wait for before a submitted transaction is considered
/// final enough to record.
pub const TX_CONFIRMATIONS: usize = 1;
