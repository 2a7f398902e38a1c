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

//! Shared primitive types for the Mark rebalancer. No I/O lives here; every
//! other crate consumes these definitions.

pub mod amounts;
pub mod events;
pub mod status;

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Numeric chain identifier, as used by the hub and in route configuration.
pub type ChainIdentifier = u64;

/// Canonical 32-byte asset identifier, hex-encoded. Normalised to lowercase on
/// construction so lookups and storage never depend on the casing a config
/// file or API response happened to use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TickerHash(String);

impl TickerHash {
	pub fn new(hash: impl AsRef<str>) -> Self {
		Self(hash.as_ref().trim().to_lowercase())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for TickerHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for TickerHash {
	fn from(hash: &str) -> Self {
		Self::new(hash)
	}
}

impl From<String> for TickerHash {
	fn from(hash: String) -> Self {
		Self::new(hash)
	}
}

impl<'de> Deserialize<'de> for TickerHash {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		Ok(Self::new(String::deserialize(deserializer)?))
	}
}
