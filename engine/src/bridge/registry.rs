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

//! Adapter registry, keyed by tag. New integrations plug in by registration,
//! not subclassing; the engine resolves tags at use time and simply skips
//! preferences whose adapter is not registered.

use super::{BridgeAdapter, SwapAdapter};
use mark_primitives::status::BridgeTag;
use std::{collections::HashMap, sync::Arc};
use tracing::warn;

#[derive(Clone, Default)]
pub struct BridgeRegistry {
	adapters: HashMap<BridgeTag, Arc<dyn BridgeAdapter>>,
	swap_adapters: HashMap<BridgeTag, Arc<dyn SwapAdapter>>,
}

impl BridgeRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, adapter: Arc<dyn BridgeAdapter>) {
		let tag = adapter.adapter_type();
		if self.adapters.insert(tag, adapter).is_some() {
			warn!("Replacing already-registered bridge adapter '{tag}'");
		}
	}

	/// Registers the swap leg of a swap-and-bridge integration under the
	/// same tag as its bridge adapter.
	pub fn register_swap(&mut self, tag: BridgeTag, adapter: Arc<dyn SwapAdapter>) {
		if self.swap_adapters.insert(tag, adapter).is_some() {
			warn!("Replacing already-registered swap adapter '{tag}'");
		}
	}

	pub fn get(&self, tag: BridgeTag) -> Option<Arc<dyn BridgeAdapter>> {
		self.adapters.get(&tag).cloned()
	}

	pub fn get_swap(&self, tag: BridgeTag) -> Option<Arc<dyn SwapAdapter>> {
		self.swap_adapters.get(&tag).cloned()
	}

	pub fn tags(&self) -> Vec<BridgeTag> {
		self.adapters.keys().copied().collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bridge::MockBridgeAdapter;

	#[test]
	fn register_and_resolve_by_tag() {
		let mut registry = BridgeRegistry::new();
		assert!(registry.get(BridgeTag::Across).is_none());

		let mut adapter = MockBridgeAdapter::new();
		adapter.expect_adapter_type().return_const(BridgeTag::Across);
		registry.register(Arc::new(adapter));

		assert!(registry.get(BridgeTag::Across).is_some());
		assert!(registry.get(BridgeTag::Ccip).is_none());
		assert_eq!(registry.tags(), vec![BridgeTag::Across]);
	}
}
