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

//! Tracing subscriber wiring. One structured line per state transition; the
//! per-tick request id is attached as a span field by the processor.

use tracing_subscriber::EnvFilter;

/// Initialises the global subscriber. `RUST_LOG` wins over the configured
/// level so operators can raise verbosity without touching the config file.
pub fn init(default_level: &str, json: bool) {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

	if json {
		tracing_subscriber::fmt()
			.with_env_filter(filter)
			.json()
			.with_current_span(true)
			.init();
	} else {
		tracing_subscriber::fmt().with_env_filter(filter).init();
	}
}
