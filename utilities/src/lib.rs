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

//! Small shared helpers with no domain knowledge.

pub mod redact_endpoint_secret;

use core::fmt::Display;
use std::time::Duration;

/// Makes a tick that outputs every `interval`. If `yield_first` is true, it
/// will output a tick immediately. Ticks that would land while a consumer is
/// still busy are delayed rather than burst.
pub fn make_periodic_tick(interval: Duration, yield_first: bool) -> tokio::time::Interval {
	let mut interval = tokio::time::interval_at(
		tokio::time::Instant::now() + if yield_first { Duration::ZERO } else { interval },
		interval,
	);
	interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
	interval
}

/// Returns a formatter displaying the items of an iterator separated by
/// commas, without collecting into an intermediate string.
pub fn format_iterator<'a, It: 'a + IntoIterator>(it: It) -> separated::SeparatedDisplay<It>
where
	It::Item: Display,
	It: Clone,
{
	separated::SeparatedDisplay { it, separator: ", " }
}

mod separated {
	use core::fmt::{self, Display};

	pub struct SeparatedDisplay<It> {
		pub it: It,
		pub separator: &'static str,
	}

	impl<It: Clone + IntoIterator> Display for SeparatedDisplay<It>
	where
		It::Item: Display,
	{
		fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
			for (i, item) in self.it.clone().into_iter().enumerate() {
				if i > 0 {
					f.write_str(self.separator)?;
				}
				item.fmt(f)?;
			}
			Ok(())
		}
	}
}

/// Installs a plain test subscriber. Safe to call from multiple tests.
pub fn init_test_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().with_env_filter("trace").try_init();
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn periodic_tick_yields_first_when_asked() {
		let mut tick = make_periodic_tick(Duration::from_secs(5), true);
		// First tick resolves without advancing time.
		tokio::time::timeout(Duration::from_millis(1), tick.tick()).await.unwrap();
		// The next one needs the full period.
		assert!(tokio::time::timeout(Duration::from_secs(4), tick.tick()).await.is_err());
		tokio::time::timeout(Duration::from_secs(2), tick.tick()).await.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn periodic_tick_waits_when_not_yielding_first() {
		let mut tick = make_periodic_tick(Duration::from_secs(5), false);
		assert!(tokio::time::timeout(Duration::from_secs(4), tick.tick()).await.is_err());
		tokio::time::timeout(Duration::from_secs(2), tick.tick()).await.unwrap();
	}

	#[test]
	fn format_iterator_separates_items() {
		assert_eq!(format_iterator([1, 2, 3]).to_string(), "1, 2, 3");
		assert_eq!(format_iterator(Vec::<u32>::new()).to_string(), "");
	}
}
