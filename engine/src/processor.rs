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

//! The periodic processor: a cooperatively scheduled control loop. Ticks
//! never overlap; each phase runs in its own error boundary so one failing
//! concern never starves the others. A tick that runs long logs a warning
//! but completes.

use crate::{
	constants::TICK_SOFT_DEADLINE,
	invoice::InvoicePipeline,
	metrics::{LAST_TICK, QUEUE_DEPTH, TICK_DURATION},
	queue::{flags::PauseFlags, EventQueue},
	rebalance::RebalanceEngine,
	settings::Settings,
};
use futures::Future;
use mark_utilities::make_periodic_tick;
use rand::Rng;
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{error, info, info_span, warn, Instrument};

pub struct PeriodicProcessor {
	engine: Arc<RebalanceEngine>,
	pipeline: InvoicePipeline,
	queue: EventQueue,
	flags: PauseFlags,
	settings: Arc<Settings>,
}

async fn phase<F>(name: &'static str, future: F)
where
	F: Future<Output = anyhow::Result<()>>,
{
	let timer = TICK_DURATION.with_label_values(&[name]).start_timer();
	if let Err(e) = future.await {
		error!("Tick phase '{name}' failed: {e:#}");
	}
	timer.observe_duration();
}

impl PeriodicProcessor {
	pub fn new(
		engine: Arc<RebalanceEngine>,
		pipeline: InvoicePipeline,
		queue: EventQueue,
		flags: PauseFlags,
		settings: Arc<Settings>,
	) -> Self {
		Self { engine, pipeline, queue, flags, settings }
	}

	/// Runs ticks until shutdown is signalled. The current tick always
	/// completes; cancellation happens between ticks.
	pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
		// Crash recovery: anything leased by a previous run goes back to
		// pending before the first tick.
		let recovered = self.queue.move_processing_to_pending().await?;
		if recovered > 0 {
			info!("Recovered {recovered} leased events from a previous run");
		}

		let mut tick =
			make_periodic_tick(Duration::from_millis(self.settings.polling_interval), true);
		loop {
			tokio::select! {
				result = shutdown.changed() => {
					if result.is_err() || *shutdown.borrow() {
						info!("Shutdown requested; no further ticks");
						return Ok(());
					}
				},
				_ = tick.tick() => {
					let request_id = format!("{:08x}", rand::thread_rng().gen::<u32>());
					self.run_tick()
						.instrument(info_span!("tick", request_id = %request_id))
						.await;
				},
			}
		}
	}

	async fn run_tick(&self) {
		let started = std::time::Instant::now();

		// Callbacks run first, and always: in-flight operations must keep
		// reconciling even with every kill switch on.
		phase("rebalance_callbacks", self.engine.run_callbacks()).await;

		if self.flags.is_rebalance_paused().await {
			info!("Rebalancing is paused; skipping decide/execute");
		} else {
			phase("rebalance_execute", self.engine.decide_and_execute()).await;
		}

		phase("invoice_backfill", self.pipeline.backfill()).await;
		phase("settlement_backfill", self.pipeline.settlement_backfill()).await;

		let purchase_paused = self.flags.is_purchase_paused().await;
		phase("invoice_consume", self.pipeline.consume(purchase_paused)).await;

		match self.queue.get_queue_status().await {
			Ok(status) => {
				QUEUE_DEPTH.with_label_values(&["pending"]).set(status.pending_count as i64);
				QUEUE_DEPTH
					.with_label_values(&["processing"])
					.set(status.processing_count as i64);
				QUEUE_DEPTH
					.with_label_values(&["dead_letter"])
					.set(status.dead_letter_queue_length as i64);
			},
			Err(error) => warn!("Could not read queue status: {error}"),
		}
		LAST_TICK.set(chrono::Utc::now().timestamp());

		if started.elapsed() > TICK_SOFT_DEADLINE {
			warn!(
				"Tick ran for {}s, over the {}s soft deadline",
				started.elapsed().as_secs(),
				TICK_SOFT_DEADLINE.as_secs()
			);
		}
	}
}
