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

use clap::Parser;
use mark_engine::{
	bridge::registry::BridgeRegistry,
	chain::{ChainClient, EvmChainService},
	constants::DEFAULT_SHUTDOWN_TIMEOUT,
	db,
	health::HealthChecker,
	invoice::{everclear::EverclearClient, InvoicePipeline},
	logging, metrics,
	processor::PeriodicProcessor,
	queue::{flags::PauseFlags, EventQueue},
	rebalance::RebalanceEngine,
	settings::{CommandLineOptions, Settings},
};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() {
	let opts = CommandLineOptions::parse();
	let log_json = opts.log_json;

	let settings = match Settings::new(opts) {
		Ok(settings) => settings,
		Err(error) => {
			eprintln!("Error reading settings: {error:#}");
			std::process::exit(1);
		},
	};

	logging::init(&settings.log_level, log_json);
	metrics::register_metrics();
	info!("Start the engines! :broom: :broom:");

	if let Err(error) = run(settings).await {
		error!("Engine exited with error: {error:#}");
		std::process::exit(1);
	}
}

async fn run(settings: Settings) -> anyhow::Result<()> {
	let settings = Arc::new(settings);

	if let Some(health_check) = &settings.health_check {
		tokio::spawn(HealthChecker::new(health_check).await?.run());
	}
	if let Some(prometheus) = settings.prometheus.clone() {
		tokio::spawn(async move {
			if let Err(error) = metrics::start(&prometheus).await {
				error!("Prometheus endpoint failed: {error:#}");
			}
		});
	}

	let database = db::initialize_database(
		&settings.database,
		Duration::from_millis(settings.retry_delay),
	)
	.await?;
	let health = database.check_health().await;
	info!(
		"Database connected (healthy: {}, latency: {}ms)",
		health.healthy, health.latency_ms
	);

	let queue = EventQueue::connect(&settings.redis).await?;
	let flags = PauseFlags::new(queue.connection(), settings.pause.clone());
	flags.seed().await?;

	let chain: Arc<dyn ChainClient> = Arc::new(EvmChainService::new(&settings)?);

	// Concrete bridge integrations register themselves here; the engine core
	// runs with whatever the deployment wires in.
	let registry = BridgeRegistry::new();

	let engine = Arc::new(RebalanceEngine::new(
		database.clone(),
		chain.clone(),
		registry,
		settings.clone(),
	));
	let everclear = Arc::new(EverclearClient::new(&settings.everclear.api_url)?);
	let pipeline = InvoicePipeline::new(
		database.clone(),
		chain,
		queue.clone(),
		everclear,
		engine.clone(),
		settings.clone(),
	);
	let processor = PeriodicProcessor::new(engine, pipeline, queue, flags, settings.clone());

	let (shutdown_sender, shutdown_receiver) = watch::channel(false);
	tokio::spawn(async move {
		wait_for_shutdown_signal().await;
		info!("Shutdown signal received");
		let _ = shutdown_sender.send(true);
	});

	processor.run(shutdown_receiver).await?;

	database.graceful_shutdown(DEFAULT_SHUTDOWN_TIMEOUT).await;
	info!("Goodbye");
	Ok(())
}

async fn wait_for_shutdown_signal() {
	#[cfg(unix)]
	{
		let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("sigterm handler installs");
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {},
			_ = sigterm.recv() => {},
		}
	}
	#[cfg(not(unix))]
	{
		let _ = tokio::signal::ctrl_c().await;
	}
}
