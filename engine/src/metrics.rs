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

//! Metric monitoring for the engine, allowing a prometheus server to scrape
//! balances, gas spend and queue depths. Returns the metrics encoded in the
//! prometheus text format on `/metrics`.

use crate::settings::PrometheusSettings;
use lazy_static::lazy_static;
use prometheus::{
	GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use std::net::IpAddr;
use tracing::info;
use warp::Filter;

lazy_static! {
	static ref REGISTRY: Registry = Registry::new();
	pub static ref GAS_SPENT: GaugeVec = GaugeVec::new(
		Opts::new("mark_gas_spent_wei", "Cumulative gas spent in wei, by chain and reason"),
		&["chain", "reason"]
	)
	.expect("metric created");
	pub static ref BALANCES: GaugeVec = GaugeVec::new(
		Opts::new("mark_balance_hub_units", "Inventory per ticker and chain, 18-dec normalised"),
		&["ticker", "chain"]
	)
	.expect("metric created");
	pub static ref GAS_BALANCES: GaugeVec = GaugeVec::new(
		Opts::new("mark_gas_balance", "Gas-paying balance per chain and gas kind"),
		&["chain", "gas_type"]
	)
	.expect("metric created");
	pub static ref QUEUE_DEPTH: IntGaugeVec = IntGaugeVec::new(
		Opts::new("mark_event_queue_depth", "Event queue depth by state"),
		&["state"]
	)
	.expect("metric created");
	pub static ref REBALANCE_OPERATIONS: IntCounterVec = IntCounterVec::new(
		Opts::new("mark_rebalance_operations_total", "Rebalance operations by bridge and status"),
		&["bridge", "status"]
	)
	.expect("metric created");
	pub static ref INVOICES_REJECTED: IntCounterVec = IntCounterVec::new(
		Opts::new("mark_invoices_rejected_total", "Invoices rejected by reason"),
		&["reason"]
	)
	.expect("metric created");
	pub static ref TICK_DURATION: HistogramVec = HistogramVec::new(
		HistogramOpts::new("mark_tick_duration_seconds", "Wall-clock duration of processor phases"),
		&["phase"]
	)
	.expect("metric created");
	pub static ref LAST_TICK: IntGauge =
		IntGauge::new("mark_last_tick_unix", "Unix timestamp of the last completed tick")
			.expect("metric created");
}

pub fn register_metrics() {
	for collector in [
		Box::new(GAS_SPENT.clone()) as Box<dyn prometheus::core::Collector>,
		Box::new(BALANCES.clone()),
		Box::new(GAS_BALANCES.clone()),
		Box::new(QUEUE_DEPTH.clone()),
		Box::new(REBALANCE_OPERATIONS.clone()),
		Box::new(INVOICES_REJECTED.clone()),
		Box::new(TICK_DURATION.clone()),
		Box::new(LAST_TICK.clone()),
	] {
		REGISTRY.register(collector).expect("metric registered once");
	}
}

/// Serves `/metrics` until the process exits.
pub async fn start(prometheus_settings: &PrometheusSettings) -> anyhow::Result<()> {
	info!("Starting prometheus endpoint on {}:{}", prometheus_settings.hostname, prometheus_settings.port);

	const PATH: &str = "metrics";

	warp::serve(warp::any().and(warp::path(PATH)).and(warp::path::end()).map(metrics_handler))
		.bind((prometheus_settings.hostname.parse::<IpAddr>()?, prometheus_settings.port))
		.await;

	Ok(())
}

fn metrics_handler() -> String {
	use prometheus::Encoder;
	let encoder = prometheus::TextEncoder::new();

	let mut buffer = Vec::new();
	if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
		tracing::error!("could not encode metrics: {}", e);
	};
	String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn metrics_encode_without_panicking() {
		GAS_SPENT.with_label_values(&["1", "Rebalance"]).add(21000.0);
		QUEUE_DEPTH.with_label_values(&["pending"]).set(3);
		let _ = metrics_handler();
	}
}
