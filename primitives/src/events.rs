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

//! Queued event model. Events live in Redis only; the serialised form here is
//! the wire format of the queue's `data` hash.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	Hash,
	Serialize,
	Deserialize,
	Display,
	EnumString,
	EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
	InvoiceEnqueued,
	SettlementEnqueued,
}

#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventPriority {
	High,
	#[default]
	Normal,
	Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedEvent {
	pub id: String,
	#[serde(rename = "type")]
	pub event_type: EventType,
	pub data: serde_json::Value,
	#[serde(default)]
	pub priority: EventPriority,
	#[serde(default)]
	pub retry_count: u32,
	pub max_retries: u32,
	/// FIFO key, milliseconds since the unix epoch.
	pub scheduled_at: i64,
	#[serde(default)]
	pub metadata: serde_json::Value,
}

impl QueuedEvent {
	pub fn new(
		id: impl Into<String>,
		event_type: EventType,
		data: serde_json::Value,
		priority: EventPriority,
		scheduled_at: i64,
	) -> Self {
		Self {
			id: id.into(),
			event_type,
			data,
			priority,
			retry_count: 0,
			max_retries: 3,
			scheduled_at,
			metadata: serde_json::Value::Null,
		}
	}

	pub fn with_max_retries(mut self, max_retries: u32) -> Self {
		self.max_retries = max_retries;
		self
	}

	/// The event as it should be redelivered after a processing failure:
	/// retry count bumped, delivery pushed `delay_ms` into the future. None
	/// once the retry budget is spent, at which point the event belongs in
	/// the dead-letter queue.
	pub fn next_retry(&self, delay_ms: i64, now_ms: i64) -> Option<QueuedEvent> {
		if self.retry_count >= self.max_retries {
			return None;
		}
		let mut retry = self.clone();
		retry.retry_count += 1;
		retry.scheduled_at = now_ms + delay_ms;
		Some(retry)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn event_wire_format_is_stable() {
		let event = QueuedEvent::new(
			"inv-001",
			EventType::InvoiceEnqueued,
			serde_json::json!({"invoiceId": "inv-001"}),
			EventPriority::Normal,
			1000,
		);
		let json = serde_json::to_value(&event).unwrap();
		assert_eq!(json["type"], "invoice_enqueued");
		assert_eq!(json["scheduledAt"], 1000);
		assert_eq!(json["priority"], "normal");

		let back: QueuedEvent = serde_json::from_value(json).unwrap();
		assert_eq!(back, event);
	}

	#[test]
	fn retry_budget_is_enforced() {
		let event = QueuedEvent::new(
			"e1",
			EventType::InvoiceEnqueued,
			serde_json::json!({}),
			EventPriority::Normal,
			1000,
		)
		.with_max_retries(2);

		let first = event.next_retry(500, 2000).unwrap();
		assert_eq!(first.retry_count, 1);
		assert_eq!(first.scheduled_at, 2500);

		let second = first.next_retry(500, 3000).unwrap();
		assert_eq!(second.retry_count, 2);

		// Budget spent: the next failure dead-letters instead.
		assert!(second.next_retry(500, 4000).is_none());
	}

	#[test]
	fn event_type_is_a_valid_key_fragment() {
		assert_eq!(EventType::InvoiceEnqueued.to_string(), "invoice_enqueued");
		assert_eq!(EventType::SettlementEnqueued.to_string(), "settlement_enqueued");
	}
}
