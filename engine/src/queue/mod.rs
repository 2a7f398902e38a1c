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

//! Redis-backed, type-partitioned FIFO event queue.
//!
//! Key families, all rooted at `event-queue`:
//! - `pending:<type>`    sorted set of ids, score = scheduledAt (ms)
//! - `processing:<type>` sorted set of leased ids, score = lease start (ms)
//! - `dead-letter`       sorted set of permanently failed ids, score = moved-at
//! - `data`              hash id -> serialised payload
//! - `status`            scalar `{lastProcessedAt, lastAction}`
//! - `backfill-cursor`   durable cursor for invoice polling
//!
//! An id is in at most one of pending/processing per type, and every
//! multi-key write goes through a single atomic pipeline.

pub mod flags;

use crate::constants::EVENT_QUEUE_KEY_ROOT;
use chrono::Utc;
use mark_primitives::events::{EventType, QueuedEvent};
use redis::{aio::MultiplexedConnection, AsyncCommands};
use serde::Serialize;
use strum::IntoEnumIterator;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum QueueError {
	#[error(transparent)]
	Redis(#[from] redis::RedisError),
	#[error("event payload could not be (de)serialised: {0}")]
	Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
	pub pending_count: u64,
	pub processing_count: u64,
	pub dead_letter_queue_length: u64,
	pub last_processed_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusRecord {
	last_processed_at: i64,
	last_action: String,
}

fn pending_key(event_type: EventType) -> String {
	format!("{EVENT_QUEUE_KEY_ROOT}:pending:{event_type}")
}

fn processing_key(event_type: EventType) -> String {
	format!("{EVENT_QUEUE_KEY_ROOT}:processing:{event_type}")
}

fn dead_letter_key() -> String {
	format!("{EVENT_QUEUE_KEY_ROOT}:dead-letter")
}

fn data_key() -> String {
	format!("{EVENT_QUEUE_KEY_ROOT}:data")
}

fn status_key() -> String {
	format!("{EVENT_QUEUE_KEY_ROOT}:status")
}

fn cursor_key() -> String {
	format!("{EVENT_QUEUE_KEY_ROOT}:backfill-cursor")
}

/// Splits a raw dequeue batch into deliverable events, ids whose payload is
/// missing or unreadable (to be dropped), and ids scheduled in the future
/// (left alone).
fn partition_dequeued(
	ids: Vec<String>,
	payloads: Vec<Option<String>>,
	now_ms: i64,
) -> (Vec<QueuedEvent>, Vec<String>) {
	let mut deliverable = Vec::new();
	let mut orphaned = Vec::new();
	for (id, payload) in ids.into_iter().zip(payloads) {
		match payload.as_deref().map(serde_json::from_str::<QueuedEvent>) {
			Some(Ok(event)) =>
				if event.scheduled_at <= now_ms {
					deliverable.push(event);
				},
			Some(Err(error)) => {
				warn!("Dropping event {id} with unreadable payload: {error}");
				orphaned.push(id);
			},
			None => {
				warn!("Dropping orphaned event id {id} with no payload");
				orphaned.push(id);
			},
		}
	}
	(deliverable, orphaned)
}

#[derive(Clone)]
pub struct EventQueue {
	conn: MultiplexedConnection,
}

impl EventQueue {
	pub async fn connect(settings: &crate::settings::RedisSettings) -> anyhow::Result<Self> {
		let client = redis::Client::open(settings.url.expose())?;
		Ok(Self { conn: client.get_multiplexed_tokio_connection().await? })
	}

	pub fn new(conn: MultiplexedConnection) -> Self {
		Self { conn }
	}

	/// A handle onto the same multiplexed connection, for the other Redis
	/// consumers in the process (pause flags).
	pub fn connection(&self) -> MultiplexedConnection {
		self.conn.clone()
	}

	/// Atomically (re-)enqueues the event: removes it from processing if it
	/// was leased (a retry path), stores its payload and adds it to pending
	/// with score `scheduledAt`. Returns true iff the id was already known
	/// (pending, processing or dead-lettered) at call time.
	pub async fn enqueue(&self, event: &QueuedEvent) -> Result<bool, QueueError> {
		let mut conn = self.conn.clone();
		let existed = self.has_event(event.event_type, &event.id).await?;

		let payload = serde_json::to_string(event)?;
		let _: () = redis::pipe()
			.atomic()
			.zrem(processing_key(event.event_type), &event.id)
			.ignore()
			.hset(data_key(), &event.id, payload)
			.ignore()
			.zadd(pending_key(event.event_type), &event.id, event.scheduled_at)
			.ignore()
			.query_async(&mut conn)
			.await?;

		Ok(existed)
	}

	/// True iff the queue already knows the id: pending or processing for
	/// the type, or parked in the dead-letter queue. Dead-lettered ids stay
	/// guarded so the backfill cannot resurrect a permanently failed event
	/// every poll.
	pub async fn has_event(&self, event_type: EventType, id: &str) -> Result<bool, QueueError> {
		let mut conn = self.conn.clone();
		let pending: Option<f64> = conn.zscore(pending_key(event_type), id).await?;
		if pending.is_some() {
			return Ok(true);
		}
		let processing: Option<f64> = conn.zscore(processing_key(event_type), id).await?;
		if processing.is_some() {
			return Ok(true);
		}
		let dead_lettered: Option<f64> = conn.zscore(dead_letter_key(), id).await?;
		Ok(dead_lettered.is_some())
	}

	/// Crash-recovery sweep: returns every leased id to pending, rehydrating
	/// the FIFO score from the stored payload. Leases whose payload is gone
	/// are dropped entirely.
	pub async fn move_processing_to_pending(&self) -> Result<usize, QueueError> {
		let mut conn = self.conn.clone();
		let mut moved = 0usize;

		for event_type in EventType::iter() {
			let ids: Vec<String> = conn.zrange(processing_key(event_type), 0, -1).await?;
			if ids.is_empty() {
				continue;
			}
			let payloads: Vec<Option<String>> = conn.hget(data_key(), &ids).await?;

			let mut pipe = redis::pipe();
			pipe.atomic();
			for (id, payload) in ids.iter().zip(payloads) {
				pipe.zrem(processing_key(event_type), id).ignore();
				match payload.as_deref().map(serde_json::from_str::<QueuedEvent>) {
					Some(Ok(event)) => {
						pipe.zadd(pending_key(event_type), id, event.scheduled_at).ignore();
						moved += 1;
					},
					_ => {
						warn!("Dropping leased event {id} with missing or unreadable payload");
						pipe.hdel(data_key(), id).ignore();
					},
				}
			}
			let _: () = pipe.query_async(&mut conn).await?;
		}

		Ok(moved)
	}

	/// Leases up to `count` of the oldest deliverable events of the type.
	/// Future-scheduled events stay pending; orphaned ids are removed.
	pub async fn dequeue(
		&self,
		event_type: EventType,
		count: usize,
	) -> Result<Vec<QueuedEvent>, QueueError> {
		if count == 0 {
			return Ok(Vec::new());
		}
		let mut conn = self.conn.clone();
		let ids: Vec<String> =
			conn.zrange(pending_key(event_type), 0, count as isize - 1).await?;
		if ids.is_empty() {
			return Ok(Vec::new());
		}
		let payloads: Vec<Option<String>> = conn.hget(data_key(), &ids).await?;

		let now_ms = Utc::now().timestamp_millis();
		let (deliverable, orphaned) = partition_dequeued(ids, payloads, now_ms);
		if deliverable.is_empty() && orphaned.is_empty() {
			return Ok(Vec::new());
		}

		let mut pipe = redis::pipe();
		pipe.atomic();
		for event in &deliverable {
			pipe.zrem(pending_key(event_type), &event.id).ignore();
			pipe.zadd(processing_key(event_type), &event.id, now_ms).ignore();
		}
		for id in &orphaned {
			pipe.zrem(pending_key(event_type), id).ignore();
			pipe.hdel(data_key(), id).ignore();
		}
		let _: () = pipe.query_async(&mut conn).await?;

		Ok(deliverable)
	}

	/// Completes a leased event.
	pub async fn ack(&self, event: &QueuedEvent) -> Result<(), QueueError> {
		let mut conn = self.conn.clone();
		let status = serde_json::to_string(&StatusRecord {
			last_processed_at: Utc::now().timestamp_millis(),
			last_action: "processed".to_string(),
		})?;
		let _: () = redis::pipe()
			.atomic()
			.zrem(processing_key(event.event_type), &event.id)
			.ignore()
			.hdel(data_key(), &event.id)
			.ignore()
			.set(status_key(), status)
			.ignore()
			.query_async(&mut conn)
			.await?;
		Ok(())
	}

	/// Parks a leased event in the dead-letter queue, preserving the payload
	/// with the error attached.
	pub async fn dead_letter(&self, event: &QueuedEvent, error: &str) -> Result<(), QueueError> {
		let mut conn = self.conn.clone();
		let now_ms = Utc::now().timestamp_millis();

		let mut payload = serde_json::to_value(event)?;
		if let Some(object) = payload.as_object_mut() {
			object.insert("error".to_string(), serde_json::Value::String(error.to_string()));
			object.insert("movedAt".to_string(), serde_json::Value::from(now_ms));
		}
		let status = serde_json::to_string(&StatusRecord {
			last_processed_at: now_ms,
			last_action: "deadLetter".to_string(),
		})?;

		let _: () = redis::pipe()
			.atomic()
			.zrem(processing_key(event.event_type), &event.id)
			.ignore()
			.zadd(dead_letter_key(), &event.id, now_ms)
			.ignore()
			.hset(data_key(), &event.id, serde_json::to_string(&payload)?)
			.ignore()
			.set(status_key(), status)
			.ignore()
			.query_async(&mut conn)
			.await?;
		Ok(())
	}

	pub async fn get_queue_status(&self) -> Result<QueueStatus, QueueError> {
		let mut conn = self.conn.clone();

		let mut pending_count = 0u64;
		let mut processing_count = 0u64;
		for event_type in EventType::iter() {
			let pending: u64 = conn.zcard(pending_key(event_type)).await?;
			let processing: u64 = conn.zcard(processing_key(event_type)).await?;
			pending_count += pending;
			processing_count += processing;
		}
		let dead_letter_queue_length: u64 = conn.zcard(dead_letter_key()).await?;

		let status: Option<String> = conn.get(status_key()).await?;
		let last_processed_at = status
			.as_deref()
			.and_then(|raw| serde_json::from_str::<StatusRecord>(raw).ok())
			.map(|record| record.last_processed_at);

		Ok(QueueStatus {
			pending_count,
			processing_count,
			dead_letter_queue_length,
			last_processed_at,
		})
	}

	pub async fn get_backfill_cursor(&self) -> Result<Option<String>, QueueError> {
		let mut conn = self.conn.clone();
		Ok(conn.get(cursor_key()).await?)
	}

	pub async fn set_backfill_cursor(&self, cursor: &str) -> Result<(), QueueError> {
		let mut conn = self.conn.clone();
		let _: () = conn.set(cursor_key(), cursor).await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use mark_primitives::events::EventPriority;

	fn event(id: &str, scheduled_at: i64) -> QueuedEvent {
		QueuedEvent::new(
			id,
			EventType::InvoiceEnqueued,
			serde_json::json!({"invoiceId": id}),
			EventPriority::Normal,
			scheduled_at,
		)
	}

	#[test]
	fn keys_follow_the_documented_layout() {
		assert_eq!(pending_key(EventType::InvoiceEnqueued), "event-queue:pending:invoice_enqueued");
		assert_eq!(
			processing_key(EventType::SettlementEnqueued),
			"event-queue:processing:settlement_enqueued"
		);
		assert_eq!(dead_letter_key(), "event-queue:dead-letter");
		assert_eq!(data_key(), "event-queue:data");
		assert_eq!(status_key(), "event-queue:status");
		assert_eq!(cursor_key(), "event-queue:backfill-cursor");
	}

	#[test]
	fn future_scheduled_events_are_not_delivered() {
		// At wall-clock 1500 only e1 (scheduledAt 1000) is deliverable; e2
		// (scheduledAt 2000) stays pending.
		let e1 = event("e1", 1000);
		let e2 = event("e2", 2000);
		let ids = vec!["e1".to_string(), "e2".to_string()];
		let payloads = vec![
			Some(serde_json::to_string(&e1).unwrap()),
			Some(serde_json::to_string(&e2).unwrap()),
		];

		let (deliverable, orphaned) = partition_dequeued(ids.clone(), payloads.clone(), 1500);
		assert_eq!(deliverable, vec![e1.clone()]);
		assert!(orphaned.is_empty());

		let (deliverable, _) = partition_dequeued(ids, payloads, 2500);
		assert_eq!(deliverable, vec![e1, e2]);
	}

	#[test]
	fn missing_payloads_are_marked_orphaned() {
		let e1 = event("e1", 1000);
		let ids = vec!["e1".to_string(), "ghost".to_string()];
		let payloads = vec![Some(serde_json::to_string(&e1).unwrap()), None];

		let (deliverable, orphaned) = partition_dequeued(ids, payloads, 1500);
		assert_eq!(deliverable.len(), 1);
		assert_eq!(orphaned, vec!["ghost".to_string()]);
	}

	#[test]
	fn unreadable_payloads_are_marked_orphaned() {
		let ids = vec!["bad".to_string()];
		let payloads = vec![Some("not json".to_string())];
		let (deliverable, orphaned) = partition_dequeued(ids, payloads, 1500);
		assert!(deliverable.is_empty());
		assert_eq!(orphaned, vec!["bad".to_string()]);
	}
}
