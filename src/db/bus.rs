//! The event bus is a `bus_events` table rather than a separate broker: the
//! Store already gives us the durability and at-least-once delivery the
//! worker needs, and nothing in the dependency stack brings in a message
//! queue. Claiming is "take the oldest unclaimed row and stamp
//! `claimed_at`"; a claimed row is deleted on success or has `claimed_at`
//! cleared on failure so it's picked up again on the next drain.

use anyhow::{Context as _, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::db::DbClient;

pub struct ClaimedEvent {
    pub id: i64,
    pub kind: String,
    pub payload: serde_json::Value,
}

impl ClaimedEvent {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .with_context(|| format!("decoding bus event payload (kind={})", self.kind))
    }
}

/// Marks an `enqueue` failure as specifically a bus-publish failure (the
/// `bus_events` insert itself), as opposed to some other DB error upstream of
/// it. Callers that care about that distinction (the CI ingest handlers)
/// `downcast_ref` for this to decide whether a failure deserves a 503.
#[derive(Debug, thiserror::Error)]
#[error("publishing to the event bus")]
pub struct BusEnqueueFailed(#[source] pub anyhow::Error);

pub async fn enqueue<T: Serialize>(client: &DbClient, kind: &str, payload: &T) -> Result<()> {
    let payload = serde_json::to_value(payload).context("serializing bus event payload")?;
    client
        .execute(
            "INSERT INTO bus_events (kind, payload) VALUES ($1, $2)",
            &[&kind, &payload],
        )
        .await
        .map_err(|err| BusEnqueueFailed(err.into()))?;
    Ok(())
}

/// Claims up to `limit` unclaimed events, oldest first, marking them claimed
/// so a concurrent drain doesn't pick them up too.
pub async fn claim_batch(client: &DbClient, limit: i64) -> Result<Vec<ClaimedEvent>> {
    let rows = client
        .query(
            "UPDATE bus_events
             SET claimed_at = now()
             WHERE id IN (
                 SELECT id FROM bus_events
                 WHERE claimed_at IS NULL
                 ORDER BY id
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, kind, payload",
            &[&limit],
        )
        .await
        .context("claiming bus events")?;
    Ok(rows
        .iter()
        .map(|row| ClaimedEvent {
            id: row.get("id"),
            kind: row.get("kind"),
            payload: row.get("payload"),
        })
        .collect())
}

pub async fn ack(client: &DbClient, id: i64) -> Result<()> {
    client
        .execute("DELETE FROM bus_events WHERE id = $1", &[&id])
        .await
        .context("acking bus event")?;
    Ok(())
}

/// Releases a claimed event back to the unclaimed pool, for a handler that
/// failed and wants the next drain to retry it.
pub async fn release(client: &DbClient, id: i64) -> Result<()> {
    client
        .execute(
            "UPDATE bus_events SET claimed_at = NULL WHERE id = $1",
            &[&id],
        )
        .await
        .context("releasing bus event")?;
    Ok(())
}
