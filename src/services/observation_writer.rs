use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, instrument};

use crate::db::{DbError, NewObservation, WeatherStore};

/// Totals for rows handed to the writer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    pub inserted: u64,
    /// Rows that collided with an existing (station, instant)
    pub skipped: u64,
}

impl WriteOutcome {
    pub fn absorb(&mut self, other: WriteOutcome) {
        self.inserted += other.inserted;
        self.skipped += other.skipped;
    }
}

/// Buffers observations and flushes them in bounded, duplicate-tolerant batches.
///
/// Stations that received committed rows are stamped once, when the run calls
/// [`finish`](Self::finish) or, after an aborted run,
/// [`stamp_touched_stations`](Self::stamp_touched_stations).
pub struct ObservationWriter {
    store: Arc<dyn WeatherStore>,
    batch_size: usize,
    buffer: Vec<NewObservation>,
    touched_stations: BTreeSet<i64>,
    totals: WriteOutcome,
}

impl ObservationWriter {
    pub fn new(store: Arc<dyn WeatherStore>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            touched_stations: BTreeSet::new(),
            totals: WriteOutcome::default(),
        }
    }

    /// Write `observations` immediately, in chunks of at most the batch size
    #[instrument(skip(self, observations), fields(count = observations.len()))]
    pub async fn write_batch(
        &mut self,
        observations: &[NewObservation],
    ) -> Result<WriteOutcome, DbError> {
        let mut outcome = WriteOutcome::default();
        for chunk in observations.chunks(self.batch_size) {
            outcome.absorb(self.write_chunk(chunk).await?);
        }
        Ok(outcome)
    }

    /// Buffer one observation; flushes when the buffer reaches the batch size
    pub async fn push(&mut self, observation: NewObservation) -> Result<WriteOutcome, DbError> {
        self.buffer.push(observation);
        if self.buffer.len() >= self.batch_size {
            return self.flush().await;
        }
        Ok(WriteOutcome::default())
    }

    /// Write whatever is buffered. On failure the buffered rows are discarded.
    pub async fn flush(&mut self) -> Result<WriteOutcome, DbError> {
        if self.buffer.is_empty() {
            return Ok(WriteOutcome::default());
        }
        let batch = std::mem::take(&mut self.buffer);
        self.buffer.reserve(self.batch_size);
        self.write_chunk(&batch).await
    }

    /// Flush, then stamp every touched station's last update once
    pub async fn finish(&mut self) -> Result<WriteOutcome, DbError> {
        self.flush().await?;
        self.stamp_touched_stations().await?;

        info!(
            "Writer finished: {} inserted, {} duplicates skipped",
            self.totals.inserted, self.totals.skipped
        );
        Ok(self.totals)
    }

    /// Stamp the stations of every batch committed so far. Each is stamped at most once.
    pub async fn stamp_touched_stations(&mut self) -> Result<usize, DbError> {
        if self.touched_stations.is_empty() {
            return Ok(0);
        }
        let ids: Vec<i64> = std::mem::take(&mut self.touched_stations)
            .into_iter()
            .collect();
        self.store.mark_stations_updated(&ids, Utc::now()).await?;
        debug!("Marked {} stations as updated", ids.len());
        Ok(ids.len())
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    async fn write_chunk(&mut self, chunk: &[NewObservation]) -> Result<WriteOutcome, DbError> {
        let inserted = match self
            .store
            .insert_observations_ignoring_duplicates(chunk)
            .await
        {
            Ok(inserted) => inserted,
            Err(e) => {
                error!("Failed to write batch of {} observations: {}", chunk.len(), e);
                return Err(e);
            }
        };

        let outcome = WriteOutcome {
            inserted,
            skipped: (chunk.len() as u64).saturating_sub(inserted),
        };
        debug!(
            "Flushed {} observations ({} new, {} duplicates)",
            chunk.len(),
            outcome.inserted,
            outcome.skipped
        );

        self.touched_stations
            .extend(chunk.iter().map(|observation| observation.station_id));
        self.totals.absorb(outcome);
        Ok(outcome)
    }
}
