//! Wind field synthesis from point weather readings.

use std::time::Duration;

use futures::future::join_all;
use hazard_core::{BoundingBox, GeoPoint, WeatherReading};
use tokio::time::timeout;
use tracing::{debug, warn};
use windfield::{FALLBACK_VECTOR, FieldError, FieldHeader, VectorFieldSnapshot, WindVector};

use crate::source::WeatherSource;

const KMH_PER_MS: f64 = 3.6;

/// Snapshot plus how many nodes had to use [`FALLBACK_VECTOR`].
#[derive(Clone, Debug)]
pub struct WindGrid {
    pub snapshot: VectorFieldSnapshot,
    pub fallback_nodes: usize,
}

/// Samples the weather source on an `nx` by `ny` grid whose corner nodes sit
/// on the viewport corners. Requests are windowed the same way as the probe.
#[derive(Clone, Copy, Debug)]
pub struct WindGridBuilder {
    pub nx: usize,
    pub ny: usize,
    pub window: usize,
    pub timeout: Duration,
}

impl WindGridBuilder {
    pub async fn build<W: WeatherSource>(
        &self,
        source: &W,
        bounds: &BoundingBox,
    ) -> Result<WindGrid, FieldError> {
        let header = FieldHeader::covering(bounds, self.nx, self.ny);
        let nodes: Vec<GeoPoint> = (0..header.ny)
            .flat_map(|j| (0..header.nx).map(move |i| (i, j)))
            .map(|(i, j)| header.node_point(i, j))
            .collect();

        let mut vectors = Vec::with_capacity(nodes.len());
        for chunk in nodes.chunks(self.window.max(1)) {
            let fetched = join_all(chunk.iter().map(|point| async move {
                match timeout(self.timeout, source.fetch(*point)).await {
                    Ok(Ok(reading)) => node_vector(&reading),
                    Ok(Err(err)) => {
                        debug!(lat = point.lat(), lng = point.lng(), "Wind node failed: {err}");
                        None
                    }
                    Err(_) => None,
                }
            }))
            .await;
            vectors.extend(fetched);
        }

        let fallback_nodes = vectors.iter().filter(|v| v.is_none()).count();
        if fallback_nodes == vectors.len() {
            warn!("Every wind node failed; field is uniform fallback");
        }
        let vectors: Vec<WindVector> = vectors
            .into_iter()
            .map(|v| v.unwrap_or(FALLBACK_VECTOR))
            .collect();
        let snapshot = VectorFieldSnapshot::from_vectors(header, &vectors)?;
        Ok(WindGrid {
            snapshot,
            fallback_nodes,
        })
    }
}

fn node_vector(reading: &WeatherReading) -> Option<WindVector> {
    let speed = reading.wind_speed.filter(|s| s.is_finite())?;
    let direction = reading.wind_direction.filter(|d| d.is_finite())?;
    Some(WindVector::from_speed_direction(speed / KMH_PER_MS, direction))
}
