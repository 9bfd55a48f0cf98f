use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use keepsake_common::memory::{DEFAULT_IMPORTANCE, clamp_importance};
use keepsake_common::Result;
use keepsake_config::{RecencyUnit, RetrievalWeights};
use keepsake_db::{MemoryRecord, MemoryStore, NewMemoryRecord, cosine_distance};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::embeddings::EmbeddingProvider;

/// Exponential recency: `rate ^ elapsed_units`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecencyDecay {
    rate: f64,
    unit_seconds: f64,
}

impl RecencyDecay {
    pub fn new(rate: f64, unit: RecencyUnit) -> Self {
        Self {
            rate,
            unit_seconds: unit.seconds(),
        }
    }

    /// Score in `(0, 1]`; entries stamped in the future count as brand new.
    pub fn score(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let elapsed = (now - created_at).num_milliseconds().max(0) as f64 / 1000.0;
        self.rate.powf(elapsed / self.unit_seconds)
    }
}

impl Default for RecencyDecay {
    fn default() -> Self {
        Self::new(0.995, RecencyUnit::Hours)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryMetadata {
    pub tags: BTreeSet<String>,
    pub importance: Option<u8>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalQuery {
    pub query: String,
    pub alpha_importance: f64,
    pub alpha_recency: f64,
    pub alpha_similarity: f64,
    pub num_results: usize,
}

impl RetrievalQuery {
    /// Pure similarity search returning `num_results` records.
    pub fn similarity(query: impl Into<String>, num_results: usize) -> Self {
        Self {
            query: query.into(),
            alpha_importance: 0.0,
            alpha_recency: 0.0,
            alpha_similarity: 1.0,
            num_results,
        }
    }

    pub fn with_weights(query: impl Into<String>, weights: &RetrievalWeights) -> Self {
        Self {
            query: query.into(),
            alpha_importance: weights.importance,
            alpha_recency: weights.recency,
            alpha_similarity: weights.similarity,
            num_results: weights.num_results,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    pub similarity: f64,
    pub recency: f64,
    pub score: f64,
}

/// Combined ranking score for a single record.
pub fn score(query: &RetrievalQuery, importance: u8, recency: f64, similarity: f64) -> f64 {
    query.alpha_importance * f64::from(importance)
        + query.alpha_recency * recency
        + query.alpha_similarity * similarity
}

/// Persistent, similarity-searchable memory shared by every session.
#[derive(Clone)]
pub struct LongTermMemory {
    store: Arc<Mutex<MemoryStore>>,
    embeddings: Arc<dyn EmbeddingProvider>,
    decay: RecencyDecay,
}

impl LongTermMemory {
    pub fn new(store: Arc<Mutex<MemoryStore>>, embeddings: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embeddings,
            decay: RecencyDecay::default(),
        }
    }

    pub fn with_decay(mut self, decay: RecencyDecay) -> Self {
        self.decay = decay;
        self
    }

    pub fn embeddings(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embeddings
    }

    /// Embed and persist `content`. Returns the new record ID.
    pub async fn save(&self, content: &str, metadata: MemoryMetadata) -> Result<String> {
        let embedding = self.embeddings.embed(content).await?;
        let record = NewMemoryRecord {
            content: content.to_string(),
            embedding,
            tags: metadata.tags,
            importance: metadata
                .importance
                .map(|i| clamp_importance(i64::from(i)))
                .unwrap_or(DEFAULT_IMPORTANCE),
            created_at: metadata.created_at,
        };

        let stored = self.store.lock().await.insert(record)?;
        info!(id = %stored.id, "saved long-term memory");
        Ok(stored.id)
    }

    /// Rank every stored record against `query` and return the best matches.
    pub async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<ScoredMemory>> {
        if query.num_results == 0 {
            return Ok(Vec::new());
        }

        let query_vec = self.embeddings.embed(&query.query).await?;
        let records = self.store.lock().await.all_records()?;
        let now = Utc::now();

        let mut scored: Vec<ScoredMemory> = records
            .into_iter()
            .filter_map(|record| {
                if record.embedding.len() != query_vec.len() {
                    warn!(
                        id = %record.id,
                        stored = record.embedding.len(),
                        query = query_vec.len(),
                        "skipping memory with mismatched embedding dimensions"
                    );
                    return None;
                }
                let similarity = 1.0 - cosine_distance(&query_vec, &record.embedding);
                let recency = self.decay.score(record.created_at, now);
                let score = score(query, record.importance, recency, similarity);
                Some(ScoredMemory {
                    record,
                    similarity,
                    recency,
                    score,
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(query.num_results);

        debug!(
            query = %query.query,
            returned = scored.len(),
            "long-term retrieval complete"
        );
        Ok(scored)
    }

    /// Delete every record. Returns how many were removed.
    pub async fn reset(&self) -> Result<usize> {
        self.store.lock().await.delete_all()
    }

    pub async fn count(&self) -> Result<usize> {
        self.store.lock().await.count()
    }
}
