//! Fallback embedder when no model is reachable
//!
//! Feature-hashed term weights stand in for a learned sentence vector.
//! Same input, same vector, no network, which is exactly what hermetic
//! tests and offline operation need.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::embedding::Embedder;
use crate::error::Result;

pub struct TfIdfEmbedder {
    dimensions: usize,
}

impl TfIdfEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.len() > 1)
            .map(String::from)
            .collect()
    }

    fn bucket(&self, feature: &str) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        feature.hash(&mut hasher);
        (hasher.finish() as usize) % self.dimensions
    }

    // Second hash picks the sign, so colliding features tend to cancel
    fn sign(feature: &str) -> f32 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        feature.hash(&mut hasher);
        0xdead_beef_u64.hash(&mut hasher);
        if hasher.finish() & 1 == 0 {
            1.0
        } else {
            -1.0
        }
    }

    fn add_feature(&self, out: &mut [f32], feature: &str, weight: f32) {
        out[self.bucket(feature)] += weight * Self::sign(feature);
    }
}

impl Embedder for TfIdfEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = Self::tokenize(text);
        let mut embedding = vec![0.0_f32; self.dimensions];

        if tokens.is_empty() {
            return Ok(embedding);
        }

        let mut tf: HashMap<&str, f32> = HashMap::new();
        for token in &tokens {
            *tf.entry(token).or_insert(0.0) += 1.0;
        }

        let doc_len = tokens.len() as f32;
        for (token, count) in tf {
            let tf_score = (1.0 + count / doc_len).ln();
            // Token length as a rarity proxy; there is no corpus to take
            // document frequencies from
            let idf_score = 1.0 + token.len() as f32 * 0.1;
            self.add_feature(&mut embedding, token, tf_score * idf_score);
        }

        // Adjacent-word pairs at half weight
        for window in tokens.windows(2) {
            let bigram = format!("{} {}", window[0], window[1]);
            self.add_feature(&mut embedding, &bigram, 0.5);
        }

        // Unit length: downstream comparisons are all cosine
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }

        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "tfidf-hashed"
    }
}
