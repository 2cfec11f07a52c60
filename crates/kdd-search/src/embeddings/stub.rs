//! Deterministic stub embedder
//!
//! Seeds a unit vector from the SHA-256 of the input text. Pure by
//! construction: the same text always maps to the same vector on every
//! machine, which keeps producer determinism testable without a model.
//! Not semantically meaningful; use only for tests and offline runs.

use sha2::{Digest, Sha256};

use kdd_core::embed::Result;
use kdd_core::EmbeddingModel;

pub struct StubModel {
    model_id: String,
    dimensions: usize,
}

impl StubModel {
    pub fn new(model_id: &str, dimensions: usize) -> Self {
        Self {
            model_id: model_id.to_string(),
            dimensions,
        }
    }
}

impl EmbeddingModel for StubModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = Vec::with_capacity(self.dimensions);
        let mut counter: u32 = 0;
        let mut digest = Sha256::digest(text.as_bytes());
        let mut offset = 0;
        while vector.len() < self.dimensions {
            if offset + 4 > digest.len() {
                counter += 1;
                let mut hasher = Sha256::new();
                hasher.update(text.as_bytes());
                hasher.update(counter.to_le_bytes());
                digest = hasher.finalize();
                offset = 0;
            }
            let bytes: [u8; 4] = digest[offset..offset + 4].try_into().expect("4 bytes");
            let raw = u32::from_le_bytes(bytes);
            // Map into [-1, 1).
            vector.push((raw as f32 / u32::MAX as f32) * 2.0 - 1.0);
            offset += 4;
        }
        // Normalize so cosine scores behave like the real thing.
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let model = StubModel::new("stub", 32);
        let a = model.embed("hola mundo").unwrap();
        let b = model.embed("hola mundo").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_different_texts_differ() {
        let model = StubModel::new("stub", 32);
        let a = model.embed("pedido").unwrap();
        let b = model.embed("usuario").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_unit_norm() {
        let model = StubModel::new("stub", 64);
        let v = model.embed("texto de prueba").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}
