pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 256;

/// Text-to-vector capability. The same embedder (checked through `id`)
/// must be used for indexing and for querying.
pub trait Embedder {
    fn id(&self) -> String;
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;

    fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// Deterministic local embedder: hashed character trigrams, l2-normalized.
/// No model download, identical output for identical input.
#[derive(Debug, Clone, Copy)]
pub struct HashedTrigramEmbedder {
    pub dimensions: usize,
}

impl Default for HashedTrigramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl Embedder for HashedTrigramEmbedder {
    fn id(&self) -> String {
        format!("hashed-trigram-{}", self.dimensions)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3.min(chars.len())) {
            let bucket = (fnv1a(window) % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

fn fnv1a(window: &[char]) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for ch in window {
        let mut buffer = [0u8; 4];
        for byte in ch.encode_utf8(&mut buffer).bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::{Embedder, HashedTrigramEmbedder};

    #[test]
    fn embedder_is_deterministic() {
        let embedder = HashedTrigramEmbedder::default();
        let first = embedder.embed("vitamin D rich foods");
        let second = embedder.embed("vitamin D rich foods");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = HashedTrigramEmbedder { dimensions: 32 };
        assert_eq!(embedder.embed("abc").len(), 32);
        assert_eq!(embedder.embed("").len(), 32);
    }

    #[test]
    fn vectors_are_unit_length() {
        let embedder = HashedTrigramEmbedder::default();
        let vector = embedder.embed("salmon, mackerel and fortified milk");
        let magnitude = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-4);
    }

    #[test]
    fn id_reflects_dimensions() {
        let embedder = HashedTrigramEmbedder { dimensions: 64 };
        assert_eq!(embedder.id(), "hashed-trigram-64");
    }
}
