//! Embedding helpers shared by the router's history layer and the test
//! provider.

/// Cosine similarity between two vectors. Returns `0.0` on mismatched
/// lengths or zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        tracing::warn!(
            len_a = a.len(),
            len_b = b.len(),
            "cosine_similarity: mismatched vector lengths, returning 0.0"
        );
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Deterministic 64-bucket character-frequency vector. Used when no
/// embedding provider is configured: identical strings still embed
/// identically, which is all the sticky/history paths strictly need.
pub fn char_frequency_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; 64];
    for c in text.chars() {
        let bucket = (c as u32 % 64) as usize;
        v[bucket] += 1.0;
    }
    v
}
