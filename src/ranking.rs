//! Ranking of documentation snippets against the user prompt.
//!
//! Two strategies, picked once at start-up: TF-IDF cosine over word tokens
//! (no network) and cosine over embedding vectors.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::LlmError;
use crate::llm::Embedder;

#[async_trait]
pub trait SnippetRanker: Send + Sync {
    /// Return at most `top_k` snippets, best first.
    async fn rank(
        &self,
        query: &str,
        snippets: &[String],
        top_k: usize,
    ) -> Result<Vec<String>, LlmError>;
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "into", "is", "it",
    "of", "on", "or", "that", "the", "this", "to", "with",
];

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 { 0.0 } else { dot / (na * nb) }
}

/// Indices of the `top_k` highest scores; ties keep document order.
fn top_indices(scores: &[f32], top_k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    order.truncate(top_k);
    order
}

/// TF-IDF weighted cosine similarity. Deterministic and offline.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalRanker;

impl LexicalRanker {
    pub fn scores(query: &str, snippets: &[String]) -> Vec<f32> {
        let docs: Vec<Vec<String>> = snippets.iter().map(|s| tokenize(s)).collect();
        let n = docs.len() as f32;

        let mut df: HashMap<&str, usize> = HashMap::new();
        for doc in &docs {
            let unique: HashSet<&str> = doc.iter().map(String::as_str).collect();
            for term in unique {
                *df.entry(term).or_default() += 1;
            }
        }
        let idf = |term: &str| -> f32 {
            let d = df.get(term).copied().unwrap_or(0) as f32;
            ((1.0 + n) / (1.0 + d)).ln() + 1.0
        };

        let query_tokens = tokenize(query);
        let mut vocab: Vec<&str> = query_tokens.iter().map(String::as_str).collect();
        vocab.sort_unstable();
        vocab.dedup();

        let weigh = |tokens: &[String]| -> Vec<f32> {
            vocab
                .iter()
                .map(|term| {
                    let tf = tokens.iter().filter(|t| t.as_str() == *term).count() as f32;
                    tf * idf(*term)
                })
                .collect()
        };
        let query_vec = weigh(&query_tokens);
        docs.iter().map(|doc| cosine(&query_vec, &weigh(doc))).collect()
    }
}

#[async_trait]
impl SnippetRanker for LexicalRanker {
    async fn rank(
        &self,
        query: &str,
        snippets: &[String],
        top_k: usize,
    ) -> Result<Vec<String>, LlmError> {
        let scores = Self::scores(query, snippets);
        Ok(top_indices(&scores, top_k)
            .into_iter()
            .map(|i| snippets[i].clone())
            .collect())
    }
}

/// Cosine similarity over vectors from an embedding endpoint.
pub struct EmbeddingRanker {
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingRanker {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl SnippetRanker for EmbeddingRanker {
    async fn rank(
        &self,
        query: &str,
        snippets: &[String],
        top_k: usize,
    ) -> Result<Vec<String>, LlmError> {
        if snippets.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let mut inputs = Vec::with_capacity(snippets.len() + 1);
        inputs.push(query.to_string());
        inputs.extend(snippets.iter().cloned());

        let vectors = self.embedder.embed(&inputs).await?;
        let (query_vec, doc_vecs) = vectors
            .split_first()
            .ok_or_else(|| LlmError::InvalidResponse("no embeddings returned".into()))?;
        let scores: Vec<f32> = doc_vecs.iter().map(|v| cosine(query_vec, v)).collect();
        Ok(top_indices(&scores, top_k)
            .into_iter()
            .map(|i| snippets[i].clone())
            .collect())
    }
}
