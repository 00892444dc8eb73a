//! The deterministic lexical reranker (§4.7, C7) — the semantic baseline
//! every test in §8 pins against. LLM-based rerankers are downstream
//! concerns (outside this crate's scope) that fall back to this algorithm
//! on invalid output, per §9 Open Question #4.

use std::collections::HashSet;

use crate::error::Result;
use crate::plugins::{Document, Reranker};

fn tokenize(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|t| t.to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// §4.7's scoring algorithm: token overlap with the query. Ties (including
/// zero-overlap docs) fall back to original position (§8 property 12) —
/// ranking is on the integer overlap count alone, so two docs of
/// different length but equal overlap stay in their original relative
/// order, as pinned by the worked example in §8 scenario S7.
fn score(query_tokens: &HashSet<String>, doc: &Document) -> usize {
    let doc_tokens = tokenize(&doc.content);
    query_tokens.intersection(&doc_tokens).count()
}

/// Reorders `docs` by descending lexical overlap with `query`, breaking
/// ties by original position (§8 property 12).
pub fn rerank_lexical(query: &str, docs: Vec<Document>) -> Vec<Document> {
    let query_tokens = tokenize(query);
    let mut scored: Vec<(usize, usize, Document)> = docs
        .into_iter()
        .enumerate()
        .map(|(i, doc)| {
            let s = score(&query_tokens, &doc);
            (i, s, doc)
        })
        .collect();

    scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    scored.into_iter().map(|(_, _, doc)| doc).collect()
}

/// The default [`Reranker`] plugin, usable directly via the registry.
pub struct LexicalReranker;

#[async_trait::async_trait]
impl Reranker for LexicalReranker {
    async fn rerank(&self, query: &str, docs: Vec<Document>) -> Result<Vec<Document>> {
        Ok(rerank_lexical(query, docs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, content: &str) -> Document {
        Document::new(id, content)
    }

    #[test]
    fn s7_vector_doc_wins_on_overlap_ties_fall_back_to_original_order() {
        let docs = vec![
            doc("math", "context about math"),
            doc("vectors", "context about vectors"),
            doc("nothing", "context about nothing"),
        ];
        let ranked = rerank_lexical("vectors", docs);
        let ids: Vec<&str> = ranked.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["vectors", "math", "nothing"]);
    }

    #[test]
    fn permutation_law_same_length_same_elements() {
        let docs = vec![doc("a", "alpha beta"), doc("b", "beta gamma"), doc("c", "gamma delta")];
        let original_ids: HashSet<String> = docs.iter().map(|d| d.id.clone()).collect();
        let ranked = rerank_lexical("beta", docs);
        assert_eq!(ranked.len(), 3);
        let ranked_ids: HashSet<String> = ranked.iter().map(|d| d.id.clone()).collect();
        assert_eq!(original_ids, ranked_ids);
    }

    #[test]
    fn deterministic_for_identical_input() {
        let docs = || {
            vec![
                doc("a", "alpha beta gamma"),
                doc("b", "beta gamma delta"),
                doc("c", "gamma delta epsilon"),
            ]
        };
        let first = rerank_lexical("gamma", docs());
        let second = rerank_lexical("gamma", docs());
        let first_ids: Vec<&str> = first.iter().map(|d| d.id.as_str()).collect();
        let second_ids: Vec<&str> = second.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn stable_tie_break_preserves_input_order_for_equal_scores() {
        let docs = vec![
            doc("first", "totally unrelated text"),
            doc("second", "totally unrelated text"),
        ];
        let ranked = rerank_lexical("query has no overlap at all", docs);
        let ids: Vec<&str> = ranked.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }
}
