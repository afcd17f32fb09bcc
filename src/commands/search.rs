//! Search command handler: full-text query against the page index.

use anyhow::{Context, Result};
use archiver_core::index::{ElasticsearchIndex, PAGES, SearchHit, SearchIndex};

use crate::cli::SearchArgs;
use crate::config::Settings;

/// Explanation terms shown per hit.
const TOP_TERMS: usize = 3;

pub async fn run_search_command(args: &SearchArgs, settings: &Settings) -> Result<()> {
    let index = ElasticsearchIndex::new(
        &settings.elastic_host,
        settings.elastic_user.as_deref(),
        settings.elastic_password.as_deref(),
        &settings.client_options(),
    )?;
    let hits = index
        .search(PAGES, &args.query, usize::from(args.size))
        .await
        .with_context(|| format!("Search for '{}' failed", args.query))?;

    if hits.is_empty() {
        println!("No archived pages match '{}'.", args.query);
        return Ok(());
    }
    for hit in &hits {
        println!("{}", render_hit(hit));
    }
    Ok(())
}

fn render_hit(hit: &SearchHit) -> String {
    let title = hit.field("title").unwrap_or("(untitled)");
    let url = hit.field("url").unwrap_or_default();

    let mut terms: Vec<(&String, &f64)> = hit.explanation.iter().collect();
    terms.sort_by(|a, b| b.1.total_cmp(a.1));
    let terms: Vec<String> = terms
        .into_iter()
        .take(TOP_TERMS)
        .map(|(term, weight)| format!("{term}={weight:.2}"))
        .collect();

    let mut line = format!("{:>7.3}  {title}\n         {url}", hit.score);
    if !terms.is_empty() {
        line.push_str(&format!("\n         [{}]", terms.join(" ")));
    }
    line
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;

    #[test]
    fn test_render_hit_orders_terms_by_weight() {
        let hit = SearchHit {
            id: "abc".to_string(),
            score: 1.5,
            source: json!({"title": "Async Rust", "url": "https://example.com/a"}),
            explanation: BTreeMap::from([
                ("async".to_string(), 0.4),
                ("rust".to_string(), 1.1),
            ]),
        };

        let rendered = render_hit(&hit);
        assert!(rendered.contains("Async Rust"));
        assert!(rendered.contains("https://example.com/a"));
        assert!(rendered.contains("[rust=1.10 async=0.40]"));
    }

    #[test]
    fn test_render_hit_without_title() {
        let hit = SearchHit {
            id: "abc".to_string(),
            score: 0.0,
            source: json!({}),
            explanation: BTreeMap::new(),
        };
        assert!(render_hit(&hit).contains("(untitled)"));
    }
}
