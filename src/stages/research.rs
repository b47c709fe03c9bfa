use std::collections::BTreeMap;

use futures::FutureExt;
use tracing::{debug, warn};

use super::truncate;
use crate::collaborators::{SearchHit, SearchQuery, Section};
use crate::context::JobContext;
use crate::fanout::{self, Branch};
use crate::model::{Chapter, FactSheet, ObjectiveEvidence};

const BROAD_LIMIT: usize = 8;
const OBJECTIVE_LIMIT: usize = 4;
const SUMMARY_HITS: usize = 3;

enum Lookup {
    Section(Option<Section>),
    Hits(Vec<SearchHit>),
}

/// Gather evidence for one chapter.
///
/// Syllabus and broad search run as a fan-out; per-objective searches then run
/// one at a time in objective order. Failed lookups are recorded in
/// `FactSheet::degraded` and otherwise ignored.
pub async fn run(ctx: &JobContext, chapter: &Chapter) -> FactSheet {
    let standards = ctx.collaborators.standards.as_ref();
    let retrieval = ctx.collaborators.retrieval.as_ref();
    let domain_id = ctx.spec.domain_id.as_str();
    let filters = domain_filter(domain_id);

    let broad_query = SearchQuery {
        text: format!("{} {}", chapter.title, chapter.summary).trim().to_string(),
        filters: filters.clone(),
        limit: BROAD_LIMIT,
        hybrid: true,
    };
    let broad = &broad_query;

    let branches = vec![
        Branch::new("research.syllabus", move || {
            async move { standards.get_section(domain_id).await.map(Lookup::Section) }.boxed()
        }),
        Branch::new("research.broad", move || {
            async move { retrieval.search(broad).await.map(Lookup::Hits) }.boxed()
        }),
    ];

    let mut facts = FactSheet::default();
    let mut broad_hits = Vec::new();
    for (label, result) in ["syllabus", "broad search"]
        .into_iter()
        .zip(fanout::join_all(&ctx.policy, branches).await)
    {
        match result {
            Ok(Lookup::Section(section)) => facts.syllabus = section,
            Ok(Lookup::Hits(hits)) => broad_hits = hits,
            Err(e) => {
                warn!(job_id = %ctx.job_id, chapter = chapter.index, lookup = label, error = %e, "research lookup failed");
                facts.degraded.push(format!("{label}: {e}"));
            }
        }
    }

    for objective in &chapter.objectives {
        let query = SearchQuery {
            text: objective.description.clone(),
            filters: filters.clone(),
            limit: OBJECTIVE_LIMIT,
            hybrid: false,
        };
        let query = &query;
        let passages = match ctx
            .policy
            .invoke("research.objective", move || retrieval.search(query))
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(job_id = %ctx.job_id, chapter = chapter.index, objective = %objective.id, error = %e, "objective lookup failed");
                facts.degraded.push(format!("objective {}: {e}", objective.id));
                Vec::new()
            }
        };
        facts.evidence.push(ObjectiveEvidence {
            objective_id: objective.id.clone(),
            passages,
        });
    }

    facts.summary = summarize(facts.syllabus.as_ref(), &broad_hits);
    facts.sources = collect_sources(facts.syllabus.as_ref(), &broad_hits, &facts.evidence);

    debug!(
        job_id = %ctx.job_id,
        chapter = chapter.index,
        sources = facts.sources.len(),
        degraded = facts.degraded.len(),
        "research finished"
    );
    facts
}

fn domain_filter(domain_id: &str) -> BTreeMap<String, String> {
    let mut filters = BTreeMap::new();
    filters.insert("domain_id".to_string(), domain_id.to_string());
    filters
}

fn summarize(section: Option<&Section>, hits: &[SearchHit]) -> String {
    let mut parts = Vec::new();
    if let Some(section) = section {
        let mut line = format!("Syllabus {}: {}.", section.id, section.title);
        if !section.body.is_empty() {
            line.push(' ');
            line.push_str(truncate(&section.body, 600));
        }
        parts.push(line);
    }
    parts.extend(
        hits.iter()
            .take(SUMMARY_HITS)
            .map(|h| truncate(h.text.trim(), 400).to_string()),
    );
    parts.join("\n")
}

fn collect_sources(
    section: Option<&Section>,
    broad: &[SearchHit],
    evidence: &[ObjectiveEvidence],
) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    let mut push = |s: &str| {
        if !sources.iter().any(|existing| existing == s) {
            sources.push(s.to_string());
        }
    };
    if let Some(section) = section {
        push(&format!("syllabus:{}", section.id));
    }
    for hit in broad.iter().chain(evidence.iter().flat_map(|e| e.passages.iter())) {
        if let Some(source) = hit.source() {
            push(source);
        }
    }
    sources
}
