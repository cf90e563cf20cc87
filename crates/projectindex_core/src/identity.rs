use std::collections::{HashMap, HashSet};

use anyhow::Result;
use log::debug;

use crate::scan::MemberCandidate;
use crate::source::SourceReader;
use crate::store::{IndexStore, PageRecord};

/// Per-pass identity cache, scoped to one synchronization run and
/// passed by reference through it. Maps talk page ids to the subject
/// page ids they annotate, and remembers every subject page id touched
/// this pass (the survivor set for orphan cleanup).
#[derive(Debug, Default)]
pub struct PassCache {
    talk_to_page: HashMap<i64, i64>,
    touched: HashSet<i64>,
}

impl PassCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page_for_talk(&self, talk_id: i64) -> Option<i64> {
        self.talk_to_page.get(&talk_id).copied()
    }

    pub fn touched_pages(&self) -> &HashSet<i64> {
        &self.touched
    }
}

/// Two-phase write plan for the page relation. Deletes are keyed by the
/// *new* talk id a page is claiming: the unique index on talk ids means
/// any stale row under that id must go before the update lands.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PageWritePlan {
    pub deletes_by_talk_id: Vec<i64>,
    pub inserts: Vec<PageRecord>,
    pub updates: Vec<PageRecord>,
}

impl PageWritePlan {
    pub fn is_empty(&self) -> bool {
        self.deletes_by_talk_id.is_empty() && self.inserts.is_empty() && self.updates.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct MemberResolution {
    /// Subject page ids of every resolved candidate, for the
    /// membership diff.
    pub member_ids: HashSet<i64>,
    pub plan: PageWritePlan,
    /// Candidates whose subject page no longer exists (orphaned
    /// annotations in the source).
    pub discarded: usize,
}

/// Resolve raw membership candidates to subject page ids and build the
/// page-relation write plan for the ones first seen this pass.
///
/// Candidates already in the cache were reconciled by an earlier
/// project in the same pass and only contribute their member id here.
pub fn resolve_members(
    source: &dyn SourceReader,
    store: &IndexStore,
    cache: &mut PassCache,
    candidates: &[MemberCandidate],
    chunk_size: usize,
) -> Result<MemberResolution> {
    let mut resolution = MemberResolution::default();
    let chunk_size = chunk_size.max(1);

    let mut unresolved: Vec<&MemberCandidate> = Vec::new();
    let mut queued: HashSet<i64> = HashSet::new();
    for candidate in candidates {
        match cache.page_for_talk(candidate.talk_id) {
            Some(page_id) => {
                resolution.member_ids.insert(page_id);
            }
            None => {
                if queued.insert(candidate.talk_id) {
                    unresolved.push(candidate);
                }
            }
        }
    }
    debug!("{} unresolved candidates to check", unresolved.len());

    for chunk in unresolved.chunks(chunk_size) {
        resolve_chunk(source, store, cache, chunk, &mut resolution)?;
    }

    Ok(resolution)
}

fn resolve_chunk(
    source: &dyn SourceReader,
    store: &IndexStore,
    cache: &mut PassCache,
    chunk: &[&MemberCandidate],
    resolution: &mut MemberResolution,
) -> Result<()> {
    let keys: Vec<(String, i64)> = chunk
        .iter()
        .map(|candidate| (candidate.title.clone(), candidate.namespace))
        .collect();
    let found: HashMap<(String, i64), (i64, bool)> = source
        .lookup_content_items(&keys)?
        .into_iter()
        .map(|item| ((item.title, item.namespace), (item.id, item.is_redirect)))
        .collect();

    let mut fresh: Vec<PageRecord> = Vec::new();
    for candidate in chunk {
        let key = (candidate.title.clone(), candidate.namespace);
        match found.get(&key) {
            Some(&(page_id, is_redirect)) => {
                cache.talk_to_page.insert(candidate.talk_id, page_id);
                cache.touched.insert(page_id);
                resolution.member_ids.insert(page_id);
                fresh.push(PageRecord {
                    id: page_id,
                    talk_id: candidate.talk_id,
                    namespace: candidate.namespace,
                    title: candidate.title.clone(),
                    is_redirect,
                });
            }
            None => {
                // Orphaned annotation: the tag sits on a talk page with
                // no matching subject page. Source data lag, not an
                // error.
                resolution.discarded += 1;
            }
        }
    }

    let page_ids: Vec<i64> = fresh.iter().map(|record| record.id).collect();
    let stored = store.pages_by_ids(&page_ids)?;
    for record in fresh {
        match stored.get(&record.id) {
            None => resolution.plan.inserts.push(record),
            Some(current) if *current != record => {
                if current.talk_id != record.talk_id {
                    // The talk page behind this subject page changed id
                    // (pages were moved around). Any stale row keyed by
                    // the new talk id must be removed first, since talk
                    // ids are uniquely indexed.
                    resolution.plan.deletes_by_talk_id.push(record.talk_id);
                }
                resolution.plan.updates.push(record);
            }
            Some(_) => {}
        }
    }

    Ok(())
}
