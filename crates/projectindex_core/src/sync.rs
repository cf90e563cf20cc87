use std::collections::{BTreeMap, HashSet};

use anyhow::Result;
use log::{debug, info};
use serde::Serialize;

use crate::classify::group_by_fragment;
use crate::identity::{PassCache, resolve_members};
use crate::resolve::{NamespaceNames, resolve_projects};
use crate::scan::{DEFAULT_CHUNK_SIZE, scan_project_members};
use crate::source::SourceReader;
use crate::store::{IndexStore, MembershipDiff, ProjectDiff};

/// Knobs for one synchronization pass.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Subject namespaces whose pages may become project members.
    pub content_namespaces: Vec<i64>,
    /// Categories per tagged-item query.
    pub category_chunk_size: usize,
    /// `(title, namespace)` keys per content lookup query.
    pub lookup_chunk_size: usize,
    pub namespace_names: NamespaceNames,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            content_namespaces: vec![0, 118],
            category_chunk_size: DEFAULT_CHUNK_SIZE,
            lookup_chunk_size: DEFAULT_CHUNK_SIZE,
            namespace_names: NamespaceNames::default(),
        }
    }
}

/// Counters for one synchronization pass, for log lines and `--json`
/// output.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SyncReport {
    pub projects_total: usize,
    pub projects_added: usize,
    pub projects_removed: usize,
    pub projects_updated: usize,
    pub pages_inserted: usize,
    pub pages_updated: usize,
    pub memberships_added: usize,
    pub memberships_removed: usize,
    pub rejected_fragments: usize,
    pub candidates_discarded: usize,
    pub orphan_pages_removed: usize,
}

/// Run one full synchronization pass: discover projects, reconcile the
/// project relation, then reconcile each project's pages and
/// memberships, and finally drop page rows nothing touched.
///
/// A pass over an unchanged source is a no-op on the store.
pub fn run_sync(
    source: &dyn SourceReader,
    store: &mut IndexStore,
    options: &SyncOptions,
) -> Result<SyncReport> {
    store.ensure_tables()?;
    let mut report = SyncReport::default();

    let tags = source.classification_tags()?;
    info!("{} classification categories found", tags.len());
    let buckets = group_by_fragment(tags);
    let outcome = resolve_projects(source, buckets, &options.namespace_names)?;
    report.rejected_fragments = outcome.rejected_fragments;
    report.projects_total = outcome.projects.len();
    info!(
        "{} projects resolved, {} fragments rejected",
        outcome.projects.len(),
        outcome.rejected_fragments
    );

    let desired: BTreeMap<i64, &str> = outcome
        .projects
        .iter()
        .map(|project| (project.id, project.title.as_str()))
        .collect();
    let diff = project_diff(&store.project_titles()?, &desired);
    report.projects_added = diff.added.len();
    report.projects_removed = diff.removed.len();
    report.projects_updated = diff.updated.len();
    store.apply_project_diff(&diff)?;
    info!(
        "project relation: {} added, {} removed, {} retitled",
        diff.added.len(),
        diff.removed.len(),
        diff.updated.len()
    );

    let mut cache = PassCache::new();
    for project in &outcome.projects {
        debug!("reconciling {} (id {})", project.title, project.id);
        let candidates = scan_project_members(
            source,
            project,
            &options.content_namespaces,
            options.category_chunk_size,
        )?;
        let resolution = resolve_members(
            source,
            store,
            &mut cache,
            &candidates,
            options.lookup_chunk_size,
        )?;
        report.pages_inserted += resolution.plan.inserts.len();
        report.pages_updated += resolution.plan.updates.len();
        report.candidates_discarded += resolution.discarded;

        let current = store.member_page_ids(project.id)?;
        let membership = membership_diff(&current, &resolution.member_ids);
        report.memberships_added += membership.added.len();
        report.memberships_removed += membership.removed.len();
        store.apply_project_unit(project.id, &resolution.plan, &membership)?;
    }

    report.orphan_pages_removed = store.remove_untouched_pages(cache.touched_pages())?;
    info!(
        "pages: {} inserted, {} updated, {} orphans removed; memberships: +{} -{}",
        report.pages_inserted,
        report.pages_updated,
        report.orphan_pages_removed,
        report.memberships_added,
        report.memberships_removed
    );

    Ok(report)
}

fn project_diff(current: &BTreeMap<i64, String>, desired: &BTreeMap<i64, &str>) -> ProjectDiff {
    let mut diff = ProjectDiff::default();
    for (id, title) in current {
        match desired.get(id) {
            None => diff.removed.push(*id),
            Some(wanted) if wanted != title => diff.updated.push((*id, wanted.to_string())),
            Some(_) => {}
        }
    }
    for (id, title) in desired {
        if !current.contains_key(id) {
            diff.added.push((*id, title.to_string()));
        }
    }
    diff
}

fn membership_diff(current: &HashSet<i64>, desired: &HashSet<i64>) -> MembershipDiff {
    let mut diff = MembershipDiff {
        added: desired.difference(current).copied().collect(),
        removed: current.difference(desired).copied().collect(),
    };
    diff.added.sort_unstable();
    diff.removed.sort_unstable();
    diff
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use tempfile::tempdir;

    use super::{SyncOptions, run_sync};
    use crate::fixtures::FixtureSource;
    use crate::source::{ContentItem, RootItem, TaggedItem};
    use crate::store::IndexStore;

    fn root(id: i64, title: &str) -> RootItem {
        RootItem {
            id,
            namespace: 4,
            title: title.to_string(),
            redirect_namespace: None,
            redirect_title: None,
        }
    }

    fn tagged(talk_id: i64, namespace: i64, title: &str) -> TaggedItem {
        TaggedItem {
            talk_id,
            namespace,
            title: title.to_string(),
        }
    }

    fn content(title: &str, namespace: i64, id: i64) -> ContentItem {
        ContentItem {
            title: title.to_string(),
            namespace,
            id,
            is_redirect: false,
        }
    }

    fn birds_source() -> FixtureSource {
        let mut source = FixtureSource::default();
        source.tags = vec![
            "Top-Class_Birds_articles".to_string(),
            "Unassessed_Birds_articles".to_string(),
        ];
        source.root_items.push(root(10, "Project_Birds"));
        source.tagged.insert(
            "Top-Class_Birds_articles".to_string(),
            vec![tagged(41, 1, "Eagle")],
        );
        source.tagged.insert(
            "Unassessed_Birds_articles".to_string(),
            vec![tagged(43, 1, "Condor")],
        );
        source
            .content
            .insert(("Eagle".to_string(), 0), content("Eagle", 0, 42));
        source
            .content
            .insert(("Condor".to_string(), 0), content("Condor", 0, 44));
        source
    }

    fn store() -> (tempfile::TempDir, IndexStore) {
        let temp = tempdir().expect("tempdir");
        let store = IndexStore::open(&temp.path().join("index.db"), "testwiki").expect("open");
        (temp, store)
    }

    #[test]
    fn first_pass_builds_the_full_index() {
        let source = birds_source();
        let (_temp, mut store) = store();

        let report = run_sync(&source, &mut store, &SyncOptions::default()).expect("sync");

        assert_eq!(report.projects_total, 1);
        assert_eq!(report.projects_added, 1);
        assert_eq!(report.pages_inserted, 2);
        assert_eq!(report.memberships_added, 2);
        assert_eq!(report.rejected_fragments, 0);

        let projects = store.project_titles().expect("projects");
        assert_eq!(projects.get(&10).map(String::as_str), Some("Project:Birds"));

        let pages = store.pages_by_ids(&[42, 44]).expect("pages");
        let eagle = pages.get(&42).expect("eagle stored");
        assert_eq!(eagle.talk_id, 41);
        assert_eq!(eagle.namespace, 0);
        assert!(!eagle.is_redirect);
        assert_eq!(
            store.member_page_ids(10).expect("members"),
            HashSet::from([42, 44])
        );
    }

    #[test]
    fn second_pass_over_unchanged_source_is_a_noop() {
        let source = birds_source();
        let (_temp, mut store) = store();
        run_sync(&source, &mut store, &SyncOptions::default()).expect("first sync");

        let report = run_sync(&source, &mut store, &SyncOptions::default()).expect("second sync");

        assert_eq!(report.projects_added, 0);
        assert_eq!(report.projects_removed, 0);
        assert_eq!(report.projects_updated, 0);
        assert_eq!(report.pages_inserted, 0);
        assert_eq!(report.pages_updated, 0);
        assert_eq!(report.memberships_added, 0);
        assert_eq!(report.memberships_removed, 0);
        assert_eq!(report.orphan_pages_removed, 0);
    }

    #[test]
    fn fragments_without_a_root_page_are_rejected() {
        let mut source = birds_source();
        source.tags.push("Unassessed_Nowhere_articles".to_string());
        source.tagged.insert(
            "Unassessed_Nowhere_articles".to_string(),
            vec![tagged(91, 1, "Lost")],
        );
        let (_temp, mut store) = store();

        let report = run_sync(&source, &mut store, &SyncOptions::default()).expect("sync");

        assert_eq!(report.rejected_fragments, 1);
        assert_eq!(report.projects_total, 1);
    }

    #[test]
    fn membership_diffs_are_minimal() {
        let source = birds_source();
        let (_temp, mut store) = store();
        run_sync(&source, &mut store, &SyncOptions::default()).expect("first sync");

        // Eagle keeps its tag, Condor loses it, Dove gains one.
        let mut changed = birds_source();
        changed.tagged.insert(
            "Unassessed_Birds_articles".to_string(),
            vec![tagged(45, 1, "Dove")],
        );
        changed
            .content
            .insert(("Dove".to_string(), 0), content("Dove", 0, 46));

        let report = run_sync(&changed, &mut store, &SyncOptions::default()).expect("second sync");

        assert_eq!(report.memberships_added, 1);
        assert_eq!(report.memberships_removed, 1);
        assert_eq!(report.orphan_pages_removed, 1);
        assert_eq!(
            store.member_page_ids(10).expect("members"),
            HashSet::from([42, 46])
        );
    }

    #[test]
    fn vanished_projects_are_removed_with_their_memberships() {
        let source = birds_source();
        let (_temp, mut store) = store();
        run_sync(&source, &mut store, &SyncOptions::default()).expect("first sync");

        let empty = FixtureSource::default();
        let report = run_sync(&empty, &mut store, &SyncOptions::default()).expect("second sync");

        assert_eq!(report.projects_removed, 1);
        assert_eq!(report.orphan_pages_removed, 2);
        assert!(store.project_titles().expect("projects").is_empty());
        let stats = store.stats().expect("stats");
        assert_eq!(stats.pages, 0);
        assert_eq!(stats.memberships, 0);
    }

    #[test]
    fn project_retitles_update_in_place() {
        let source = birds_source();
        let (_temp, mut store) = store();
        run_sync(&source, &mut store, &SyncOptions::default()).expect("first sync");

        let mut renamed = birds_source();
        renamed.root_items.clear();
        renamed.root_items.push(root(10, "Project_Birds_of_prey"));
        renamed.tags = vec!["Unassessed_Birds_of_prey_articles".to_string()];
        renamed.tagged.clear();
        renamed.tagged.insert(
            "Unassessed_Birds_of_prey_articles".to_string(),
            vec![tagged(41, 1, "Eagle")],
        );

        let report = run_sync(&renamed, &mut store, &SyncOptions::default()).expect("second sync");

        assert_eq!(report.projects_updated, 1);
        assert_eq!(report.projects_added, 0);
        let projects = store.project_titles().expect("projects");
        assert_eq!(
            projects.get(&10).map(String::as_str),
            Some("Project:Birds of prey")
        );
    }

    #[test]
    fn draft_namespace_members_are_indexed() {
        let mut source = birds_source();
        source.tagged.insert(
            "Unassessed_Birds_articles".to_string(),
            vec![tagged(43, 1, "Condor"), tagged(47, 119, "Draft_bird")],
        );
        source.content.insert(
            ("Draft_bird".to_string(), 118),
            content("Draft_bird", 118, 48),
        );
        let (_temp, mut store) = store();

        run_sync(&source, &mut store, &SyncOptions::default()).expect("sync");

        let members = store
            .project_members(10, Some(118), None)
            .expect("members");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].title, "Draft_bird");
    }
}
