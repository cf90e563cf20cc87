use std::collections::BTreeMap;

use anyhow::Result;
use log::{debug, warn};

use crate::source::{RootItem, SourceReader};
use crate::titles::to_wiki_format;

/// Namespace holding project root pages.
pub const ROOT_NAMESPACE: i64 = 4;

/// Title prefix carried by project root pages within the root
/// namespace.
pub const ROOT_TITLE_PREFIX: &str = "Project_";

/// Maps namespace indexes to their display names for canonical titles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceNames {
    names: BTreeMap<i64, String>,
}

impl Default for NamespaceNames {
    fn default() -> Self {
        let names = [
            (0, ""),
            (1, "Talk"),
            (2, "User"),
            (3, "User_talk"),
            (4, "Project"),
            (5, "Project_talk"),
            (100, "Portal"),
            (101, "Portal_talk"),
            (118, "Draft"),
            (119, "Draft_talk"),
        ]
        .into_iter()
        .map(|(id, name)| (id, name.to_string()))
        .collect();
        Self { names }
    }
}

impl NamespaceNames {
    pub fn with_overrides<I>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (i64, String)>,
    {
        let mut out = Self::default();
        for (id, name) in overrides {
            out.names.insert(id, name);
        }
        out
    }

    pub fn name(&self, namespace: i64) -> Option<&str> {
        self.names.get(&namespace).map(String::as_str)
    }

    /// Render the canonical namespace-qualified wiki-format title.
    /// Within the root namespace the redundant `Project_` title prefix
    /// is folded into the namespace qualifier.
    pub fn canonical_title(&self, namespace: i64, title: &str) -> String {
        let body = if namespace == ROOT_NAMESPACE {
            title.strip_prefix(ROOT_TITLE_PREFIX).unwrap_or(title)
        } else {
            title
        };
        let body = to_wiki_format(body);
        match self.name(namespace) {
            Some(name) if !name.is_empty() => format!("{}:{body}", to_wiki_format(name)),
            _ => body,
        }
    }
}

/// A project whose root page has been resolved, carrying the union of
/// all classification categories that normalized to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProject {
    pub id: i64,
    pub title: String,
    pub categories: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ResolveOutcome {
    pub projects: Vec<ResolvedProject>,
    pub rejected_fragments: usize,
}

/// Resolve every fragment bucket to a real project root, merging
/// fragments that land on the same root page. Unresolvable fragments
/// are dropped for this pass.
pub fn resolve_projects(
    source: &dyn SourceReader,
    buckets: BTreeMap<String, Vec<String>>,
    namespaces: &NamespaceNames,
) -> Result<ResolveOutcome> {
    let mut merged: BTreeMap<i64, ResolvedProject> = BTreeMap::new();
    let mut rejected = 0usize;

    for (fragment, categories) in buckets {
        match resolve_fragment(source, &fragment, namespaces)? {
            Some((id, title)) => match merged.get_mut(&id) {
                Some(existing) => existing.categories.extend(categories),
                None => {
                    merged.insert(
                        id,
                        ResolvedProject {
                            id,
                            title,
                            categories,
                        },
                    );
                }
            },
            None => {
                debug!(
                    "rejecting fragment {fragment} ({} categories, first: {})",
                    categories.len(),
                    categories.first().map(String::as_str).unwrap_or("<none>")
                );
                rejected += 1;
            }
        }
    }

    Ok(ResolveOutcome {
        projects: merged.into_values().collect(),
        rejected_fragments: rejected,
    })
}

/// Resolve one fragment to `(root page id, canonical title)`, following
/// at most one redirect hop. Returns `None` when no root page matches
/// or the redirect chain is broken.
pub fn resolve_fragment(
    source: &dyn SourceReader,
    fragment: &str,
    namespaces: &NamespaceNames,
) -> Result<Option<(i64, String)>> {
    let candidates = vec![
        format!("{ROOT_TITLE_PREFIX}{fragment}"),
        format!("{ROOT_TITLE_PREFIX}{fragment}s"),
    ];
    let matches = source.find_root_items(&candidates)?;
    let root = match pick_root(fragment, matches) {
        Some(root) => root,
        None => return Ok(None),
    };

    match root.redirect() {
        None => Ok(Some((
            root.id,
            namespaces.canonical_title(root.namespace, &root.title),
        ))),
        Some((target_namespace, target_title)) => {
            let target = source.resolve_redirect_target(target_namespace, target_title)?;
            match target {
                Some(target) if !target.is_redirect => Ok(Some((
                    target.id,
                    namespaces.canonical_title(target_namespace, target_title),
                ))),
                Some(_) => {
                    debug!(
                        "fragment {fragment}: {} redirects to another redirect {target_title}",
                        root.title
                    );
                    Ok(None)
                }
                None => {
                    debug!(
                        "fragment {fragment}: {} has a broken redirect to {target_title}",
                        root.title
                    );
                    Ok(None)
                }
            }
        }
    }
}

/// Shortest matching title wins; ties between distinct candidates are
/// flagged for operator review.
fn pick_root(fragment: &str, mut matches: Vec<RootItem>) -> Option<RootItem> {
    if matches.len() > 1 {
        matches.sort_by(|a, b| a.title.len().cmp(&b.title.len()).then(a.title.cmp(&b.title)));
        warn!(
            "fragment {fragment} matches multiple root pages ({}); picking the shortest title",
            matches
                .iter()
                .map(|item| item.title.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    matches.into_iter().next()
}
