//! In-memory `SourceReader` for tests.

use std::cell::RefCell;
use std::collections::HashMap;

use anyhow::Result;

use crate::source::{ContentItem, RedirectTarget, RootItem, SourceReader, TaggedItem};

/// Canned source data, plus per-query size recorders so tests can
/// assert chunking behavior.
#[derive(Debug, Default)]
pub struct FixtureSource {
    pub tags: Vec<String>,
    pub root_items: Vec<RootItem>,
    pub redirect_targets: HashMap<(i64, String), RedirectTarget>,
    pub tagged: HashMap<String, Vec<TaggedItem>>,
    pub content: HashMap<(String, i64), ContentItem>,
    pub tagged_query_sizes: RefCell<Vec<usize>>,
    pub lookup_query_sizes: RefCell<Vec<usize>>,
}

impl SourceReader for FixtureSource {
    fn classification_tags(&self) -> Result<Vec<String>> {
        Ok(self.tags.clone())
    }

    fn find_root_items(&self, candidates: &[String]) -> Result<Vec<RootItem>> {
        Ok(self
            .root_items
            .iter()
            .filter(|item| candidates.contains(&item.title))
            .cloned()
            .collect())
    }

    fn resolve_redirect_target(
        &self,
        namespace: i64,
        title: &str,
    ) -> Result<Option<RedirectTarget>> {
        Ok(self
            .redirect_targets
            .get(&(namespace, title.to_string()))
            .copied())
    }

    fn tagged_metadata_items(
        &self,
        categories: &[String],
        talk_namespaces: &[i64],
    ) -> Result<Vec<TaggedItem>> {
        self.tagged_query_sizes.borrow_mut().push(categories.len());
        let mut out = Vec::new();
        for category in categories {
            for item in self.tagged.get(category).into_iter().flatten() {
                if talk_namespaces.contains(&item.namespace) {
                    out.push(item.clone());
                }
            }
        }
        Ok(out)
    }

    fn lookup_content_items(&self, keys: &[(String, i64)]) -> Result<Vec<ContentItem>> {
        self.lookup_query_sizes.borrow_mut().push(keys.len());
        Ok(keys
            .iter()
            .filter_map(|key| self.content.get(key).cloned())
            .collect())
    }
}
