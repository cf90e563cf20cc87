use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, params_from_iter};

/// A root-namespace page that may carry redirect information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootItem {
    pub id: i64,
    pub namespace: i64,
    pub title: String,
    pub redirect_namespace: Option<i64>,
    pub redirect_title: Option<String>,
}

impl RootItem {
    pub fn redirect(&self) -> Option<(i64, &str)> {
        match (self.redirect_namespace, self.redirect_title.as_deref()) {
            (Some(namespace), Some(title)) => Some((namespace, title)),
            _ => None,
        }
    }
}

/// The page a redirect points at. `is_redirect` lets callers reject
/// redirect chains instead of following them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectTarget {
    pub id: i64,
    pub is_redirect: bool,
}

/// A talk (metadata) page carrying a classification category.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaggedItem {
    pub talk_id: i64,
    pub namespace: i64,
    pub title: String,
}

/// A subject (content) page looked up by title and namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentItem {
    pub title: String,
    pub namespace: i64,
    pub id: i64,
    pub is_redirect: bool,
}

/// Read-only access to the content store replica. Implementations must
/// not assume any particular transport; callers chunk their own queries
/// to respect query-size limits.
pub trait SourceReader {
    /// All category titles matching the classification naming
    /// conventions (the denylist is applied by the classifier).
    fn classification_tags(&self) -> Result<Vec<String>>;

    /// Root-namespace pages matching any of the candidate titles, with
    /// redirect information joined in. Returns every match; the caller
    /// picks between them.
    fn find_root_items(&self, candidates: &[String]) -> Result<Vec<RootItem>>;

    /// Look up the page a redirect points at, if it exists.
    fn resolve_redirect_target(
        &self,
        namespace: i64,
        title: &str,
    ) -> Result<Option<RedirectTarget>>;

    /// Talk pages in the given talk namespaces carrying any of the
    /// given categories.
    fn tagged_metadata_items(
        &self,
        categories: &[String],
        talk_namespaces: &[i64],
    ) -> Result<Vec<TaggedItem>>;

    /// Batch lookup of subject pages by `(title, namespace)`.
    /// Pairs with no matching page are simply absent from the result.
    fn lookup_content_items(&self, keys: &[(String, i64)]) -> Result<Vec<ContentItem>>;
}

pub const CATEGORY_NAMESPACE: i64 = 14;

/// `SourceReader` over a local SQLite replica of the content store,
/// with MediaWiki-shaped `page`, `redirect`, and `categorylinks`
/// tables.
pub struct ReplicaSource {
    connection: Connection,
}

impl ReplicaSource {
    pub fn open(db_path: &Path) -> Result<Self> {
        let connection = Connection::open(db_path)
            .with_context(|| format!("failed to open replica {}", db_path.display()))?;
        connection
            .busy_timeout(Duration::from_secs(5))
            .context("failed to set replica busy timeout")?;
        Ok(Self { connection })
    }
}

impl SourceReader for ReplicaSource {
    fn classification_tags(&self) -> Result<Vec<String>> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT page_title
                 FROM page
                 WHERE page_namespace = ?1
                   AND (page_title LIKE '%-Class\\_%\\_articles' ESCAPE '\\'
                     OR page_title LIKE 'Unassessed\\_%\\_articles' ESCAPE '\\'
                     OR page_title LIKE 'WikiProject\\_%\\_articles' ESCAPE '\\')
                 ORDER BY page_title ASC",
            )
            .context("failed to prepare classification tag query")?;
        let rows = statement
            .query_map([CATEGORY_NAMESPACE], |row| row.get::<_, String>(0))
            .context("failed to run classification tag query")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to decode classification tag row")?);
        }
        Ok(out)
    }

    fn find_root_items(&self, candidates: &[String]) -> Result<Vec<RootItem>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT page.page_id, page.page_namespace, page.page_title,
                    redirect.rd_namespace, redirect.rd_title
             FROM page LEFT JOIN redirect ON redirect.rd_from = page.page_id
             WHERE page.page_namespace = {root_ns} AND page.page_title IN ({vars})",
            root_ns = crate::resolve::ROOT_NAMESPACE,
            vars = placeholders(candidates.len()),
        );
        let mut statement = self
            .connection
            .prepare(&sql)
            .context("failed to prepare root item query")?;
        let rows = statement
            .query_map(params_from_iter(candidates.iter()), |row| {
                Ok(RootItem {
                    id: row.get(0)?,
                    namespace: row.get(1)?,
                    title: row.get(2)?,
                    redirect_namespace: row.get(3)?,
                    redirect_title: row.get(4)?,
                })
            })
            .context("failed to run root item query")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to decode root item row")?);
        }
        Ok(out)
    }

    fn resolve_redirect_target(
        &self,
        namespace: i64,
        title: &str,
    ) -> Result<Option<RedirectTarget>> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT page_id, page_is_redirect
                 FROM page
                 WHERE page_namespace = ?1 AND page_title = ?2
                 LIMIT 1",
            )
            .context("failed to prepare redirect target query")?;
        let mut rows = statement
            .query(rusqlite::params![namespace, title])
            .context("failed to run redirect target query")?;
        let row = match rows.next().context("failed to read redirect target row")? {
            Some(row) => row,
            None => return Ok(None),
        };
        let is_redirect: i64 = row.get(1).context("failed to decode redirect flag")?;
        Ok(Some(RedirectTarget {
            id: row.get(0).context("failed to decode redirect target id")?,
            is_redirect: is_redirect == 1,
        }))
    }

    fn tagged_metadata_items(
        &self,
        categories: &[String],
        talk_namespaces: &[i64],
    ) -> Result<Vec<TaggedItem>> {
        if categories.is_empty() || talk_namespaces.is_empty() {
            return Ok(Vec::new());
        }
        let namespace_list = talk_namespaces
            .iter()
            .map(|ns| ns.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT DISTINCT page.page_id, page.page_namespace, page.page_title
             FROM page JOIN categorylinks ON categorylinks.cl_from = page.page_id
             WHERE categorylinks.cl_type = 'page'
               AND page.page_namespace IN ({namespace_list})
               AND categorylinks.cl_to IN ({vars})",
            vars = placeholders(categories.len()),
        );
        let mut statement = self
            .connection
            .prepare(&sql)
            .context("failed to prepare tagged item query")?;
        let rows = statement
            .query_map(params_from_iter(categories.iter()), |row| {
                Ok(TaggedItem {
                    talk_id: row.get(0)?,
                    namespace: row.get(1)?,
                    title: row.get(2)?,
                })
            })
            .context("failed to run tagged item query")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to decode tagged item row")?);
        }
        Ok(out)
    }

    fn lookup_content_items(&self, keys: &[(String, i64)]) -> Result<Vec<ContentItem>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let tuples = std::iter::repeat_n("(?, ?)", keys.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT page_title, page_namespace, page_id, page_is_redirect
             FROM page
             WHERE (page_title, page_namespace) IN (VALUES {tuples})",
        );
        let mut flattened: Vec<rusqlite::types::Value> = Vec::with_capacity(keys.len() * 2);
        for (title, namespace) in keys {
            flattened.push(rusqlite::types::Value::Text(title.clone()));
            flattened.push(rusqlite::types::Value::Integer(*namespace));
        }
        let mut statement = self
            .connection
            .prepare(&sql)
            .context("failed to prepare content item lookup")?;
        let rows = statement
            .query_map(params_from_iter(flattened), |row| {
                let is_redirect: i64 = row.get(3)?;
                Ok(ContentItem {
                    title: row.get(0)?,
                    namespace: row.get(1)?,
                    id: row.get(2)?,
                    is_redirect: is_redirect == 1,
                })
            })
            .context("failed to run content item lookup")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to decode content item row")?);
        }
        Ok(out)
    }
}

fn placeholders(count: usize) -> String {
    std::iter::repeat_n("?", count).collect::<Vec<_>>().join(", ")
}
