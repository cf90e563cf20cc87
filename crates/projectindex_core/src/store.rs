use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, Transaction, params, params_from_iter};
use serde::Serialize;

use crate::identity::PageWritePlan;

/// A row of the page relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageRecord {
    pub id: i64,
    pub talk_id: i64,
    pub namespace: i64,
    pub title: String,
    pub is_redirect: bool,
}

/// A row of the project relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectRow {
    pub id: i64,
    pub title: String,
}

/// Global project-relation diff computed by the reconciler.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProjectDiff {
    pub removed: Vec<i64>,
    pub added: Vec<(i64, String)>,
    pub updated: Vec<(i64, String)>,
}

impl ProjectDiff {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty() && self.updated.is_empty()
    }
}

/// Membership set diff for one project.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MembershipDiff {
    pub added: Vec<i64>,
    pub removed: Vec<i64>,
}

impl MembershipDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Row counts for operator-facing stats output.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub projects: usize,
    pub pages: usize,
    pub redirect_pages: usize,
    pub memberships: usize,
}

/// The durable project/page index for one external source. Tables are
/// per source (`<source>_project`, `<source>_page`, `<source>_index`)
/// and fully owned by the synchronizer; readers never write.
#[derive(Debug)]
pub struct IndexStore {
    connection: Connection,
    project_table: String,
    page_table: String,
    index_table: String,
}

impl IndexStore {
    pub fn open(db_path: &Path, source: &str) -> Result<Self> {
        validate_source_name(source)?;
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let connection = Connection::open(db_path)
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        connection
            .busy_timeout(Duration::from_secs(5))
            .context("failed to set sqlite busy timeout")?;
        connection
            .pragma_update(None, "foreign_keys", "ON")
            .context("failed to enable foreign_keys pragma")?;
        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL journal mode")?;
        Ok(Self {
            connection,
            project_table: format!("{source}_project"),
            page_table: format!("{source}_page"),
            index_table: format!("{source}_index"),
        })
    }

    /// Create this source's tables if they do not exist yet.
    pub fn ensure_tables(&self) -> Result<()> {
        let schema = format!(
            "CREATE TABLE IF NOT EXISTS {project} (
                project_id INTEGER PRIMARY KEY,
                project_title TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {page} (
                page_id INTEGER PRIMARY KEY,
                page_talk_id INTEGER NOT NULL UNIQUE,
                page_title TEXT NOT NULL,
                page_ns INTEGER NOT NULL,
                page_is_redirect INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {index} (
                index_page INTEGER NOT NULL,
                index_project INTEGER NOT NULL,
                PRIMARY KEY (index_page, index_project)
            );
            CREATE INDEX IF NOT EXISTS idx_{index}_project ON {index}(index_project);",
            project = self.project_table,
            page = self.page_table,
            index = self.index_table,
        );
        self.connection
            .execute_batch(&schema)
            .context("failed to initialize index schema")
    }

    /// The persisted `{project id -> title}` snapshot.
    pub fn project_titles(&self) -> Result<BTreeMap<i64, String>> {
        let sql = format!(
            "SELECT project_id, project_title FROM {}",
            self.project_table
        );
        let mut statement = self
            .connection
            .prepare(&sql)
            .context("failed to prepare project snapshot query")?;
        let rows = statement
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
            .context("failed to run project snapshot query")?;

        let mut out = BTreeMap::new();
        for row in rows {
            let (id, title) = row.context("failed to decode project row")?;
            out.insert(id, title);
        }
        Ok(out)
    }

    /// Stored page rows keyed by page id, for the given ids.
    pub fn pages_by_ids(&self, ids: &[i64]) -> Result<HashMap<i64, PageRecord>> {
        let mut out = HashMap::new();
        if ids.is_empty() {
            return Ok(out);
        }
        let sql = format!(
            "SELECT page_id, page_talk_id, page_title, page_ns, page_is_redirect
             FROM {}
             WHERE page_id IN ({})",
            self.page_table,
            placeholders(ids.len()),
        );
        let mut statement = self
            .connection
            .prepare(&sql)
            .context("failed to prepare page lookup")?;
        let rows = statement
            .query_map(params_from_iter(ids.iter()), decode_page_row)
            .context("failed to run page lookup")?;
        for row in rows {
            let record = row.context("failed to decode page row")?;
            out.insert(record.id, record);
        }
        Ok(out)
    }

    /// Page ids currently indexed under the given project.
    pub fn member_page_ids(&self, project_id: i64) -> Result<HashSet<i64>> {
        let sql = format!(
            "SELECT index_page FROM {} WHERE index_project = ?1",
            self.index_table
        );
        let mut statement = self
            .connection
            .prepare(&sql)
            .context("failed to prepare membership query")?;
        let rows = statement
            .query_map([project_id], |row| row.get::<_, i64>(0))
            .context("failed to run membership query")?;

        let mut out = HashSet::new();
        for row in rows {
            out.insert(row.context("failed to decode membership row")?);
        }
        Ok(out)
    }

    /// Apply the global project diff in one transaction. Removing a
    /// project cascades to its membership rows.
    pub fn apply_project_diff(&mut self, diff: &ProjectDiff) -> Result<()> {
        if diff.is_empty() {
            return Ok(());
        }
        let delete_index = format!("DELETE FROM {} WHERE index_project = ?1", self.index_table);
        let delete_project = format!("DELETE FROM {} WHERE project_id = ?1", self.project_table);
        let insert_project = format!(
            "INSERT INTO {} (project_id, project_title) VALUES (?1, ?2)",
            self.project_table
        );
        let update_project = format!(
            "UPDATE {} SET project_title = ?1 WHERE project_id = ?2",
            self.project_table
        );

        let transaction = self
            .connection
            .transaction()
            .context("failed to start project sync transaction")?;
        for project_id in &diff.removed {
            transaction
                .execute(&delete_index, [project_id])
                .context("failed to cascade membership delete")?;
            transaction
                .execute(&delete_project, [project_id])
                .context("failed to delete project row")?;
        }
        for (project_id, title) in &diff.added {
            transaction
                .execute(&insert_project, params![project_id, title])
                .context("failed to insert project row")?;
        }
        for (project_id, title) in &diff.updated {
            transaction
                .execute(&update_project, params![title, project_id])
                .context("failed to update project row")?;
        }
        transaction
            .commit()
            .context("failed to commit project sync transaction")
    }

    /// Apply one project's page write plan and membership diff as a
    /// single unit of work. A failure rolls the whole unit back.
    pub fn apply_project_unit(
        &mut self,
        project_id: i64,
        plan: &PageWritePlan,
        diff: &MembershipDiff,
    ) -> Result<()> {
        if plan.is_empty() && diff.is_empty() {
            return Ok(());
        }
        let transaction = self
            .connection
            .transaction()
            .context("failed to start project unit transaction")?;
        apply_page_plan_tx(
            &transaction,
            &self.page_table,
            &self.index_table,
            plan,
        )?;
        apply_membership_diff_tx(&transaction, &self.index_table, project_id, diff)?;
        transaction
            .commit()
            .context("failed to commit project unit transaction")
    }

    /// Apply a page write plan on its own. The reconciler uses
    /// `apply_project_unit`; this exists for targeted tests and
    /// repairs.
    pub fn apply_page_plan(&mut self, plan: &PageWritePlan) -> Result<()> {
        if plan.is_empty() {
            return Ok(());
        }
        let transaction = self
            .connection
            .transaction()
            .context("failed to start page plan transaction")?;
        apply_page_plan_tx(
            &transaction,
            &self.page_table,
            &self.index_table,
            plan,
        )?;
        transaction
            .commit()
            .context("failed to commit page plan transaction")
    }

    /// Delete every page row not touched during this pass, with its
    /// membership rows. Returns the number of pages removed.
    pub fn remove_untouched_pages(&mut self, touched: &HashSet<i64>) -> Result<usize> {
        let select_pages = format!("SELECT page_id FROM {}", self.page_table);
        let delete_index = format!("DELETE FROM {} WHERE index_page = ?1", self.index_table);
        let delete_page = format!("DELETE FROM {} WHERE page_id = ?1", self.page_table);

        let transaction = self
            .connection
            .transaction()
            .context("failed to start cleanup transaction")?;
        let stale: Vec<i64> = {
            let mut statement = transaction
                .prepare(&select_pages)
                .context("failed to prepare cleanup scan")?;
            let rows = statement
                .query_map([], |row| row.get::<_, i64>(0))
                .context("failed to run cleanup scan")?;
            let mut out = Vec::new();
            for row in rows {
                let page_id = row.context("failed to decode cleanup row")?;
                if !touched.contains(&page_id) {
                    out.push(page_id);
                }
            }
            out
        };
        for page_id in &stale {
            transaction
                .execute(&delete_index, [page_id])
                .context("failed to delete stale membership rows")?;
            transaction
                .execute(&delete_page, [page_id])
                .context("failed to delete stale page row")?;
        }
        transaction
            .commit()
            .context("failed to commit cleanup transaction")?;
        Ok(stale.len())
    }

    /// Pages indexed under a project, for downstream report
    /// generators. `namespace` and `redirects` filter when set.
    pub fn project_members(
        &self,
        project_id: i64,
        namespace: Option<i64>,
        redirects: Option<bool>,
    ) -> Result<Vec<PageRecord>> {
        let mut sql = format!(
            "SELECT p.page_id, p.page_talk_id, p.page_title, p.page_ns, p.page_is_redirect
             FROM {page} p
             JOIN {index} i ON i.index_page = p.page_id
             WHERE i.index_project = ?1",
            page = self.page_table,
            index = self.index_table,
        );
        if namespace.is_some() {
            sql.push_str(" AND p.page_ns = ?2");
        }
        if let Some(wanted) = redirects {
            sql.push_str(if wanted {
                " AND p.page_is_redirect = 1"
            } else {
                " AND p.page_is_redirect = 0"
            });
        }
        sql.push_str(" ORDER BY p.page_title ASC");

        let mut statement = self
            .connection
            .prepare(&sql)
            .context("failed to prepare member listing")?;
        let rows = match namespace {
            Some(ns) => statement.query_map(params![project_id, ns], decode_page_row),
            None => statement.query_map(params![project_id], decode_page_row),
        }
        .context("failed to run member listing")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to decode member row")?);
        }
        Ok(out)
    }

    /// Projects a page belongs to, for downstream report generators.
    pub fn projects_for_page(&self, page_id: i64) -> Result<Vec<ProjectRow>> {
        let sql = format!(
            "SELECT pr.project_id, pr.project_title
             FROM {project} pr
             JOIN {index} i ON i.index_project = pr.project_id
             WHERE i.index_page = ?1
             ORDER BY pr.project_title ASC",
            project = self.project_table,
            index = self.index_table,
        );
        let mut statement = self
            .connection
            .prepare(&sql)
            .context("failed to prepare project listing")?;
        let rows = statement
            .query_map([page_id], |row| {
                Ok(ProjectRow {
                    id: row.get(0)?,
                    title: row.get(1)?,
                })
            })
            .context("failed to run project listing")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to decode project listing row")?);
        }
        Ok(out)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            projects: self.count(&format!("SELECT COUNT(*) FROM {}", self.project_table))?,
            pages: self.count(&format!("SELECT COUNT(*) FROM {}", self.page_table))?,
            redirect_pages: self.count(&format!(
                "SELECT COUNT(*) FROM {} WHERE page_is_redirect = 1",
                self.page_table
            ))?,
            memberships: self.count(&format!("SELECT COUNT(*) FROM {}", self.index_table))?,
        })
    }

    fn count(&self, sql: &str) -> Result<usize> {
        let count: i64 = self
            .connection
            .query_row(sql, [], |row| row.get(0))
            .with_context(|| format!("failed query: {sql}"))?;
        usize::try_from(count).context("count does not fit into usize")
    }
}

fn apply_page_plan_tx(
    transaction: &Transaction<'_>,
    page_table: &str,
    index_table: &str,
    plan: &PageWritePlan,
) -> Result<()> {
    // Deletes first: the unique talk-id index would otherwise reject
    // the updates that claim those talk ids.
    let select_by_talk = format!(
        "SELECT page_id FROM {page_table} WHERE page_talk_id = ?1"
    );
    let delete_index = format!("DELETE FROM {index_table} WHERE index_page = ?1");
    let delete_page = format!("DELETE FROM {page_table} WHERE page_talk_id = ?1");
    for talk_id in &plan.deletes_by_talk_id {
        let stale_page: Option<i64> = transaction
            .query_row(&select_by_talk, [talk_id], |row| row.get(0))
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .context("failed to find stale page by talk id")?;
        if let Some(page_id) = stale_page {
            transaction
                .execute(&delete_index, [page_id])
                .context("failed to delete stale page memberships")?;
            transaction
                .execute(&delete_page, [talk_id])
                .context("failed to delete stale page row")?;
        }
    }

    let insert = format!(
        "INSERT INTO {page_table}
            (page_id, page_talk_id, page_title, page_ns, page_is_redirect)
         VALUES (?1, ?2, ?3, ?4, ?5)"
    );
    for record in &plan.inserts {
        transaction
            .execute(
                &insert,
                params![
                    record.id,
                    record.talk_id,
                    record.title,
                    record.namespace,
                    record.is_redirect as i64,
                ],
            )
            .with_context(|| format!("failed to insert page {}", record.id))?;
    }

    let update = format!(
        "UPDATE {page_table}
         SET page_talk_id = ?1, page_title = ?2, page_ns = ?3, page_is_redirect = ?4
         WHERE page_id = ?5"
    );
    for record in &plan.updates {
        transaction
            .execute(
                &update,
                params![
                    record.talk_id,
                    record.title,
                    record.namespace,
                    record.is_redirect as i64,
                    record.id,
                ],
            )
            .with_context(|| format!("failed to update page {}", record.id))?;
    }

    Ok(())
}

fn apply_membership_diff_tx(
    transaction: &Transaction<'_>,
    index_table: &str,
    project_id: i64,
    diff: &MembershipDiff,
) -> Result<()> {
    let delete = format!(
        "DELETE FROM {index_table} WHERE index_page = ?1 AND index_project = ?2"
    );
    for page_id in &diff.removed {
        transaction
            .execute(&delete, params![page_id, project_id])
            .context("failed to delete membership row")?;
    }
    let insert = format!(
        "INSERT INTO {index_table} (index_page, index_project) VALUES (?1, ?2)"
    );
    for page_id in &diff.added {
        transaction
            .execute(&insert, params![page_id, project_id])
            .context("failed to insert membership row")?;
    }
    Ok(())
}

fn decode_page_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PageRecord> {
    let is_redirect: i64 = row.get(4)?;
    Ok(PageRecord {
        id: row.get(0)?,
        talk_id: row.get(1)?,
        title: row.get(2)?,
        namespace: row.get(3)?,
        is_redirect: is_redirect == 1,
    })
}

fn validate_source_name(source: &str) -> Result<()> {
    let mut chars = source.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_head || !source.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("invalid source name {source:?}: expected an identifier like \"enwiki\"");
    }
    Ok(())
}

fn placeholders(count: usize) -> String {
    std::iter::repeat_n("?", count).collect::<Vec<_>>().join(", ")
}
