use std::collections::HashSet;

use anyhow::Result;
use log::debug;

use crate::resolve::ResolvedProject;
use crate::source::SourceReader;

/// Default number of keys per source query. Purely a query-size limit,
/// not a parallelism knob.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// A talk page carrying one of a project's categories, paired with the
/// subject namespace it annotates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberCandidate {
    pub talk_id: i64,
    /// Subject (content) namespace: the even sibling of the talk
    /// namespace the tag was found in.
    pub namespace: i64,
    pub title: String,
}

/// Retrieve every raw membership candidate for a resolved project,
/// deduplicated. Categories are chunked to respect query-size limits.
pub fn scan_project_members(
    source: &dyn SourceReader,
    project: &ResolvedProject,
    content_namespaces: &[i64],
    chunk_size: usize,
) -> Result<Vec<MemberCandidate>> {
    let talk_namespaces: Vec<i64> = content_namespaces.iter().map(|ns| ns + 1).collect();
    let chunk_size = chunk_size.max(1);

    let mut seen: HashSet<(i64, i64)> = HashSet::new();
    let mut out = Vec::new();
    for chunk in project.categories.chunks(chunk_size) {
        for item in source.tagged_metadata_items(chunk, &talk_namespaces)? {
            // Talk namespaces are the odd sibling of their subject
            // namespace.
            let namespace = item.namespace - 1;
            if seen.insert((item.talk_id, namespace)) {
                out.push(MemberCandidate {
                    talk_id: item.talk_id,
                    namespace,
                    title: item.title,
                });
            }
        }
    }

    debug!("{}: {} member candidates", project.title, out.len());
    Ok(out)
}
