use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::titles::capitalize_first;

/// Category naming conventions that mark a quality/assessment category.
static RECOGNIZED_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"^.+-Class_.+_articles$").unwrap(),
        Regex::new(r"^Unassessed_.+_articles$").unwrap(),
        Regex::new(r"^WikiProject_.+_articles$").unwrap(),
    ]
});

static TASK_FORCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_task_?forces?(_by)?").unwrap());
static WORK_GROUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_work_?group").unwrap());
static ARTICLES_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_articles$").unwrap());
static NEWSLETTER_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_newsletter$").unwrap());
static RANK_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^((.*)-Class|Unassessed)_").unwrap());

/// Returns true when a category title follows one of the recognized
/// per-project assessment conventions and is not a known near-miss.
pub fn is_classification_tag(title: &str) -> bool {
    RECOGNIZED_PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(title))
        && !is_denylisted(title)
}

/// Near-miss categories that match the naming conventions but are not
/// genuine per-project assessment categories.
fn is_denylisted(title: &str) -> bool {
    const PREFIXES: &[&str] = &[
        "Wikipedia_",
        "Template-",
        "Redirect-",
        "Project-",
        "Portal-",
        "File-",
        "FM-",
        "Category-",
        "Cat-",
        "Book-",
        "NA-",
        "Assessed-",
        "All_Wikipedia_",
        "Unassessed_field_",
        "Unassessed_importance_",
    ];
    const INFIXES: &[&str] = &[
        "-importance_",
        "-Priority_",
        "_Operation_Majestic_Titan_",
        "_Version_",
        "_Wikipedia-Books_",
    ];
    const EXACT: &[&str] = &[
        "Unassessed-Class_articles",
        "WikiProject_lists_of_encyclopedic_articles",
    ];

    PREFIXES.iter().any(|prefix| title.starts_with(prefix))
        || INFIXES.iter().any(|infix| title.contains(infix))
        || EXACT.iter().any(|exact| title == *exact)
        || title.ends_with("_Article_quality_research_articles")
}

/// Reduce an assessment category title to a candidate project-name
/// fragment by applying the normalization rules in order.
///
/// The rules are best-effort: a title that normalizes badly still yields
/// a fragment, and resolution rejects fragments that do not correspond
/// to a real project page.
pub fn normalize_fragment(category: &str) -> String {
    let mut name = category.replace("WikiProject_", "");
    name = name.replace("-related", "");
    name = name.replace("_quality", "");
    name = name.replace("_subproject_selected_articles", "");
    name = name.replace("_automatically_assessed", "");
    name = TASK_FORCE.replace_all(&name, "").into_owned();
    name = WORK_GROUP.replace_all(&name, "").into_owned();
    name = ARTICLES_SUFFIX.replace(&name, "").into_owned();
    name = NEWSLETTER_SUFFIX.replace(&name, "").into_owned();
    name = RANK_PREFIX.replace(&name, "").into_owned();
    capitalize_first(&name)
}

/// Group classification categories by normalized project-name fragment.
/// Categories that are not recognized classification tags are dropped;
/// categories that normalize to an empty fragment are dropped too.
pub fn group_by_fragment<I>(categories: I) -> BTreeMap<String, Vec<String>>
where
    I: IntoIterator<Item = String>,
{
    let mut buckets: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for category in categories {
        if !is_classification_tag(&category) {
            continue;
        }
        let fragment = normalize_fragment(&category);
        if fragment.is_empty() {
            continue;
        }
        buckets.entry(fragment).or_default().push(category);
    }
    buckets
}
