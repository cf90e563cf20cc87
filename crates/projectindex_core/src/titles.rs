/// Convert a page title to canonical SQL format: underscores instead of
/// spaces, first letter capitalized.
pub fn to_sql_format(title: &str) -> String {
    capitalize_first(&title.trim().replace(' ', "_"))
}

/// Convert a page title to canonical wiki format: spaces instead of
/// underscores, first letter capitalized.
pub fn to_wiki_format(title: &str) -> String {
    capitalize_first(&title.trim().replace('_', " "))
}

pub fn capitalize_first(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
