//! Naming rules for output folders and files

use std::path::Path;

/// Folder name for a product: letters only, each word title-cased, joined.
///
/// `"Call Manager 10.x (Core)"` becomes `"CallManagerXCore"`.
pub fn product_folder_name(product: &str) -> String {
    let letters: String = product
        .chars()
        .filter(|c| c.is_ascii_alphabetic() || c.is_whitespace())
        .collect();

    letters
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                },
                None => String::new(),
            }
        })
        .collect()
}

/// Whether a file row belongs to `identifier`: an exact match or
/// `identifier` followed by `_` and a suffix.
pub fn belongs_to(row_identifier: &str, identifier: &str) -> bool {
    match row_identifier.strip_prefix(identifier) {
        Some(rest) => rest.is_empty() || rest.starts_with('_'),
        None => false,
    }
}

pub fn archive_file_name(publication_id: &str) -> String {
    format!("{publication_id}_all_files.zip")
}

/// Local file name for a row: the final component of the stored name, or
/// `file_<n>` (1-based) when the row has none.
pub fn local_file_name(stored: Option<&str>, index: usize) -> String {
    stored
        .map(|name| name.rsplit(['/', '\\']).next().unwrap_or(name).trim())
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(str::to_string)
        .unwrap_or_else(|| format!("file_{}", index + 1))
}

/// Render `path` relative to `base` with forward slashes.
pub fn portable_relative_path(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
