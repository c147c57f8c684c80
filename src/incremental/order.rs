use std::ffi::OsString;
use std::fs;

use crate::error::Result;
use crate::paths::Entry;

/// Sorts names into recursive order: reverse alphabetical, where a directory
/// comes right after everything beneath it.
///
/// Comparing `name + "/"` rather than `name` is what places `dir` after
/// `dir.old` and every `dir/...` path.
pub fn sorted_recursive_order<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut keyed: Vec<String> = names
        .iter()
        .map(|name| {
            let name = name.as_ref();
            debug_assert!(!name.ends_with('/'), "Names must not end with a slash");
            format!("{name}/")
        })
        .collect();
    keyed.sort_unstable_by(|a, b| b.cmp(a));
    keyed
        .into_iter()
        .map(|mut key| {
            key.pop();
            key
        })
        .collect()
}

/// The string a relative path is ordered by: the path with a trailing slash.
/// Under this key `a` sorts after `a.b` and `a/x` alike, so a directory and
/// its whole subtree are contiguous in reverse order.
pub fn order_key(rel_path: &str) -> String {
    format!("{rel_path}/")
}

/// Children of `dir` that come after `last_path` in recursive order.
///
/// Relative paths are compared byte-wise through [`order_key`], the same key
/// siblings are sorted by. An empty `last_path` means nothing has been
/// scanned yet, so every child is returned. Otherwise a child is skipped while
/// it, or the sibling after it, still sorts at or above the cursor. That keeps
/// the child that contains the cursor so the walk can resume inside it.
pub fn list_unscanned_entries(dir: &Entry, last_path: &str) -> Result<Vec<Entry>> {
    let mut children: Vec<(String, OsString)> = fs::read_dir(dir.abspath())?
        .map(|entry| {
            entry.map(|e| {
                let name = e.file_name();
                (format!("{}/", name.to_string_lossy()), name)
            })
        })
        .collect::<std::io::Result<_>>()?;
    children.sort_unstable_by(|a, b| b.0.cmp(&a.0));

    let entries: Vec<Entry> = children.into_iter().map(|(_, name)| dir.join(name)).collect();
    if last_path.is_empty() {
        return Ok(entries);
    }

    let cursor = order_key(last_path);
    let keys: Vec<String> = entries.iter().map(|e| order_key(&e.rel_str())).collect();
    let unscanned = entries
        .iter()
        .enumerate()
        .filter(|(index, _)| {
            let next_is_scanned = keys.get(index + 1).is_some_and(|next| *next >= cursor);
            !next_is_scanned && keys[*index] < cursor
        })
        .map(|(_, entry)| entry.clone())
        .collect();
    Ok(unscanned)
}
