//! Inferring the installation root from announced search paths.

use std::path::{Path, PathBuf};

const ROOT_MARKERS: [&str; 2] = ["lua", "ui"];

/// Finds the installation root in a list of search-path segments.
///
/// Each segment is walked from itself up through its ancestors; the first
/// ancestor named `lua` or `ui` (any case) marks the root as its parent.
/// Segments are tried in order and the first match wins. Backslashes are
/// treated as separators.
#[must_use]
pub fn resolve_root<S: AsRef<str>>(segments: &[S]) -> Option<PathBuf> {
    segments
        .iter()
        .find_map(|segment| root_of(&segment.as_ref().replace('\\', "/")))
}

fn root_of(segment: &str) -> Option<PathBuf> {
    Path::new(segment).ancestors().find_map(|ancestor| {
        let name = ancestor.file_name()?.to_str()?;
        if ROOT_MARKERS
            .iter()
            .any(|marker| name.eq_ignore_ascii_case(marker))
        {
            ancestor
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .map(Path::to_path_buf)
        } else {
            None
        }
    })
}
