//! Path normalization shared by configuration loading and section matching.
//!
//! Section paths are compared by exact equality (a release is traced back to
//! the incoming section whose path equals its parent), so every configured
//! path is normalized once, syntactically, without touching the filesystem.

use std::env;
use std::path::{Component, Path, PathBuf};

/// Make `path` absolute (relative to CWD) and resolve `.`/`..` components.
///
/// Never consults the filesystem, so the result is stable whether or not the
/// volume is mounted at load time.
pub fn normalize_section_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };
    normalize_syntactic(&absolute)
}

/// Join a section path with a release name.
pub fn release_path(section: &Path, release_name: &str) -> PathBuf {
    section.join(release_name)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}
