//! Path naming utilities
//!
//! The external tool names its output after the input: `App.dll` becomes
//! `App_Secure.dll`. These helpers derive the staged and produced paths
//! from that convention.

use std::path::{Path, PathBuf};

/// Insert `suffix` between the file stem and its extension.
///
/// `App.dll` + `_Secure` -> `App_Secure.dll`, `README` + `_Secure` -> `README_Secure`.
pub fn suffixed_file_name(path: &Path, suffix: &str) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match path.extension() {
        Some(ext) => format!("{}{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}{}", stem, suffix),
    }
}

/// Sibling of `path` carrying the suffixed file name
pub fn pathbuf_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    path.with_file_name(suffixed_file_name(path, suffix))
}

/// Location of `file` once copied into `dir`
pub fn staged_path(dir: &Path, file: &Path) -> PathBuf {
    match file.file_name() {
        Some(name) => dir.join(name),
        None => dir.to_path_buf(),
    }
}

/// Location the tool writes its output for `file` inside `dir`
pub fn produced_path(dir: &Path, file: &Path, suffix: &str) -> PathBuf {
    dir.join(suffixed_file_name(file, suffix))
}
