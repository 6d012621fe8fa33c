//! Local/remote source position mapping
//!
//! Local positions are 0-based lines in files as the user sees them. Remote
//! positions are 1-based lines in paths as the debuggee reports them. The two
//! differ in three ways: line base, files packaged inside archives, and
//! statements continued across lines with a trailing backslash, which the
//! debuggee attributes to the statement's last physical line.

use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::Read;
use std::path::Path;

use serde::Serialize;
use tracing::{trace, warn};
use tree_sitter::{Parser, Point};

/// Host filesystem compares paths case-insensitively
pub const CASE_INSENSITIVE_FS: bool = cfg!(any(windows, target_os = "macos"));

const ARCHIVE_EXTENSIONS: &[&str] = &[".egg", ".zip", ".whl"];

/// Position in a local source file, 0-based line
#[derive(Debug, Clone, Serialize)]
pub struct LocalPosition {
    file: String,
    line: u32,
    #[serde(skip)]
    key: String,
}

impl LocalPosition {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        let file = file.into();
        let key = if CASE_INSENSITIVE_FS {
            file.to_lowercase()
        } else {
            file.clone()
        };
        Self { file, line, key }
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }
}

impl PartialEq for LocalPosition {
    fn eq(&self, other: &Self) -> bool {
        self.line == other.line && self.key == other.key
    }
}

impl Eq for LocalPosition {}

impl Hash for LocalPosition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.line.hash(state);
    }
}

impl std::fmt::Display for LocalPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line + 1)
    }
}

/// Position as the debuggee reports it, 1-based line
#[derive(Debug, Clone, Serialize)]
pub struct RemotePosition {
    file: String,
    line: u32,
    #[serde(skip)]
    key: String,
}

impl RemotePosition {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        let file = file.into();
        let key = if is_windows_path(&file) {
            file.to_lowercase()
        } else {
            file.clone()
        };
        Self { file, line, key }
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }
}

impl PartialEq for RemotePosition {
    fn eq(&self, other: &Self) -> bool {
        self.line == other.line && self.key == other.key
    }
}

impl Eq for RemotePosition {}

impl Hash for RemotePosition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.line.hash(state);
    }
}

impl std::fmt::Display for RemotePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Drive-letter or backslash-separated path
fn is_windows_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    let drive = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
    drive || path.contains('\\')
}

/// Split `archive.egg!entry` into its archive and entry parts
fn split_archive(file: &str) -> Option<(&str, &str)> {
    let (archive, entry) = file.split_once('!')?;
    let lower = archive.to_ascii_lowercase();
    if ARCHIVE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        Some((archive, entry.trim_start_matches(['/', '\\'])))
    } else {
        None
    }
}

/// Maps positions between the local view and the debuggee's view
///
/// Stateless; every call reads the file system afresh.
#[derive(Debug, Default, Clone)]
pub struct PositionConverter;

impl PositionConverter {
    pub fn new() -> Self {
        Self
    }

    /// Map a local position to the position the debuggee will report
    ///
    /// Lines that end in a continuation marker are skipped forward so the
    /// statement is anchored on its last physical line.
    pub fn to_remote(&self, local: &LocalPosition) -> RemotePosition {
        let file = match split_archive(local.file()) {
            Some((archive, entry)) => format!("{}/{}", archive, entry),
            None => local.file().to_string(),
        };

        let mut line = local.line();
        if let Some(lines) = self.read_lines(local.file()) {
            while is_continuation(&lines, line) {
                line += 1;
            }
        }

        RemotePosition::new(file, line + 1)
    }

    /// Map a debuggee position back to a local file
    ///
    /// Returns `None` when no local file (or archive entry) backs the path.
    pub fn to_local(&self, remote: &RemotePosition) -> Option<LocalPosition> {
        let file = self.resolve_local_file(remote.file())?;

        let mut line = remote.line().saturating_sub(1);
        if let Some(lines) = self.read_lines(&file) {
            while line > 0 && is_continuation(&lines, line - 1) {
                line -= 1;
            }
        }

        Some(LocalPosition::new(file, line))
    }

    /// Name of the innermost function enclosing a local line, if any
    ///
    /// The file is parsed as Python, so lines inside string literals belong
    /// to the function that owns the literal. `None` at module level and
    /// whenever the source cannot be read or parsed.
    pub fn enclosing_function(&self, local: &LocalPosition) -> Option<String> {
        let text = self.read_text(local.file())?;
        let row = local.line() as usize;
        let line = text.lines().nth(row)?;
        let column = line.len() - line.trim_start().len();

        let mut parser = Parser::new();
        if let Err(e) = parser.set_language(&tree_sitter_python::LANGUAGE.into()) {
            warn!(error = %e, "cannot load the Python grammar");
            return None;
        }
        let tree = parser.parse(&text, None)?;
        let point = Point::new(row, column);
        let mut node = tree.root_node().descendant_for_point_range(point, point)?;

        loop {
            if node.kind() == "function_definition" {
                let name = node.child_by_field_name("name")?;
                return name.utf8_text(text.as_bytes()).ok().map(str::to_string);
            }
            node = node.parent()?;
        }
    }

    fn resolve_local_file(&self, remote_file: &str) -> Option<String> {
        if Path::new(remote_file).is_file() {
            return Some(remote_file.to_string());
        }

        // Walk up the path looking for an archive that contains the rest
        let separators: Vec<usize> = remote_file
            .match_indices(['/', '\\'])
            .map(|(idx, _)| idx)
            .collect();
        for &idx in separators.iter().rev() {
            let (archive, entry) = (&remote_file[..idx], &remote_file[idx + 1..]);
            let lower = archive.to_ascii_lowercase();
            if !ARCHIVE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
                continue;
            }
            if !Path::new(archive).is_file() {
                continue;
            }
            let entry = entry.replace('\\', "/");
            if read_archive_entry(archive, &entry).is_some() {
                return Some(format!("{}!{}", archive, entry));
            }
        }

        trace!(file = %remote_file, "no local file for remote path");
        None
    }

    fn read_text(&self, file: &str) -> Option<String> {
        match split_archive(file) {
            Some((archive, entry)) => read_archive_entry(archive, entry),
            None => std::fs::read_to_string(file).ok(),
        }
    }

    fn read_lines(&self, file: &str) -> Option<Vec<String>> {
        let text = self.read_text(file)?;
        Some(text.lines().map(str::to_string).collect())
    }
}

fn read_archive_entry(archive: &str, entry: &str) -> Option<String> {
    let file = File::open(archive).ok()?;
    let mut zip = zip::ZipArchive::new(file).ok()?;
    let mut entry = zip.by_name(entry).ok()?;
    let mut text = String::new();
    entry.read_to_string(&mut text).ok()?;
    Some(text)
}

fn is_continuation(lines: &[String], line: u32) -> bool {
    lines
        .get(line as usize)
        .map(|text| text.trim().ends_with('\\'))
        .unwrap_or(false)
}
