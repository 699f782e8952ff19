//! Project filesystem layout and inbox import.
//!
//! A project lives at `PROJECTS/{CODE}/` with the SRT input beside the
//! workbook the pipeline produces:
//!
//! ```text
//! PROJECTS/AR8/
//!   AR8.srt             # input
//!   AR8_prompts.xlsx    # workbook
//!   AR8_progress.log    # append-only progress stream
//! ```
//!
//! Continuous mode scans an inbox directory for `{CODE}/{CODE}.srt`,
//! imports new codes into the projects directory, and removes the inbox
//! copy only after a fully successful run. The presence of
//! `PROJECTS/{CODE}` guards against duplicate imports.

use crate::{StoryboardError, StoryboardErrorKind, StoryboardResult};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Paths for one project.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub code: String,
    pub dir: PathBuf,
}

impl ProjectPaths {
    pub fn new(projects_dir: &Path, code: &str) -> Self {
        Self {
            code: code.to_string(),
            dir: projects_dir.join(code),
        }
    }

    pub fn srt_path(&self) -> PathBuf {
        self.dir.join(format!("{}.srt", self.code))
    }

    pub fn workbook_path(&self) -> PathBuf {
        self.dir.join(format!("{}_prompts.xlsx", self.code))
    }

    pub fn progress_log_path(&self) -> PathBuf {
        self.dir.join(format!("{}_progress.log", self.code))
    }

    /// Whether the project has been imported.
    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }
}

/// Codes in the inbox that have a well-formed `{CODE}/{CODE}.srt`.
pub fn scan_inbox(inbox_dir: &Path) -> Vec<String> {
    let Ok(read_dir) = std::fs::read_dir(inbox_dir) else {
        return Vec::new();
    };

    let mut codes: Vec<String> = read_dir
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|code| inbox_srt(inbox_dir, code).is_file())
        .collect();
    codes.sort();
    codes
}

/// Copy `{CODE}/{CODE}.srt` out of the inbox into the projects tree.
///
/// # Errors
///
/// `InputInvalid` when the inbox copy is missing; `Io` on copy failures.
pub fn import_project(
    inbox_dir: &Path,
    projects_dir: &Path,
    code: &str,
) -> StoryboardResult<ProjectPaths> {
    let source = inbox_srt(inbox_dir, code);
    if !source.is_file() {
        return Err(StoryboardError::new(StoryboardErrorKind::InputInvalid(
            format!("inbox has no SRT for {code}: {}", source.display()),
        )));
    }

    let project = ProjectPaths::new(projects_dir, code);
    std::fs::create_dir_all(&project.dir)?;
    std::fs::copy(&source, project.srt_path())?;
    debug!(code, dir = %project.dir.display(), "project imported");
    Ok(project)
}

/// Drop the inbox copy after a successful run.
pub fn remove_inbox_copy(inbox_dir: &Path, code: &str) -> StoryboardResult<()> {
    let dir = inbox_dir.join(code);
    if dir.is_dir() {
        std::fs::remove_dir_all(&dir)?;
    }
    Ok(())
}

fn inbox_srt(inbox_dir: &Path, code: &str) -> PathBuf {
    inbox_dir.join(code).join(format!("{code}.srt"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_finds_only_wellformed_inbox_entries() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path();

        std::fs::create_dir_all(inbox.join("AR8")).unwrap();
        std::fs::write(inbox.join("AR8").join("AR8.srt"), "1\n00:00:00,000 --> 00:00:01,000\nhi\n").unwrap();
        std::fs::create_dir_all(inbox.join("BAD")).unwrap();
        std::fs::write(inbox.join("stray.srt"), "").unwrap();

        assert_eq!(scan_inbox(inbox), vec!["AR8"]);
    }

    #[test]
    fn import_copies_and_remove_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        let projects = dir.path().join("projects");

        std::fs::create_dir_all(inbox.join("AR8")).unwrap();
        std::fs::write(inbox.join("AR8").join("AR8.srt"), "srt body").unwrap();

        let project = import_project(&inbox, &projects, "AR8").unwrap();
        assert!(project.exists());
        assert_eq!(std::fs::read_to_string(project.srt_path()).unwrap(), "srt body");

        remove_inbox_copy(&inbox, "AR8").unwrap();
        assert!(!inbox.join("AR8").exists());
    }

    #[test]
    fn import_missing_code_is_input_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let err = import_project(dir.path(), dir.path(), "NOPE").unwrap_err();
        assert!(matches!(err.kind(), StoryboardErrorKind::InputInvalid(_)));
    }
}
