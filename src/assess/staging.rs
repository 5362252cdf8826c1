//! Input Staging
//!
//! Each batch gets its own numbered run directory under the work root:
//!
//! ```text
//! <work_root>/micassess_001/
//!   input/                   staged micrographs, or input_classes.mrcs
//!   output/                  written by the tool (good/ bad/)
//!   input_micrographs.star   manifest of the original paths
//!   run.sh run.stdout run.stderr job.json
//! ```
//!
//! Run directories are never reused or deleted, so a failed batch can be
//! inspected after the fact.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use super::mrc::{self, MrcHeader};
use crate::error::{AssessError, Result};
use crate::kind::AssessKind;

/// Upper bound on numbered run directories under one work root.
const MAX_RUNS: usize = 9999;

/// One image handed in by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputItem {
    /// Identity reported back in the results
    pub id: String,
    pub path: PathBuf,
}

impl InputItem {
    /// Creates an item identified by the file stem (`m1.mrc` -> `m1`).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Self { id, path }
    }

    /// Creates an item with an explicit identity.
    pub fn with_id(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }
}

/// One classifiable image after staging.
///
/// A micrograph maps to one input file. A class average is one section of
/// an input stack, so a stack of N classes yields N staged inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedInput {
    /// `<input id>` for single images, `<input id>@<section>` inside a stack
    pub id: String,
    pub source: PathBuf,
    /// 1-based section inside `source` (class averages only)
    pub section: Option<u32>,
    /// Name the tool reports this image under: the file name inside
    /// `input/`, or `particle_<n>` for position n of the class stack
    pub staged_name: String,
}

impl StagedInput {
    /// Staged name without its extension.
    pub fn staged_stem(&self) -> &str {
        Path::new(&self.staged_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.staged_name)
    }
}

/// Paths of one run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    pub root: PathBuf,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl RunLayout {
    /// Creates the next free `<subcommand>_NNN` directory under `work_root`.
    ///
    /// The directory is claimed with a non-recursive `create_dir`, so two
    /// callers sharing a work root never end up in the same run directory.
    pub fn create(work_root: &Path, kind: AssessKind) -> Result<Self> {
        fs::create_dir_all(work_root)?;

        for pass in 1..=MAX_RUNS {
            let root = work_root.join(format!("{}_{:03}", kind.subcommand(), pass));
            match fs::create_dir(&root) {
                Ok(()) => {
                    let layout = Self::at(root);
                    fs::create_dir(&layout.input_dir)?;
                    debug!("Created run directory: {}", layout.root.display());
                    return Ok(layout);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(AssessError::Configuration(format!(
            "No free run directory left under {}",
            work_root.display()
        )))
    }

    /// Layout rooted at an existing directory.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            input_dir: root.join("input"),
            output_dir: root.join("output"),
            root,
        }
    }

    pub fn script_path(&self) -> PathBuf {
        self.root.join("run.sh")
    }

    pub fn stdout_path(&self) -> PathBuf {
        self.root.join("run.stdout")
    }

    pub fn stderr_path(&self) -> PathBuf {
        self.root.join("run.stderr")
    }

    pub fn job_path(&self) -> PathBuf {
        self.root.join("job.json")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("input_micrographs.star")
    }

    /// Single stack handed to the 2D classifier.
    pub fn class_stack_path(&self) -> PathBuf {
        self.input_dir.join("input_classes.mrcs")
    }

    pub fn accepted_path(&self) -> PathBuf {
        self.root.join("accepted.star")
    }
}

/// Rejects batches whose items would collide in the results or in `input/`.
pub fn check_inputs(kind: AssessKind, inputs: &[InputItem]) -> Result<()> {
    let mut ids = HashSet::new();
    let mut names = HashSet::new();

    for item in inputs {
        if item.id.trim().is_empty() {
            return Err(AssessError::InvalidParameter(format!(
                "Input '{}' has an empty id",
                item.path.display()
            )));
        }

        if !ids.insert(item.id.as_str()) {
            return Err(AssessError::InvalidParameter(format!(
                "Duplicate input id '{}'",
                item.id
            )));
        }

        if kind == AssessKind::Micrograph {
            let name = item.path.file_name().ok_or_else(|| {
                AssessError::InvalidParameter(format!(
                    "Input '{}' has no file name",
                    item.path.display()
                ))
            })?;
            if !names.insert(name.to_os_string()) {
                return Err(AssessError::InvalidParameter(format!(
                    "Duplicate micrograph file name '{}'",
                    name.to_string_lossy()
                )));
            }
        }
    }

    Ok(())
}

/// Places every input into `layout.input_dir`.
///
/// Micrographs keep their basename. Class average files are stacks of one
/// or more sections; they are joined into `input_classes.mrcs` (a single
/// stack is linked as is) and every section becomes its own staged input,
/// named `particle_<n>` after its 1-based position in that stack.
pub fn stage_inputs(
    kind: AssessKind,
    inputs: &[InputItem],
    layout: &RunLayout,
) -> Result<Vec<StagedInput>> {
    let sources = inputs
        .iter()
        .map(|item| {
            fs::canonicalize(&item.path).map_err(|e| AssessError::Staging {
                path: item.path.clone(),
                source: e,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    match kind {
        AssessKind::Micrograph => stage_micrographs(inputs, sources, layout),
        AssessKind::TwoDClass => stage_class_stacks(inputs, sources, layout),
    }
}

fn stage_micrographs(
    inputs: &[InputItem],
    sources: Vec<PathBuf>,
    layout: &RunLayout,
) -> Result<Vec<StagedInput>> {
    let mut staged = Vec::with_capacity(inputs.len());

    for (item, source) in inputs.iter().zip(sources) {
        let staged_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| item.id.clone());

        let target = layout.input_dir.join(&staged_name);
        link_or_copy(&source, &target).map_err(|e| AssessError::Staging {
            path: item.path.clone(),
            source: e,
        })?;
        debug!("Staged {} -> {}", source.display(), target.display());

        staged.push(StagedInput {
            id: item.id.clone(),
            source,
            section: None,
            staged_name,
        });
    }

    let paths: Vec<String> = staged.iter().map(|s| s.source.display().to_string()).collect();
    write_star(&layout.manifest_path(), "rlnMicrographName", &paths)?;

    Ok(staged)
}

fn stage_class_stacks(
    inputs: &[InputItem],
    sources: Vec<PathBuf>,
    layout: &RunLayout,
) -> Result<Vec<StagedInput>> {
    let mut headers = Vec::with_capacity(inputs.len());
    for (item, source) in inputs.iter().zip(&sources) {
        let header = MrcHeader::read(source).map_err(|e| AssessError::Staging {
            path: item.path.clone(),
            source: e,
        })?;

        if let Some(first) = headers.first() {
            if !header.compatible(first) {
                return Err(AssessError::InvalidParameter(format!(
                    "'{}' holds {}x{} images, '{}' holds {}x{}; class averages must share one size",
                    item.path.display(),
                    header.nx,
                    header.ny,
                    inputs[0].path.display(),
                    first.nx,
                    first.ny
                )));
            }
        }
        headers.push(header);
    }

    let mut staged = Vec::new();
    let mut ids = HashSet::new();
    for (item, (source, header)) in inputs.iter().zip(sources.iter().zip(&headers)) {
        for section in 1..=header.nz {
            let id = if header.nz == 1 {
                item.id.clone()
            } else {
                format!("{}@{}", item.id, section)
            };
            if !ids.insert(id.clone()) {
                return Err(AssessError::InvalidParameter(format!(
                    "Duplicate class average id '{}'",
                    id
                )));
            }

            staged.push(StagedInput {
                id,
                source: source.clone(),
                section: Some(section),
                staged_name: format!("particle_{}", staged.len() + 1),
            });
        }
    }

    let target = layout.class_stack_path();
    if sources.len() == 1 {
        link_or_copy(&sources[0], &target).map_err(|e| AssessError::Staging {
            path: inputs[0].path.clone(),
            source: e,
        })?;
    } else {
        let parts: Vec<(&Path, MrcHeader)> = sources
            .iter()
            .map(PathBuf::as_path)
            .zip(headers.iter().copied())
            .collect();
        mrc::write_stack(&parts, &target).map_err(|e| AssessError::Staging {
            path: target.clone(),
            source: e,
        })?;
    }
    debug!(
        "Staged {} class averages from {} file(s) into {}",
        staged.len(),
        inputs.len(),
        target.display()
    );

    Ok(staged)
}

#[cfg(unix)]
fn link_or_copy(source: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, target)
}

#[cfg(not(unix))]
fn link_or_copy(source: &Path, target: &Path) -> io::Result<()> {
    fs::copy(source, target).map(|_| ())
}

/// Writes a single-column RELION STAR table.
///
/// Values containing whitespace are quoted so they survive [`read_star`].
pub fn write_star(path: &Path, column: &str, values: &[String]) -> Result<()> {
    let mut file = File::create(path)?;

    writeln!(file, "# Star file generated by cryorunner")?;
    writeln!(file)?;
    writeln!(file, "data_")?;
    writeln!(file)?;
    writeln!(file, "loop_")?;
    writeln!(file, "_{} #1", column)?;
    for value in values {
        writeln!(file, "{}", star_quote(value))?;
    }

    Ok(())
}

/// Reads the values of a single-column STAR table written by [`write_star`].
pub fn read_star(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    let mut in_loop = false;
    let mut values = Vec::new();

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line == "loop_" {
            in_loop = true;
            continue;
        }
        if !in_loop || line.starts_with('_') || line.starts_with("data_") {
            continue;
        }
        if let Some(value) = first_token(line) {
            values.push(value);
        }
    }

    Ok(values)
}

fn star_quote(value: &str) -> String {
    let bare = !value.is_empty()
        && !value.chars().any(char::is_whitespace)
        && !value.starts_with(['"', '\'', '_', '#'])
        && !value.starts_with("data_")
        && value != "loop_";

    if bare {
        value.to_string()
    } else if value.contains('"') {
        format!("'{}'", value)
    } else {
        format!("\"{}\"", value)
    }
}

/// First value of a STAR data row, honouring `"..."` and `'...'` quoting.
///
/// A quote only closes when followed by whitespace or the end of the line.
fn first_token(line: &str) -> Option<String> {
    let quote = match line.chars().next()? {
        c @ ('"' | '\'') => c,
        _ => return line.split_whitespace().next().map(str::to_string),
    };

    let body = &line[1..];
    let mut search = 0;
    while let Some(offset) = body[search..].find(quote) {
        let end = search + offset;
        let rest = &body[end + 1..];
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return Some(body[..end].to_string());
        }
        search = end + 1;
    }

    // Unterminated quote: take the rest of the line
    Some(body.to_string())
}
