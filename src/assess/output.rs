//! Output Parsing
//!
//! Maps the directory layout written by the classifier back onto the
//! staged inputs. This is a pure function of the filesystem and is the
//! only place the tool's output contract is interpreted:
//!
//! ```text
//! output/
//!   good/        accepted images (any extension, original basename kept)
//!   bad/         rejected images
//!   scores.json  optional {"<staged name or stem>": score}
//! ```
//!
//! Class averages come back as `particle_<n>.jpg`, n being the 1-based
//! position in the staged class stack. Category directories are matched
//! case-insensitively (`2dassess` writes `Good`/`Bad`).

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::staging::StagedInput;
use crate::error::{AssessError, Result};
use crate::kind::AssessKind;

/// Optional per-image score manifest inside the output directory.
pub const SCORES_FILE: &str = "scores.json";

/// `particle_<n>...`, n being the 1-based position in the class stack.
static PARTICLE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^particle_(\d+)(?:[._]|$)").expect("valid particle regex"));

/// Partition an input ends up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Accepted,
    Rejected,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Accepted, Category::Rejected];

    /// Directory name the tool writes for this category.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Category::Accepted => "good",
            Category::Rejected => "bad",
        }
    }
}

/// Verdict for one input item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub id: String,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Parses `output_dir` into one result per staged input, in input order.
///
/// # Errors
///
/// [`AssessError::OutputParse`] when the output or a category directory is
/// missing, a file matches no input, an input lands in both categories,
/// an input is absent from both, or `scores.json` cannot be read.
pub fn parse_output(
    kind: AssessKind,
    output_dir: &Path,
    staged: &[StagedInput],
) -> Result<Vec<ClassificationResult>> {
    if !output_dir.is_dir() {
        return Err(AssessError::output(output_dir, "output directory missing"));
    }

    let matcher = NameMatcher::new(kind, staged);
    let category_dirs = find_category_dirs(output_dir)?;
    let mut assigned: Vec<Option<Category>> = vec![None; staged.len()];

    for category in Category::ALL {
        let dir = &category_dirs[&category];

        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| AssessError::output(dir, e.to_string()))?;
            let name = entry.file_name().to_string_lossy().to_string();

            if name.starts_with('.') || !entry.file_type().is_file() && !entry.path_is_symlink() {
                debug!("Skipping {}", entry.path().display());
                continue;
            }

            let index = matcher.lookup(&name).map_err(|reason| AssessError::output(entry.path(), reason))?;

            match assigned[index] {
                None => assigned[index] = Some(category),
                Some(previous) if previous == category => {
                    debug!("Extra output for '{}': {}", staged[index].id, name);
                }
                Some(_) => {
                    return Err(AssessError::output(
                        entry.path(),
                        format!("input '{}' classified as both good and bad", staged[index].id),
                    ));
                }
            }
        }
    }

    let scores = read_scores(output_dir, &matcher)?;

    staged
        .iter()
        .zip(assigned)
        .enumerate()
        .map(|(index, (input, category))| {
            let category = category.ok_or_else(|| {
                AssessError::output(
                    output_dir,
                    format!(
                        "input '{}' (staged as {}) missing from output",
                        input.id, input.staged_name
                    ),
                )
            })?;

            Ok(ClassificationResult {
                id: input.id.clone(),
                category,
                score: scores.get(&index).copied(),
            })
        })
        .collect()
}

/// Locates `good/` and `bad/` regardless of case.
fn find_category_dirs(output_dir: &Path) -> Result<HashMap<Category, PathBuf>> {
    let mut found = HashMap::new();

    for entry in WalkDir::new(output_dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| AssessError::output(output_dir, e.to_string()))?;
        if !entry.file_type().is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().to_ascii_lowercase();
        for category in Category::ALL {
            if name == category.dir_name() {
                if found.contains_key(&category) {
                    return Err(AssessError::output(
                        entry.path(),
                        format!("more than one '{}' directory", category.dir_name()),
                    ));
                }
                found.insert(category, entry.path().to_path_buf());
            }
        }
    }

    for category in Category::ALL {
        if !found.contains_key(&category) {
            return Err(AssessError::output(
                output_dir.join(category.dir_name()),
                "missing category directory",
            ));
        }
    }

    Ok(found)
}

/// Reads `scores.json` if present, keyed by staged index.
fn read_scores(output_dir: &Path, matcher: &NameMatcher) -> Result<HashMap<usize, f64>> {
    let path = output_dir.join(SCORES_FILE);
    if !path.exists() {
        return Ok(HashMap::new());
    }

    let content = fs::read_to_string(&path).map_err(|e| AssessError::output(&path, e.to_string()))?;
    let raw: BTreeMap<String, f64> =
        serde_json::from_str(&content).map_err(|e| AssessError::output(&path, e.to_string()))?;

    let mut scores = HashMap::new();
    for (name, score) in raw {
        let index = matcher
            .lookup(&name)
            .map_err(|reason| AssessError::output(&path, format!("'{}': {}", name, reason)))?;
        scores.insert(index, score);
    }

    Ok(scores)
}

/// Resolves output file names to staged input indices.
struct NameMatcher {
    kind: AssessKind,
    count: usize,
    names: HashMap<String, usize>,
    /// `None` marks a stem shared by several inputs
    stems: HashMap<String, Option<usize>>,
}

impl NameMatcher {
    fn new(kind: AssessKind, staged: &[StagedInput]) -> Self {
        let mut names = HashMap::new();
        let mut stems: HashMap<String, Option<usize>> = HashMap::new();

        for (index, input) in staged.iter().enumerate() {
            names.insert(input.staged_name.clone(), index);
            stems
                .entry(input.staged_stem().to_string())
                .and_modify(|slot| *slot = None)
                .or_insert(Some(index));
        }

        Self {
            kind,
            count: staged.len(),
            names,
            stems,
        }
    }

    fn lookup(&self, name: &str) -> std::result::Result<usize, String> {
        if let Some(&index) = self.names.get(name) {
            return Ok(index);
        }

        if self.kind == AssessKind::TwoDClass {
            return self.lookup_particle(name);
        }

        let stem = Path::new(name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name);

        // A shared stem is ambiguous even if one input is staged under exactly that name
        if let Some(None) = self.stems.get(stem) {
            return Err(format!("'{}' is ambiguous between several inputs", name));
        }

        if let Some(&index) = self.names.get(stem) {
            return Ok(index);
        }

        match self.stems.get(stem) {
            Some(Some(index)) => Ok(*index),
            _ => Err(format!("'{}' does not match any staged input", name)),
        }
    }

    fn lookup_particle(&self, name: &str) -> std::result::Result<usize, String> {
        let number: usize = PARTICLE_NAME
            .captures(name)
            .and_then(|caps| caps[1].parse().ok())
            .ok_or_else(|| format!("'{}' does not match any staged input", name))?;

        if number == 0 || number > self.count {
            return Err(format!(
                "'{}' refers to particle {} but the class stack holds {}",
                name, number, self.count
            ));
        }

        Ok(number - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn staged_mics(names: &[&str]) -> Vec<StagedInput> {
        names
            .iter()
            .map(|name| StagedInput {
                id: Path::new(name).file_stem().unwrap().to_string_lossy().to_string(),
                source: PathBuf::from("/data").join(name),
                section: None,
                staged_name: name.to_string(),
            })
            .collect()
    }

    fn staged_classes(count: usize) -> Vec<StagedInput> {
        (1..=count)
            .map(|n| StagedInput {
                id: format!("classes@{}", n),
                source: PathBuf::from("/data/classes.mrcs"),
                section: Some(n as u32),
                staged_name: format!("particle_{}", n),
            })
            .collect()
    }

    fn layout(root: &Path, good: &[&str], bad: &[&str]) -> PathBuf {
        let output = root.join("output");
        fs::create_dir_all(output.join("good")).unwrap();
        fs::create_dir_all(output.join("bad")).unwrap();
        for name in good {
            fs::write(output.join("good").join(name), b"jpg").unwrap();
        }
        for name in bad {
            fs::write(output.join("bad").join(name), b"jpg").unwrap();
        }
        output
    }

    fn ids(results: &[ClassificationResult], category: Category) -> Vec<&str> {
        results
            .iter()
            .filter(|r| r.category == category)
            .map(|r| r.id.as_str())
            .collect()
    }

    #[test]
    fn test_partition_by_stem() {
        let temp_dir = tempdir().unwrap();
        let output = layout(temp_dir.path(), &["m1.jpg", "m3.jpg"], &["m2.jpg"]);
        let staged = staged_mics(&["m1.mrc", "m2.mrc", "m3.mrc"]);

        let results = parse_output(AssessKind::Micrograph, &output, &staged).unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, "m1");
        assert_eq!(ids(&results, Category::Accepted), vec!["m1", "m3"]);
        assert_eq!(ids(&results, Category::Rejected), vec!["m2"]);
        assert!(results.iter().all(|r| r.score.is_none()));
    }

    #[test]
    fn test_full_name_and_double_extension() {
        let temp_dir = tempdir().unwrap();
        let output = layout(temp_dir.path(), &["a.dw.mrc"], &["b.dw.mrc.jpg"]);
        let staged = staged_mics(&["a.dw.mrc", "b.dw.mrc"]);

        let results = parse_output(AssessKind::Micrograph, &output, &staged).unwrap();
        assert_eq!(results[0].category, Category::Accepted);
        assert_eq!(results[1].category, Category::Rejected);
    }

    #[test]
    fn test_case_insensitive_category_dirs() {
        let temp_dir = tempdir().unwrap();
        let output = temp_dir.path().join("output");
        fs::create_dir_all(output.join("Good")).unwrap();
        fs::create_dir_all(output.join("Bad")).unwrap();
        fs::write(output.join("Good/particle_2.jpg"), b"jpg").unwrap();
        fs::write(output.join("Bad/particle_1.jpg"), b"jpg").unwrap();

        let results = parse_output(AssessKind::TwoDClass, &output, &staged_classes(2)).unwrap();
        assert_eq!(ids(&results, Category::Accepted), vec!["classes@2"]);
        assert_eq!(ids(&results, Category::Rejected), vec!["classes@1"]);
    }

    #[test]
    fn test_particle_out_of_range() {
        let temp_dir = tempdir().unwrap();
        let output = layout(temp_dir.path(), &["particle_1.jpg", "particle_3.jpg"], &["particle_2.jpg"]);

        let result = parse_output(AssessKind::TwoDClass, &output, &staged_classes(2));
        match result {
            Err(AssessError::OutputParse { path, .. }) => assert!(path.ends_with("good/particle_3.jpg")),
            other => panic!("expected output parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_output_dir() {
        let temp_dir = tempdir().unwrap();
        let result = parse_output(
            AssessKind::Micrograph,
            &temp_dir.path().join("output"),
            &staged_mics(&["m1.mrc"]),
        );
        assert!(matches!(result, Err(AssessError::OutputParse { .. })));
    }

    #[test]
    fn test_missing_category_dir() {
        let temp_dir = tempdir().unwrap();
        let output = temp_dir.path().join("output");
        fs::create_dir_all(output.join("good")).unwrap();
        fs::write(output.join("good/m1.jpg"), b"jpg").unwrap();

        let result = parse_output(AssessKind::Micrograph, &output, &staged_mics(&["m1.mrc"]));
        match result {
            Err(AssessError::OutputParse { path, reason }) => {
                assert_eq!(path, output.join("bad"));
                assert!(reason.contains("missing category"));
            }
            other => panic!("expected output parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_unmatched_file() {
        let temp_dir = tempdir().unwrap();
        let output = layout(temp_dir.path(), &["m1.jpg", "stranger.jpg"], &[]);

        let result = parse_output(AssessKind::Micrograph, &output, &staged_mics(&["m1.mrc"]));
        match result {
            Err(AssessError::OutputParse { path, .. }) => assert!(path.ends_with("stranger.jpg")),
            other => panic!("expected output parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_omitted_input() {
        let temp_dir = tempdir().unwrap();
        let output = layout(temp_dir.path(), &["m1.jpg"], &[]);

        let result = parse_output(AssessKind::Micrograph, &output, &staged_mics(&["m1.mrc", "m2.mrc"]));
        match result {
            Err(AssessError::OutputParse { reason, .. }) => assert!(reason.contains("'m2'")),
            other => panic!("expected output parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_input_in_both_categories() {
        let temp_dir = tempdir().unwrap();
        let output = layout(temp_dir.path(), &["m1.jpg"], &["m1.png"]);

        let result = parse_output(AssessKind::Micrograph, &output, &staged_mics(&["m1.mrc"]));
        assert!(matches!(result, Err(AssessError::OutputParse { .. })));
    }

    #[test]
    fn test_repeat_in_same_category_allowed() {
        let temp_dir = tempdir().unwrap();
        let output = layout(temp_dir.path(), &["m1.jpg", "m1.png"], &[]);

        let results = parse_output(AssessKind::Micrograph, &output, &staged_mics(&["m1.mrc"])).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_ambiguous_stem() {
        let temp_dir = tempdir().unwrap();
        let output = layout(temp_dir.path(), &["m1.jpg"], &[]);

        let result = parse_output(
            AssessKind::Micrograph,
            &output,
            &staged_mics(&["m1.mrc", "m1.tif"]),
        );
        match result {
            Err(AssessError::OutputParse { reason, .. }) => assert!(reason.contains("ambiguous")),
            other => panic!("expected output parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_shared_stem_ambiguous_despite_exact_name() {
        let temp_dir = tempdir().unwrap();
        let output = layout(temp_dir.path(), &["a.jpg"], &[]);

        let result = parse_output(AssessKind::Micrograph, &output, &staged_mics(&["a", "a.mrc"]));
        match result {
            Err(AssessError::OutputParse { path, reason }) => {
                assert!(path.ends_with("good/a.jpg"));
                assert!(reason.contains("ambiguous"));
            }
            other => panic!("expected output parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_exact_name_wins_over_shared_stem() {
        let temp_dir = tempdir().unwrap();
        let output = layout(temp_dir.path(), &["a"], &["a.mrc"]);

        let results = parse_output(AssessKind::Micrograph, &output, &staged_mics(&["a", "a.mrc"])).unwrap();
        assert_eq!(results[0].category, Category::Accepted);
        assert_eq!(results[1].category, Category::Rejected);
    }

    #[test]
    fn test_hidden_files_ignored() {
        let temp_dir = tempdir().unwrap();
        let output = layout(temp_dir.path(), &["m1.jpg", ".DS_Store"], &[]);

        let results = parse_output(AssessKind::Micrograph, &output, &staged_mics(&["m1.mrc"])).unwrap();
        assert_eq!(results[0].category, Category::Accepted);
    }

    #[test]
    fn test_scores_manifest() {
        let temp_dir = tempdir().unwrap();
        let output = layout(temp_dir.path(), &["m1.jpg"], &["m2.jpg"]);
        fs::write(output.join(SCORES_FILE), r#"{"m1": 0.91, "m2.mrc": 0.12}"#).unwrap();

        let results = parse_output(AssessKind::Micrograph, &output, &staged_mics(&["m1.mrc", "m2.mrc"])).unwrap();
        assert_eq!(results[0].score, Some(0.91));
        assert_eq!(results[1].score, Some(0.12));
    }

    #[test]
    fn test_malformed_scores() {
        let temp_dir = tempdir().unwrap();
        let output = layout(temp_dir.path(), &["m1.jpg"], &[]);
        fs::write(output.join(SCORES_FILE), "not json").unwrap();

        let result = parse_output(AssessKind::Micrograph, &output, &staged_mics(&["m1.mrc"]));
        match result {
            Err(AssessError::OutputParse { path, .. }) => assert!(path.ends_with(SCORES_FILE)),
            other => panic!("expected output parse error, got {:?}", other),
        }

        fs::write(output.join(SCORES_FILE), r#"{"m7": 0.5}"#).unwrap();
        let result = parse_output(AssessKind::Micrograph, &output, &staged_mics(&["m1.mrc"]));
        assert!(matches!(result, Err(AssessError::OutputParse { .. })));
    }

    #[test]
    fn test_empty_batch() {
        let temp_dir = tempdir().unwrap();
        let output = layout(temp_dir.path(), &[], &[]);
        let results = parse_output(AssessKind::Micrograph, &output, &[]).unwrap();
        assert!(results.is_empty());
    }
}
