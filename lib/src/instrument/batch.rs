use super::{instrument_class, Error, FileError};
use crate::jvm;
use log::{info, warn};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

/// Settings for instrumenting a whole directory tree
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Extension of the files to instrument (without the leading dot)
    pub extension: String,

    /// Skip files that fail instead of stopping at the first one
    pub keep_going: bool,
}

impl Default for BatchOptions {
    fn default() -> BatchOptions {
        BatchOptions {
            extension: String::from("class"),
            keep_going: false,
        }
    }
}

/// Outcome of [`instrument_tree`]
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Output files written, in the order they were written
    pub written: Vec<PathBuf>,

    /// Inputs that were skipped (only ever non-empty when keeping going)
    pub failed: Vec<FileError>,
}

/// Instrument every matching file under `input_root` into the same relative path under
/// `output_root`
///
/// Files are processed one at a time in sorted order. Unless `keep_going` is set, the first
/// failure stops the batch (files already written stay written).
pub fn instrument_tree(
    input_root: &Path,
    output_root: &Path,
    options: &BatchOptions,
) -> Result<BatchReport, FileError> {
    let found = class_files(input_root, options)?;
    let mut report = BatchReport {
        written: vec![],
        failed: found.unreadable,
    };
    for input in found.files {
        let relative = input.strip_prefix(input_root).map_err(|_| FileError {
            input: input.clone(),
            error: Error::Precondition(format!(
                "walked outside of {}",
                input_root.display()
            )),
        })?;
        let output = output_root.join(relative);
        match instrument_file(&input, &output) {
            Ok(()) => report.written.push(output),
            Err(err) if options.keep_going => {
                warn!("Skipping {}", err);
                report.failed.push(err);
            }
            Err(err) => return Err(err),
        }
    }
    info!("done");
    Ok(report)
}

/// Instrument a single file
///
/// Nothing is left at `output` unless the whole class was instrumented and written out.
pub fn instrument_file(input: &Path, output: &Path) -> Result<(), FileError> {
    let attribute_to_input = |error: Error| FileError {
        input: input.to_path_buf(),
        error,
    };

    let bytes = fs::read(input)
        .map_err(|err| attribute_to_input(Error::Parse(jvm::Error::IoError(err))))?;
    let instrumented = instrument_class(&bytes).map_err(attribute_to_input)?;
    write_atomically(output, &instrumented)
        .map_err(|err| attribute_to_input(Error::Write(err)))?;

    info!("{}", output.display());
    Ok(())
}

/// Files found by [`class_files`]
#[derive(Debug, Default)]
pub struct FoundFiles {
    /// Matching files, in sorted order
    pub files: Vec<PathBuf>,

    /// Entries that could not be walked (only ever non-empty when keeping going)
    pub unreadable: Vec<FileError>,
}

/// Every file under `root` with the configured extension
///
/// A missing or unreadable `root` is always an error. Below it, unreadable directories and
/// symlink loops are skipped when keeping going.
pub fn class_files(root: &Path, options: &BatchOptions) -> Result<FoundFiles, FileError> {
    let mut found = FoundFiles::default();
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let depth = err.depth();
                let err = FileError {
                    input: err.path().unwrap_or(root).to_path_buf(),
                    error: Error::Parse(jvm::Error::IoError(err.into())),
                };
                if options.keep_going && depth > 0 {
                    warn!("Skipping {}", err);
                    found.unreadable.push(err);
                    continue;
                }
                return Err(err);
            }
        };
        let path = entry.path();
        if entry.file_type().is_file()
            && path.extension().map_or(false, |ext| ext == options.extension.as_str())
        {
            found.files.push(entry.into_path());
        }
    }
    Ok(found)
}

/// Write to a temporary file next to `output`, then move it into place
fn write_atomically(output: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let directory = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !directory.is_dir() {
        fs::create_dir_all(directory)?;
        info!("Wrote transformed classes to {}", directory.display());
    }

    let mut file = NamedTempFile::new_in(directory)?;
    file.write_all(bytes)?;
    file.persist(output).map_err(|err| err.error)?;
    Ok(())
}
