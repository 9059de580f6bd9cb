use crate::csv_output::write_timeline;
use crate::err::{ConvertError, Result};
use crate::evtx_source::EvtxSource;
use crate::timeline::Timeline;

use hashbrown::HashMap as FastMap;
use log::{debug, info, warn};
use serde::Serialize;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

#[cfg(feature = "multithreading")]
use rayon::prelude::*;

pub const DEFAULT_FILE_PREFIX: &str = "timeline_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterSettings {
    /// Directory the tables are written into.
    output_dir: PathBuf,
    /// Prepended to the source's file stem to name its table.
    file_prefix: String,
    delimiter: u8,
    /// Number of sources converted concurrently, `0` means one per CPU.
    num_threads: usize,
    validate_checksums: bool,
}

impl Default for ConverterSettings {
    fn default() -> Self {
        ConverterSettings {
            output_dir: PathBuf::from("."),
            file_prefix: DEFAULT_FILE_PREFIX.to_owned(),
            delimiter: b',',
            num_threads: 0,
            validate_checksums: false,
        }
    }
}

impl ConverterSettings {
    pub fn new() -> Self {
        ConverterSettings::default()
    }

    pub fn output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn file_prefix(mut self, file_prefix: impl Into<String>) -> Self {
        self.file_prefix = file_prefix.into();
        self
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Sets the number of worker threads.
    /// `0` will let rayon decide.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = if cfg!(feature = "multithreading") {
            num_threads
        } else {
            // If multithreading is not enabled, always use only 1 thread.
            1
        };
        self
    }

    pub fn validate_checksums(mut self, validate_checksums: bool) -> Self {
        self.validate_checksums = validate_checksums;
        self
    }

    pub fn get_output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn get_file_prefix(&self) -> &str {
        &self.file_prefix
    }

    pub fn get_delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn get_num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn should_validate_checksums(&self) -> bool {
        self.validate_checksums
    }
}

/// Outcome of one successfully converted source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source: PathBuf,
    pub output: PathBuf,
    pub records: usize,
    pub columns: usize,
    pub skipped_records: usize,
}

#[derive(Debug)]
enum Planned<'a> {
    Convert(&'a Path),
    Collision {
        source: &'a Path,
        output: PathBuf,
        claimed_by: &'a Path,
    },
}

/// Converts `.evtx` sources into one CSV timeline each.
#[derive(Debug, Clone, Default)]
pub struct Converter {
    settings: ConverterSettings,
}

impl Converter {
    pub fn new(settings: ConverterSettings) -> Self {
        Converter { settings }
    }

    pub fn settings(&self) -> &ConverterSettings {
        &self.settings
    }

    /// `<output_dir>/<prefix><source stem>.csv`
    pub fn output_path_for(&self, source: impl AsRef<Path>) -> PathBuf {
        let stem = source
            .as_ref()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "events".to_owned());

        self.settings
            .output_dir
            .join(format!("{}{}.csv", self.settings.file_prefix, stem))
    }

    /// Decodes, flattens, sorts and writes a single source.
    pub fn convert_source(&self, source: impl AsRef<Path>) -> Result<SourceReport> {
        let source = source.as_ref();
        let output = self.output_path_for(source);
        info!("converting `{}`", source.display());

        let batch = EvtxSource::new(source)
            .validate_checksums(self.settings.validate_checksums)
            .materialize()?;

        let timeline = Timeline::build(&batch.records);
        self.write(&timeline, &output)?;

        info!(
            "wrote {} rows x {} columns to `{}`",
            timeline.len(),
            timeline.schema().len(),
            output.display()
        );

        Ok(SourceReport {
            source: source.to_path_buf(),
            output,
            records: timeline.len(),
            columns: timeline.schema().len(),
            skipped_records: batch.skipped_records,
        })
    }

    /// Writes through a temporary file in the output directory, renamed into place once complete.
    pub fn write(&self, timeline: &Timeline, output: &Path) -> Result<()> {
        let dir = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        fs::create_dir_all(dir).map_err(|e| ConvertError::serialization(output, e))?;

        let staging = tempfile::Builder::new()
            .prefix(".evtx_timeline")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| ConvertError::serialization(output, e))?;

        debug!(
            "staging `{}` at `{}`",
            output.display(),
            staging.path().display()
        );

        let writer = write_timeline(timeline, BufWriter::new(staging), self.settings.delimiter)
            .map_err(|e| ConvertError::serialization(output, e))?;

        let staging = writer
            .into_inner()
            .map_err(|e| ConvertError::serialization(output, e.into_error()))?;

        staging
            .persist(output)
            .map_err(|e| ConvertError::serialization(output, e.error))?;

        Ok(())
    }

    /// Assigns every source its output, the first source claiming a name keeps it.
    fn plan<'a>(&self, sources: &'a [PathBuf]) -> Vec<Planned<'a>> {
        let mut claimed: FastMap<PathBuf, &'a Path, ahash::RandomState> =
            FastMap::with_hasher(ahash::RandomState::new());

        sources
            .iter()
            .map(|source| {
                let output = self.output_path_for(source);
                match claimed.get(&output).copied() {
                    Some(previous) => Planned::Collision {
                        source: source.as_path(),
                        output,
                        claimed_by: previous,
                    },
                    None => {
                        claimed.insert(output, source.as_path());
                        Planned::Convert(source.as_path())
                    }
                }
            })
            .collect()
    }

    fn run_planned(&self, planned: &Planned<'_>) -> Result<SourceReport> {
        match planned {
            Planned::Convert(source) => self.convert_source(source),
            Planned::Collision {
                source,
                output,
                claimed_by,
            } => {
                warn!(
                    "`{}` maps to `{}`, which `{}` already produces",
                    source.display(),
                    output.display(),
                    claimed_by.display()
                );
                Err(ConvertError::OutputCollision {
                    path: source.to_path_buf(),
                    output: output.clone(),
                    claimed_by: claimed_by.to_path_buf(),
                })
            }
        }
    }

    /// Converts every source independently.
    ///
    /// A failing source never stops the others; results come back in input order.
    /// Sources whose output name was already claimed by an earlier source fail with
    /// [`ConvertError::OutputCollision`] instead of replacing that table.
    pub fn convert_all(&self, sources: &[PathBuf]) -> Vec<Result<SourceReport>> {
        let planned = self.plan(sources);

        #[cfg(feature = "multithreading")]
        {
            if planned.len() > 1 && self.settings.num_threads != 1 {
                match rayon::ThreadPoolBuilder::new()
                    .num_threads(self.settings.num_threads)
                    .build()
                {
                    Ok(pool) => {
                        return pool.install(|| {
                            planned
                                .par_iter()
                                .map(|planned| self.run_planned(planned))
                                .collect()
                        });
                    }
                    Err(e) => {
                        warn!("failed to start thread pool, converting sequentially: {}", e);
                    }
                }
            }
        }

        planned
            .iter()
            .map(|planned| self.run_planned(planned))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    /// A file header with no chunks behind it, the smallest container `evtx` accepts.
    fn write_empty_evtx(path: &Path) {
        let mut header = vec![0_u8; 4096];
        header[..8].copy_from_slice(b"ElfFile\0");
        header[40..42].copy_from_slice(&4096_u16.to_le_bytes());
        File::create(path).unwrap().write_all(&header).unwrap();
    }

    #[test]
    fn test_output_name_is_prefix_plus_stem() {
        let converter = Converter::new(
            ConverterSettings::new()
                .output_dir("/out")
                .file_prefix("csv_"),
        );

        assert_eq!(
            converter.output_path_for("/logs/Security.evtx"),
            PathBuf::from("/out/csv_Security.csv")
        );
        assert_eq!(
            converter.output_path_for("Microsoft-Windows-Sysmon%4Operational.evtx"),
            PathBuf::from("/out/csv_Microsoft-Windows-Sysmon%4Operational.csv")
        );
    }

    #[test]
    fn test_default_settings() {
        let settings = ConverterSettings::default();
        assert_eq!(settings.get_output_dir(), Path::new("."));
        assert_eq!(settings.get_file_prefix(), "timeline_");
        assert_eq!(settings.get_delimiter(), b',');
        assert!(!settings.should_validate_checksums());
    }

    #[test]
    fn test_unreadable_sources_are_isolated() {
        crate::ensure_env_logger_initialized();
        let d = tempdir().unwrap();
        let garbage = d.path().join("garbage.evtx");
        File::create(&garbage)
            .unwrap()
            .write_all(b"definitely not an event log")
            .unwrap();
        let missing = d.path().join("missing.evtx");

        let converter = Converter::new(
            ConverterSettings::new()
                .output_dir(d.path().join("out"))
                .num_threads(2),
        );
        let results = converter.convert_all(&[garbage.clone(), missing.clone()]);

        assert_eq!(results.len(), 2);
        for (result, expected) in results.iter().zip([&garbage, &missing]) {
            match result {
                Err(ConvertError::SourceUnreadable { path, .. }) => assert_eq!(path, expected),
                other => panic!("expected SourceUnreadable, got {:?}", other),
            }
        }
        assert!(!d.path().join("out").join("timeline_garbage.csv").exists());
    }

    #[test]
    fn test_convert_source_reports_an_empty_container() {
        crate::ensure_env_logger_initialized();
        let d = tempdir().unwrap();
        let source = d.path().join("Security.evtx");
        write_empty_evtx(&source);

        let converter = Converter::new(ConverterSettings::new().output_dir(d.path().join("out")));
        let report = converter.convert_source(&source).unwrap();

        assert_eq!(
            report,
            SourceReport {
                source: source.clone(),
                output: d.path().join("out").join("timeline_Security.csv"),
                records: 0,
                columns: 3,
                skipped_records: 0,
            }
        );
        assert_eq!(
            fs::read_to_string(&report.output).unwrap(),
            "EpochTime,TimeCreated,Message\n"
        );
    }

    #[test]
    fn test_colliding_outputs_keep_the_first_source() {
        let d = tempdir().unwrap();
        fs::create_dir(d.path().join("a")).unwrap();
        fs::create_dir(d.path().join("b")).unwrap();
        let first = d.path().join("a").join("Security.evtx");
        let second = d.path().join("b").join("Security.evtx");
        write_empty_evtx(&first);
        write_empty_evtx(&second);

        let out_dir = d.path().join("out");
        let converter = Converter::new(
            ConverterSettings::new()
                .output_dir(&out_dir)
                .num_threads(2),
        );
        let results = converter.convert_all(&[first.clone(), second.clone()]);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().source, first);
        match &results[1] {
            Err(ConvertError::OutputCollision {
                path,
                output,
                claimed_by,
            }) => {
                assert_eq!(path, &second);
                assert_eq!(output, &out_dir.join("timeline_Security.csv"));
                assert_eq!(claimed_by, &first);
            }
            other => panic!("expected OutputCollision, got {:?}", other),
        }
        assert_eq!(fs::read_dir(&out_dir).unwrap().count(), 1);
    }

    #[test]
    fn test_write_creates_directories_and_leaves_no_staging_files() {
        let d = tempdir().unwrap();
        let out_dir = d.path().join("nested").join("out");
        let converter = Converter::new(ConverterSettings::new().output_dir(&out_dir));
        let output = converter.output_path_for("System.evtx");

        converter.write(&Timeline::build(&[]), &output).unwrap();

        assert_eq!(
            fs::read_to_string(&output).unwrap(),
            "EpochTime,TimeCreated,Message\n"
        );
        let entries: Vec<_> = fs::read_dir(&out_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_write_into_a_directory_target_fails() {
        let d = tempdir().unwrap();
        let output = d.path().join("taken");
        fs::create_dir(&output).unwrap();

        let converter = Converter::new(ConverterSettings::new().output_dir(d.path()));
        let err = converter.write(&Timeline::build(&[]), &output).unwrap_err();

        assert!(matches!(err, ConvertError::SerializationFailure { .. }));
        assert_eq!(err.path(), output.as_path());
    }
}
