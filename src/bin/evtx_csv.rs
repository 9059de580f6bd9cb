use anyhow::{Context, Result, bail, format_err};
use clap::{Arg, ArgAction, ArgMatches, Command};
use dialoguer::Confirm;
use indoc::indoc;
use log::{Level, LevelFilter};
use simplelog::{Config, WriteLogger};

use evtx_timeline::err::ConvertError;
use evtx_timeline::{Converter, ConverterSettings, DEFAULT_FILE_PREFIX, SourceReport};

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::exit;

struct EvtxCsv {
    converter: Converter,
    inputs: Vec<PathBuf>,
    prompt_before_overwrite: bool,
    json_summary: bool,
    verbosity_level: Option<Level>,
}

/// Why a source never reached the converter.
enum Rejected {
    /// The user declined to overwrite an existing table.
    Declined,
    Error(anyhow::Error),
}

impl EvtxCsv {
    pub fn from_cli_matches(matches: &ArgMatches) -> Result<Self> {
        let verbosity_level = match matches.get_count("verbose") {
            0 => None,
            1 => Some(Level::Info),
            2 => Some(Level::Debug),
            3 => Some(Level::Trace),
            _ => {
                eprintln!("using more than  -vvv does not affect verbosity level");
                Some(Level::Trace)
            }
        };

        let paths: Vec<PathBuf> = matches
            .get_many::<String>("INPUT")
            .map(|values| values.map(PathBuf::from).collect())
            .unwrap_or_default();
        let globs: Vec<String> = matches
            .get_many::<String>("glob")
            .map(|values| values.cloned().collect())
            .unwrap_or_default();

        let inputs = collect_inputs(&paths, &globs, matches.get_flag("recursive"))?;
        if inputs.is_empty() {
            bail!("no `.evtx` input files found");
        }

        let num_threads = *matches
            .get_one::<usize>("num-threads")
            .expect("has a default value");

        let num_threads = match (cfg!(feature = "multithreading"), num_threads) {
            (true, number) => number,
            (false, 1) => 1,
            (false, _) => {
                eprintln!(
                    "turned on threads, but library was compiled without `multithreading` feature! using fallback sync iterator"
                );
                1
            }
        };

        let settings = ConverterSettings::new()
            .output_dir(
                matches
                    .get_one::<String>("output-dir")
                    .expect("has a default value"),
            )
            .file_prefix(
                matches
                    .get_one::<String>("prefix")
                    .expect("has a default value")
                    .as_str(),
            )
            .delimiter(*matches.get_one::<u8>("delimiter").expect("has a default value"))
            .num_threads(num_threads)
            .validate_checksums(matches.get_flag("validate-checksums"));

        Ok(EvtxCsv {
            converter: Converter::new(settings),
            inputs,
            prompt_before_overwrite: !matches.get_flag("no-confirm-overwrite"),
            json_summary: matches.get_flag("json-summary"),
            verbosity_level,
        })
    }

    /// Main entry point for `EvtxCsv`, returns `false` if any source failed.
    pub fn run(&self) -> Result<bool> {
        self.try_to_initialize_logging();

        let mut ok = true;
        let mut accepted = Vec::with_capacity(self.inputs.len());

        for input in &self.inputs {
            let output = self.converter.output_path_for(input);

            match self.check_output_target(&output) {
                Ok(()) => accepted.push(input.clone()),
                Err(Rejected::Declined) => {
                    eprintln!("Skipping `{}`: not overwriting `{}`", input.display(), output.display());
                }
                Err(Rejected::Error(e)) => {
                    eprintln!("Skipping `{}`: {:#}", input.display(), e);
                    ok = false;
                }
            }
        }

        for result in self.converter.convert_all(&accepted) {
            match result {
                Ok(report) => self.print_report(&report)?,
                Err(e) => {
                    self.print_error(&e);
                    ok = false;
                }
            }
        }

        Ok(ok)
    }

    /// If `prompt` is set, asks for confirmation before an existing file is replaced.
    fn check_output_target(&self, path: &Path) -> std::result::Result<(), Rejected> {
        if path.is_dir() {
            return Err(Rejected::Error(format_err!(
                "There is a directory at {}, refusing to overwrite",
                path.display()
            )));
        }

        if !path.exists() || !self.prompt_before_overwrite {
            return Ok(());
        }

        match Confirm::new()
            .with_prompt(format!(
                "Are you sure you want to override output file at {}",
                path.display()
            ))
            .default(false)
            .interact()
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(Rejected::Declined),
            Err(e) => Err(Rejected::Error(format_err!(
                "refusing to overwrite {} without confirmation (pass `--no-confirm-overwrite`): {}",
                path.display(),
                e
            ))),
        }
    }

    fn print_report(&self, report: &SourceReport) -> Result<()> {
        if self.json_summary {
            let line = serde_json::to_string(report).context("failed to serialize summary")?;
            println!("{}", line);
        } else {
            println!(
                "{} -> {} ({} records, {} columns, {} skipped)",
                report.source.display(),
                report.output.display(),
                report.records,
                report.columns,
                report.skipped_records
            );
        }
        Ok(())
    }

    fn print_error(&self, e: &ConvertError) {
        match e {
            ConvertError::SourceUnreadable { .. } => eprintln!("Skipping unreadable source: {}", e),
            ConvertError::SerializationFailure { .. } => eprintln!("Failed to write output: {}", e),
            ConvertError::OutputCollision { .. } => eprintln!("Skipping source: {}", e),
        }
    }

    fn try_to_initialize_logging(&self) {
        let level = self
            .verbosity_level
            .map(|level| level.to_level_filter())
            .unwrap_or(LevelFilter::Warn);

        if let Err(e) = WriteLogger::init(level, Config::default(), io::stderr()) {
            eprintln!("Failed to initialize logging: {}", e);
        }
    }
}

fn is_evtx_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("evtx"))
}

fn collect_from_dir(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read directory `{}`", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()
        .with_context(|| format!("failed to list directory `{}`", dir.display()))?;
    entries.sort();

    for path in entries {
        if path.is_dir() {
            if recursive {
                collect_from_dir(&path, recursive, out)?;
            }
        } else if is_evtx_file(&path) {
            out.push(path);
        }
    }

    Ok(())
}

/// Expands directories and glob patterns into a de-duplicated list of sources, in argument order.
fn collect_inputs(paths: &[PathBuf], globs: &[String], recursive: bool) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();

    for path in paths {
        if path.is_dir() {
            collect_from_dir(path, recursive, &mut found)?;
        } else {
            // Missing files are passed through and reported by the converter.
            found.push(path.clone());
        }
    }

    for pattern in globs {
        let entries =
            glob::glob(pattern).with_context(|| format!("invalid glob pattern `{pattern}`"))?;
        for entry in entries {
            let path = entry.with_context(|| format!("failed to expand glob `{pattern}`"))?;
            if path.is_dir() {
                collect_from_dir(&path, recursive, &mut found)?;
            } else if is_evtx_file(&path) {
                found.push(path);
            }
        }
    }

    let mut seen = HashSet::new();
    found.retain(|p| seen.insert(p.clone()));

    Ok(found)
}

fn parse_delimiter(value: &str) -> std::result::Result<u8, String> {
    match value {
        "\\t" | "tab" => Ok(b'\t'),
        _ => {
            let bytes = value.as_bytes();
            if bytes.len() == 1 && bytes[0].is_ascii() {
                Ok(bytes[0])
            } else {
                Err("Expected a single ASCII character (or `tab`).".to_owned())
            }
        }
    }
}

fn cli() -> Command {
    Command::new("evtx_csv")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Flatten EVTX files into time-sorted CSV timelines")
        .long_about(indoc!(r#"
            Flatten EVTX files into time-sorted CSV timelines.

            Every input produces one table named <prefix><input stem>.csv. Its columns are
            EpochTime, TimeCreated and Message, followed by every System and EventData field
            seen in that file, in first-seen order. Unnamed EventData items are numbered
            unlabeled1, unlabeled2, ... per record.

            Message is filled from the record's RenderingInfo/Message element. Event logs written
            by Windows usually carry no rendered message, so the column is often empty.
        "#))
        .arg(
            Arg::new("INPUT")
                .action(ArgAction::Append)
                .required_unless_present("glob")
                .help("Input .evtx file or directory. Can be passed multiple times."),
        )
        .arg(
            Arg::new("glob")
                .long("glob")
                .action(ArgAction::Append)
                .value_name("PATTERN")
                .help("Glob pattern to expand into input paths (cross-platform). Can be passed multiple times."),
        )
        .arg(
            Arg::new("recursive")
                .long("recursive")
                .short('r')
                .action(ArgAction::SetTrue)
                .help("When an input path is a directory (or a glob matches a directory), recurse into it."),
        )
        .arg(
            Arg::new("output-dir")
                .long("output-dir")
                .short('o')
                .value_name("DIR")
                .default_value(".")
                .help("Directory to write the CSV files into. Will be created if needed."),
        )
        .arg(
            Arg::new("prefix")
                .long("prefix")
                .value_name("PREFIX")
                .default_value(DEFAULT_FILE_PREFIX)
                .help("Prefix of every output file name."),
        )
        .arg(
            Arg::new("delimiter")
                .long("delimiter")
                .short('d')
                .value_name("CHAR")
                .default_value(",")
                .value_parser(parse_delimiter)
                .help("Field delimiter, a single ASCII character or `tab`."),
        )
        .arg(
            Arg::new("num-threads")
                .long("threads")
                .short('t')
                .default_value("0")
                .value_parser(clap::value_parser!(usize))
                .help("Sets the number of files converted in parallel, defaults to number of CPU cores."),
        )
        .arg(
            Arg::new("validate-checksums")
                .long("validate-checksums")
                .action(ArgAction::SetTrue)
                .help("When set, chunks with invalid checksums will not be parsed. \
                Usually dirty files have bad checksums, so using this flag will result in fewer records."),
        )
        .arg(
            Arg::new("no-confirm-overwrite")
                .long("no-confirm-overwrite")
                .action(ArgAction::SetTrue)
                .help("When set, will not ask for confirmation before overwriting files, useful for automation"),
        )
        .arg(
            Arg::new("json-summary")
                .long("json-summary")
                .action(ArgAction::SetTrue)
                .help("Print one JSON object per converted file instead of a text summary."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help(indoc!("
                    -v - info, -vv - debug, -vvv - trace.
                    trace output is only available in debug builds, as it is extremely verbose")),
        )
}

fn main() {
    let matches = cli().get_matches();

    let app = match EvtxCsv::from_cli_matches(&matches) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("{:#}", e);
            exit(1)
        }
    };

    match app.run() {
        Ok(true) => {}
        Ok(false) => exit(1),
        Err(e) => {
            eprintln!("{:#}", e);
            exit(1)
        }
    }
}
