use condprobe::instrument::batch::{class_files, instrument_tree, BatchOptions};
use condprobe::instrument::events::{read_events, ClassEvent};
use condprobe::instrument::{Error, FileError};
use condprobe::jvm::code::BranchKind;
use condprobe::jvm::{self, Name, RenderDescriptor};

use clap::{crate_version, Arg, ArgAction, Command};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

/// Printed when the positional arguments are not exactly classpath, class dir, and test dir
const USAGE_HINT: &str = "use with classpath, classdir, and testDir as arguments.";

/// Where instrumented classes go unless `--output-directory` says otherwise
const DEFAULT_OUTPUT_DIRECTORY: &str = "trans_classes";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Command::new("condprobe")
        .version(crate_version!())
        .about("Instrument JVM class files so the outcome of every conditional branch is observable")
        .arg(
            Arg::new("output")
                .long("output-directory")
                .value_name("DIR")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Write instrumented classes here instead of `trans_classes`"),
        )
        .arg(
            Arg::new("keep-going")
                .long("keep-going")
                .action(ArgAction::SetTrue)
                .help("Skip class files that cannot be instrumented instead of stopping"),
        )
        .arg(
            Arg::new("extension")
                .long("extension")
                .value_name("EXT")
                .default_value("class")
                .help("Extension of the files to instrument"),
        )
        .arg(
            Arg::new("list")
                .long("list")
                .action(ArgAction::SetTrue)
                .help("Print the conditional branches that would be instrumented and write nothing"),
        )
        .arg(
            Arg::new("ARGUMENTS")
                .value_names(["CLASSPATH", "CLASS_DIR", "TEST_DIR"])
                .num_args(0..)
                .value_parser(clap::value_parser!(PathBuf))
                .help("Classpath of the program, directory of its classes, and test directory"),
        )
        .get_matches();

    let arguments: Vec<PathBuf> = matches
        .get_many::<PathBuf>("ARGUMENTS")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    if arguments.len() != 3 {
        eprintln!("{}", USAGE_HINT);
        return;
    }
    let (classpath, class_dir, test_dir) = (&arguments[0], &arguments[1], &arguments[2]);
    log::info!("Classpath is {}", classpath.display());
    log::info!("Test directory is {}", test_dir.display());

    let options = BatchOptions {
        extension: matches
            .get_one::<String>("extension")
            .cloned()
            .unwrap_or_else(|| String::from("class")),
        keep_going: matches.get_flag("keep-going"),
    };

    let succeeded = if matches.get_flag("list") {
        list_conditionals(class_dir, &options)
    } else {
        let output_dir = matches
            .get_one::<PathBuf>("output")
            .cloned()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIRECTORY));
        log::info!(
            "Instrumenting '{}' into '{}'",
            class_dir.display(),
            output_dir.display()
        );
        match instrument_tree(class_dir, &output_dir, &options) {
            Ok(report) => {
                for failure in &report.failed {
                    log::error!("{}", failure);
                }
                report.failed.is_empty()
            }
            Err(err) => {
                log::error!("{}", err);
                false
            }
        }
    };

    if !succeeded {
        process::exit(1);
    }
}

/// Print every conditional branch under `class_dir`, returning whether all files could be read
fn list_conditionals(class_dir: &Path, options: &BatchOptions) -> bool {
    let found = match class_files(class_dir, options) {
        Ok(found) => found,
        Err(err) => {
            log::error!("{}", err);
            return false;
        }
    };

    let mut succeeded = found.unreadable.is_empty();
    for file in found.files {
        let events = fs::read(&file)
            .map_err(|err| Error::Parse(jvm::Error::IoError(err)))
            .and_then(|bytes| read_events(&bytes))
            .map_err(|error| FileError {
                input: file.clone(),
                error,
            });
        match events {
            Ok(events) => print_conditionals(&events),
            Err(err) if options.keep_going => {
                log::warn!("Skipping {}", err);
                succeeded = false;
            }
            Err(err) => {
                log::error!("{}", err);
                return false;
            }
        }
    }
    succeeded
}

fn print_conditionals(events: &[ClassEvent]) {
    let mut class = String::new();
    let mut method = String::new();
    for event in events {
        match event {
            ClassEvent::TypeBegin { name } => class = name.as_str().to_owned(),
            ClassEvent::MethodBegin {
                name, descriptor, ..
            } => method = format!("{}{}", name.as_str(), descriptor.render()),
            ClassEvent::InstructionVisit {
                offset,
                mnemonic,
                kind: BranchKind::ConditionalJump(target),
            } => println!("{}.{} @{}: {} -> {}", class, method, offset, mnemonic, target),
            _ => (),
        }
    }
}
