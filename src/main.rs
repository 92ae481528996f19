use preverifier::jvm::class_file::ClassFile;
use preverifier::jvm::class_graph::{ClassGraph, ClassGraphArenas};
use preverifier::jvm::verifier::{VerifierSession, VerifierSettings};
use preverifier::jvm::Error;

use clap::{crate_version, value_parser, Arg, ArgAction, Command};
use std::path::{Path, PathBuf};
use std::process;
use walkdir::WalkDir;

fn main() -> Result<(), Error> {
    env_logger::init();

    let matches = Command::new("CLDC preverifier")
        .version(crate_version!())
        .author("Alec Theriault <alec.theriault@gmail.com>")
        .about("Verify JVM classes and annotate their methods with CLDC stack maps")
        .arg(
            Arg::new("output")
                .short('d')
                .long("output")
                .value_name("DIRECTORY")
                .value_parser(value_parser!(PathBuf))
                .default_value("output")
                .help("Directory into which verified classes are written"),
        )
        .arg(
            Arg::new("classpath")
                .long("classpath")
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .action(ArgAction::Append)
                .help("Class file (or directory of class files) needed to verify the inputs"),
        )
        .arg(
            Arg::new("max rewrite passes")
                .long("max-rewrite-passes")
                .value_name("PASSES")
                .value_parser(value_parser!(usize))
                .help("How many times the code of one method may be rewritten"),
        )
        .arg(
            Arg::new("INPUT")
                .help("Class files (or directories of class files) to verify")
                .value_parser(value_parser!(PathBuf))
                .action(ArgAction::Append)
                .required(true),
        )
        .get_matches();

    let output_directory = matches
        .get_one::<PathBuf>("output")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("output"));
    let mut settings = VerifierSettings::default();
    if let Some(passes) = matches.get_one::<usize>("max rewrite passes") {
        settings.max_rewrite_passes = *passes;
    }

    let classpath = read_classes(matches.get_many::<PathBuf>("classpath").into_iter().flatten())?;
    let mut inputs = read_classes(matches.get_many::<PathBuf>("INPUT").into_iter().flatten())?;

    // Every class has to be in the graph before anything gets verified
    let class_graph_arenas = ClassGraphArenas::new();
    let class_graph = ClassGraph::new(&class_graph_arenas);
    class_graph.insert_java_library_types();
    for err in class_graph.add_class_files(&classpath) {
        log::warn!("Skipping class path entry: {}", err);
    }
    for err in class_graph.add_class_files(&inputs) {
        log::warn!("Class could not be loaded: {}", err);
    }

    let session = VerifierSession::new(&class_graph, settings);
    let rejected = preverify_classes(&session, &mut inputs, &output_directory);
    if rejected > 0 {
        log::warn!("{} of {} classes rejected", rejected, inputs.len());
        process::exit(1);
    }
    Ok(())
}

/// Verify and write out every class, returning how many were rejected
///
/// A class that can't be verified, annotated or written is skipped. The others are still
/// processed.
fn preverify_classes(
    session: &VerifierSession<'_>,
    classes: &mut [ClassFile],
    output_directory: &Path,
) -> usize {
    let mut rejected = 0;
    for class in classes {
        if let Err(err) = preverify_class(session, class, output_directory) {
            let class_name = class.this_class_name().unwrap_or("<unnamed class>");
            log::warn!("Rejecting {}: {}", class_name, err);
            eprintln!("{}", err);
            rejected += 1;
        }
    }
    rejected
}

fn preverify_class(
    session: &VerifierSession<'_>,
    class: &mut ClassFile,
    output_directory: &Path,
) -> Result<(), Error> {
    let class_name = class.this_class_name()?.to_owned();
    let verified = session.verify_class(class)?;
    verified.attach_to(class)?;

    let output_file = output_directory.join(format!("{}.class", class_name));
    log::info!("Writing '{}'", output_file.display());
    class
        .save_to_path(&output_file, true)
        .map_err(Error::IoError)
}

/// Read every class file at the given paths, looking inside directories
fn read_classes<'p>(paths: impl Iterator<Item = &'p PathBuf>) -> Result<Vec<ClassFile>, Error> {
    let mut classes = vec![];
    for path in paths {
        for class_path in class_files(path)? {
            log::info!("Reading '{}'", class_path.display());
            classes.push(ClassFile::read_from_path(&class_path)?);
        }
    }
    Ok(classes)
}

fn class_files(path: &Path) -> Result<Vec<PathBuf>, Error> {
    if path.is_file() {
        return Ok(vec![path.to_owned()]);
    }
    let mut files = vec![];
    for entry in WalkDir::new(path).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|err| Error::IoError(err.into()))?;
        let is_class = entry.path().extension().map_or(false, |ext| ext == "class");
        if entry.file_type().is_file() && is_class {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}
