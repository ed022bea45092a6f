use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use fault_logger::{
    crash_handler, fl_debug, fl_info, fl_verbose, fl_warn, registry, ConsoleSink, CrashConfig, FileSink,
    LogBridge, LogSink, LogWriter, Logger, LoggerConfig, SnapshotSize,
};

const USAGE: &str = "usage: fault_logger [--log <file>] [--snapshot <file>] [--size none|small|medium|large] \
                     [--abort | --segv | --panic]";

#[derive(Debug, Default)]
struct Options {
    log_file: Option<PathBuf>,
    snapshot: Option<PathBuf>,
    size: SnapshotSize,
    crash: Option<String>,
}

fn parse_args() -> Result<Options, String> {
    let mut options = Options::default();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--log" => options.log_file = Some(args.next().ok_or("--log needs a path")?.into()),
            "--snapshot" => options.snapshot = Some(args.next().ok_or("--snapshot needs a path")?.into()),
            "--size" => {
                options.size = match args.next().as_deref() {
                    Some("none") => SnapshotSize::None,
                    Some("small") => SnapshotSize::Small,
                    Some("medium") => SnapshotSize::Medium,
                    Some("large") => SnapshotSize::Large,
                    other => return Err(format!("unknown snapshot size {:?}", other)),
                }
            }
            "--abort" | "--segv" | "--panic" => options.crash = Some(arg),
            _ => return Err(format!("unknown argument {}", arg)),
        }
    }
    Ok(options)
}

fn run(options: Options) -> fault_logger::Result<()> {
    let config = LoggerConfig::from_env()?;

    let mut sinks: Vec<Box<dyn LogSink>> = vec![Box::new(ConsoleSink::stderr())];
    if let Some(path) = &options.log_file {
        sinks.push(Box::new(FileSink::create(path, 64 * 1024)?));
    }
    registry::set_logger(Arc::new(Logger::create(&config, sinks)?));
    LogBridge::install(config.max_level)?;

    let crash_config = CrashConfig {
        snapshot_size: options.size,
        snapshot_path: options.snapshot.clone(),
        capture_panics: true,
    };
    crash_handler::init(crash_config, || {
        // The logger may be mid-record on the crashing thread; never wait on it.
        if let Some(logger) = registry::try_logger() {
            logger.try_flush();
        }
    })?;

    fl_info!("fault_logger demo started, level threshold {}", config.max_level);
    fl_verbose!("line buffer holds {} bytes", config.buffer_capacity);
    fl_debug!("options: {:?}", options);
    log::warn!("records from the log facade share the same sinks");

    match options.crash.as_deref() {
        Some("--abort") => std::process::abort(),
        Some("--segv") => {
            fl_warn!("raising SIGSEGV");
            raise_segv();
        }
        Some("--panic") => panic!("demo panic requested"),
        _ => {}
    }

    fl_info!("no crash requested, exiting normally");
    registry::flush();
    Ok(())
}

#[cfg(unix)]
fn raise_segv() {
    // SAFETY: raise has no preconditions.
    unsafe {
        libc::raise(libc::SIGSEGV);
    }
}

#[cfg(not(unix))]
fn raise_segv() {
    fault_logger::fl_error!("SIGSEGV is not available on this platform");
}

fn main() -> ExitCode {
    let options = match parse_args() {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{}\n{}", message, USAGE);
            return ExitCode::from(2);
        }
    };
    match run(options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("fault_logger: {}", err);
            ExitCode::FAILURE
        }
    }
}
