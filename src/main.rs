use std::fs;
use std::io;
use std::path;
use std::process;
use std::time::Instant;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use line_ext_sort::buffer::mem::MemoryLimitedBufferBuilder;
use line_ext_sort::generator;
use line_ext_sort::{ExternalSorter, ExternalSorterBuilder, RecordReader, SortOutcome};

const DEFAULT_BLOCK_SIZE: &str = "200000";
const DEFAULT_RECORD_COUNT: &str = "1000000";
const DEFAULT_MAX_RECORD_LENGTH: &str = "600";

fn main() {
    let arg_parser = build_arg_parser();

    match arg_parser.subcommand() {
        Some(("sort", args)) => {
            init_logger(args.value_of_t_or_exit("log_level"));
            sort(args);
        }
        Some(("generate", args)) => {
            init_logger(args.value_of_t_or_exit("log_level"));
            generate(args);
        }
        _ => {
            eprintln!("unknown command");
            process::exit(2);
        }
    }
}

fn sort(args: &clap::ArgMatches) {
    let input = args.value_of("input").expect("value is required");
    let output = args.value_of("output").expect("value is required");
    let block_size: usize = args.value_of_t_or_exit("block_size");
    let mem_limit = args
        .value_of("mem_limit")
        .map(|v| v.parse::<ByteSize>().expect("value is pre-validated").as_u64())
        .unwrap_or(u64::MAX);
    let tmp_dir: Option<&str> = args.value_of("tmp_dir");
    let threads: Option<usize> = args.is_present("threads").then(|| args.value_of_t_or_exit("threads"));
    let rw_buf_size: Option<ByteSize> = args
        .is_present("rw_buf_size")
        .then(|| args.value_of_t_or_exit("rw_buf_size"));
    let max_length: Option<usize> = args
        .is_present("max_length")
        .then(|| args.value_of_t_or_exit("max_length"));

    let input_file = match fs::File::open(input) {
        Ok(file) => file,
        Err(err) => {
            log::error!("input file opening error: {}", err);
            process::exit(1);
        }
    };
    let input_size = input_file.metadata().map(|meta| meta.len()).unwrap_or(0);

    let mut sorter_builder =
        ExternalSorterBuilder::new().with_buffer(MemoryLimitedBufferBuilder::new(mem_limit, block_size));
    if let Some(threads) = threads {
        sorter_builder = sorter_builder.with_threads_number(threads);
    }

    if let Some(tmp_dir) = tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }

    if let Some(rw_buf_size) = rw_buf_size {
        sorter_builder = sorter_builder.with_rw_buf_size(rw_buf_size.as_u64() as usize);
    }

    if let Some(max_length) = max_length {
        sorter_builder = sorter_builder.with_max_record_length(max_length);
    }

    let sorter: ExternalSorter<io::Error, _> = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    log::info!("sorting {} ({})", input, ByteSize(input_size));
    let started = Instant::now();

    match sorter.sort(RecordReader::new(io::BufReader::new(input_file)), path::Path::new(output)) {
        Ok(SortOutcome::Empty) => {
            log::info!("input is empty, empty result saved to {}", output);
        }
        Ok(SortOutcome::Sorted { chunks, rounds }) => {
            log::info!(
                "file has been sorted in {} ms ({} chunks, {} merge rounds), result saved to {}",
                started.elapsed().as_millis(),
                chunks,
                rounds,
                output
            );
        }
        Err(err) => {
            log::error!("data sorting error: {}", err);
            // process::exit skips destructors so the failed run directory is kept for inspection
            log::error!("intermediate files are kept under {}", sorter.tmp_path().display());
            process::exit(1);
        }
    }
}

fn generate(args: &clap::ArgMatches) {
    let output = args.value_of("output").expect("value is required");
    let count: u64 = args.value_of_t_or_exit("count");
    let max_length: usize = args.value_of_t_or_exit("max_length");

    let started = Instant::now();
    if let Err(err) = generator::generate_file(path::Path::new(output), count, max_length) {
        log::error!("file generation error: {}", err);
        process::exit(1);
    }

    let size = fs::metadata(output).map(|meta| meta.len()).unwrap_or(0);
    log::info!(
        "file has been generated in {} ms, size: {}",
        started.elapsed().as_millis(),
        ByteSize(size)
    );
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn validate_byte_size(value: &str) -> Result<(), String> {
    match value.parse::<ByteSize>() {
        Ok(_) => Ok(()),
        Err(err) => Err(format!("size format incorrect: {}", err)),
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("line-ext-sort")
        .about("external merge sort for line-oriented text files")
        .setting(clap::AppSettings::SubcommandRequiredElseHelp)
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .global(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .subcommand(
            clap::App::new("sort")
                .about("sort a file line by line")
                .arg(
                    clap::Arg::new("input")
                        .short('i')
                        .long("input")
                        .help("file to be sorted")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("result file")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("block_size")
                        .short('b')
                        .long("block-size")
                        .help("maximum number of records in an initial chunk")
                        .takes_value(true)
                        .default_value(DEFAULT_BLOCK_SIZE),
                )
                .arg(
                    clap::Arg::new("mem_limit")
                        .short('m')
                        .long("mem-limit")
                        .help("maximum memory consumed by an initial chunk")
                        .takes_value(true)
                        .validator(validate_byte_size),
                )
                .arg(
                    clap::Arg::new("threads")
                        .short('t')
                        .long("threads")
                        .help("number of threads to use for parallel sorting and merging")
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("tmp_dir")
                        .short('d')
                        .long("tmp-dir")
                        .help("directory to be used to store chunk files")
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("rw_buf_size")
                        .short('r')
                        .long("rw-buf-size")
                        .help("chunk file read/write buffer size")
                        .takes_value(true)
                        .validator(validate_byte_size),
                )
                .arg(
                    clap::Arg::new("max_length")
                        .short('L')
                        .long("max-length")
                        .help("reject records longer than this number of bytes")
                        .takes_value(true),
                ),
        )
        .subcommand(
            clap::App::new("generate")
                .about("generate a file of random alphabetic lines")
                .arg(
                    clap::Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("file to be generated")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("count")
                        .short('n')
                        .long("count")
                        .help("number of lines")
                        .takes_value(true)
                        .default_value(DEFAULT_RECORD_COUNT),
                )
                .arg(
                    clap::Arg::new("max_length")
                        .short('L')
                        .long("max-length")
                        .help("maximum line length")
                        .takes_value(true)
                        .default_value(DEFAULT_MAX_RECORD_LENGTH),
                ),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
