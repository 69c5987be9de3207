/// `iotopload` -- Load `iotop` log files into InfluxDB
///
/// Run with --help for brief help.
///
/// Quirks
///
/// The log lines carry only a time of day, so all the files given in one run are taken to be from
/// the same --date.  Runs that span midnight must be split by the user.
///
/// A fixed --offset-seconds (one hour by default) is subtracted from every timestamp.  This
/// matches what the logs were originally loaded with; set it to 0 if your logs and your database
/// agree on the time zone.
///
/// When --filename has wildcards the files are processed in the order the directory listing
/// returns them, which need not be sorted.  The points are the same either way, only the order of
/// the writes differs.
///
/// Sample lines that can't be decoded are reported and skipped, and the run still succeeds; use
/// --strict to make them fatal.  Batches already written stay written if the run fails later.

mod influx;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use influx::{InfluxClient, InfluxConfig};
use iotoplog::{
    parse_logfile, BatchSink, FileStats, LineProtocolWriter, ParseOptions, PointWriter, SinkStats,
    DEFAULT_OFFSET_SECONDS,
};
use rustutils::{expand_file_pattern, format_date, parse_date};
use std::env;
use std::io;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print information about the program
    Version,

    /// Parse iotop logs and write the points to InfluxDB
    Load(LoadCmdArgs),

    /// Parse iotop logs and print the points as line protocol on stdout
    Parse(ParseCmdArgs),
}

#[derive(Args, Debug)]
pub struct LoadCmdArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    #[command(flatten)]
    db_args: DatabaseArgs,

    #[command(flatten)]
    batch_args: BatchArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct ParseCmdArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    #[command(flatten)]
    batch_args: BatchArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct SourceArgs {
    /// iotop log file(s) to process; `*`, `?` and `[...]` are allowed in any path component, eg
    /// logs/host*/iotop-*.log
    #[arg(long)]
    filename: String,

    /// The date of the log, YYYY-MM-DD
    #[arg(long, value_parser = parse_date)]
    date: NaiveDate,

    /// Value of the hostname tag
    #[arg(long)]
    hostname: String,

    /// Seconds to subtract from every timestamp
    #[arg(long, default_value_t = DEFAULT_OFFSET_SECONDS, allow_negative_numbers = true)]
    offset_seconds: i64,

    /// Fail on the first sample line that can't be decoded, instead of skipping it
    #[arg(long, default_value_t = false)]
    strict: bool,
}

#[derive(Args, Debug)]
pub struct DatabaseArgs {
    /// InfluxDB host name or address [default: $INFLUX_HOST, or localhost]
    #[arg(long)]
    dbhost: Option<String>,

    /// InfluxDB port number
    #[arg(long, default_value_t = 8086)]
    dbport: u16,

    /// InfluxDB database name
    #[arg(long, default_value = "iotop")]
    dbname: String,

    /// Drop the database first, if it exists, to start from a clean database
    #[arg(long, default_value_t = false)]
    dbdrop: bool,

    /// InfluxDB user name [default: none]
    #[arg(long)]
    dbuser: Option<String>,

    /// InfluxDB password [default: none]
    #[arg(long)]
    dbpassword: Option<String>,

    /// Connect with https instead of http
    #[arg(long, default_value_t = false)]
    ssl: bool,

    /// Timeout for every request to InfluxDB, in seconds
    #[arg(long, default_value_t = 30)]
    timeout_seconds: u64,
}

#[derive(Args, Debug)]
pub struct BatchArgs {
    /// How many points to send to InfluxDB in one write
    #[arg(long = "batchsize", default_value_t = 20000)]
    batch_size: usize,
}

#[derive(Args, Debug, Default)]
pub struct MetaArgs {
    /// Log the parameters used
    #[arg(long, short, default_value_t = false)]
    verbose: bool,

    /// Log every point as it is produced (for developers)
    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn main() {
    match iotopload() {
        Ok(()) => {}
        Err(msg) => {
            eprintln!("ERROR: {:#}", msg);
            process::exit(1);
        }
    }
}

fn iotopload() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("iotopload version({})", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Load(ref load_args) => {
            init_logging(&load_args.meta_args)?;
            run_load(load_args)?;
            Ok(())
        }
        Commands::Parse(ref parse_args) => {
            init_logging(&parse_args.meta_args)?;
            run_parse(parse_args)?;
            Ok(())
        }
    }
}

// Logging goes to stderr so that `parse` output on stdout stays clean.  RUST_LOG is honored for
// anything not set here.
fn init_logging(meta_args: &MetaArgs) -> Result<()> {
    let level = if meta_args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("iotopload={level}").parse()?)
        .add_directive(format!("iotoplog={level}").parse()?);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
    Ok(())
}

fn parse_options(source_args: &SourceArgs) -> ParseOptions {
    let mut options = ParseOptions::new(source_args.date, &source_args.hostname);
    options.offset_seconds = source_args.offset_seconds;
    options.strict = source_args.strict;
    options
}

fn influx_config(db_args: &DatabaseArgs) -> InfluxConfig {
    let host = if let Some(ref h) = db_args.dbhost {
        h.clone()
    } else if let Ok(h) = env::var("INFLUX_HOST") {
        h
    } else {
        "localhost".to_string()
    };
    InfluxConfig {
        host,
        port: db_args.dbport,
        database: db_args.dbname.clone(),
        ssl: db_args.ssl,
        username: db_args.dbuser.clone(),
        password: db_args.dbpassword.clone(),
        timeout: Duration::from_secs(db_args.timeout_seconds),
    }
}

fn log_source_args(source_args: &SourceArgs, batch_args: &BatchArgs) {
    info!("Filename={}", source_args.filename);
    info!("Date={}", format_date(source_args.date));
    info!("Hostname={}", source_args.hostname);
    info!("Offset={}s", source_args.offset_seconds);
    info!("Strict={}", source_args.strict);
    info!("Batchsize={}", batch_args.batch_size);
}

fn run_load(load_args: &LoadCmdArgs) -> Result<(FileStats, SinkStats)> {
    let config = influx_config(&load_args.db_args);
    if load_args.meta_args.verbose {
        log_source_args(&load_args.source_args, &load_args.batch_args);
        info!("Dbhost={}", config.host);
        info!("Dbport={}", config.port);
        info!("Dbname={}", config.database);
        info!("Dbdrop={}", load_args.db_args.dbdrop);
    }

    // Resolve the file set before touching the database, so that a typo doesn't drop anything.
    let logfiles = find_logfiles(&load_args.source_args.filename)?;

    let client = InfluxClient::connect(&config)?;
    if load_args.db_args.dbdrop {
        info!("Dropping database {}", config.database);
        client.drop_database()?;
    }
    client.create_database()?;

    let sink = BatchSink::new(client, load_args.batch_args.batch_size)?;
    ingest(&logfiles, &parse_options(&load_args.source_args), sink)
}

fn run_parse(parse_args: &ParseCmdArgs) -> Result<(FileStats, SinkStats)> {
    if parse_args.meta_args.verbose {
        log_source_args(&parse_args.source_args, &parse_args.batch_args);
    }
    let logfiles = find_logfiles(&parse_args.source_args.filename)?;
    let sink = BatchSink::new(
        LineProtocolWriter::new(io::stdout().lock()),
        parse_args.batch_args.batch_size,
    )?;
    ingest(&logfiles, &parse_options(&parse_args.source_args), sink)
}

fn find_logfiles(pattern: &str) -> Result<Vec<PathBuf>> {
    let logfiles = expand_file_pattern(pattern)?;
    if logfiles.len() > 1 {
        info!(
            "{} files match {pattern}, they are processed in directory order",
            logfiles.len()
        );
    }
    Ok(logfiles)
}

// Run every file through the pipeline into the sink, then do the final flush.  The sink (and
// with it the writer) is dropped on every path out of here.
fn ingest<W: PointWriter>(
    logfiles: &[PathBuf],
    options: &ParseOptions,
    mut sink: BatchSink<W>,
) -> Result<(FileStats, SinkStats)> {
    let mut totals = FileStats::default();
    for logfile in logfiles {
        info!("File: {}", logfile.display());
        totals += parse_logfile(logfile, options, &mut sink)?;
    }
    let sink_stats = sink.finish()?;

    info!(
        "{} lines read, {} samples, {} lines skipped, {} points written in {} batches",
        totals.lines, totals.samples, totals.skipped, sink_stats.points, sink_stats.batches
    );
    if totals.errors > 0 {
        warn!("{} sample lines could not be parsed and were skipped", totals.errors);
    }
    Ok((totals, sink_stats))
}

#[cfg(test)]
fn test_args(args: &[&str]) -> Cli {
    let mut v = vec!["iotopload"];
    v.extend_from_slice(args);
    Cli::try_parse_from(v).unwrap()
}

#[test]
fn test_cli_defaults() {
    let cli = test_args(&[
        "load",
        "--filename",
        "x.log",
        "--date",
        "2023-05-01",
        "--hostname",
        "host1",
    ]);
    match cli.command {
        Commands::Load(a) => {
            assert!(a.source_args.filename == "x.log");
            assert!(a.source_args.date == NaiveDate::from_ymd_opt(2023, 5, 1).unwrap());
            assert!(a.source_args.offset_seconds == 3600);
            assert!(!a.source_args.strict);
            assert!(a.db_args.dbhost.is_none());
            assert!(a.db_args.dbport == 8086);
            assert!(a.db_args.dbname == "iotop");
            assert!(!a.db_args.dbdrop);
            assert!(a.db_args.timeout_seconds == 30);
            assert!(a.batch_args.batch_size == 20000);
            assert!(!a.meta_args.verbose && !a.meta_args.debug);
        }
        _ => panic!("Expected load"),
    }
}

#[test]
fn test_cli_options() {
    let cli = test_args(&[
        "load",
        "--filename",
        "logs/*.log",
        "--date",
        "2023-05-01",
        "--hostname",
        "host1",
        "--dbhost",
        "db1",
        "--dbport",
        "9999",
        "--dbname",
        "x",
        "--dbdrop",
        "--batchsize",
        "2",
        "--offset-seconds",
        "-7200",
        "--strict",
        "--verbose",
    ]);
    match cli.command {
        Commands::Load(a) => {
            let config = influx_config(&a.db_args);
            assert!(config.host == "db1");
            assert!(config.port == 9999);
            assert!(config.database == "x");
            assert!(a.db_args.dbdrop);
            assert!(a.batch_args.batch_size == 2);
            let options = parse_options(&a.source_args);
            assert!(options.offset_seconds == -7200);
            assert!(options.strict);
            assert!(options.hostname == "host1");
            assert!(a.meta_args.verbose);
        }
        _ => panic!("Expected load"),
    }
}

#[test]
fn test_cli_rejects() {
    // Bad date
    assert!(Cli::try_parse_from([
        "iotopload", "parse", "--filename", "x", "--date", "2023-5-1", "--hostname", "h"
    ])
    .is_err());
    // Missing hostname
    assert!(
        Cli::try_parse_from(["iotopload", "parse", "--filename", "x", "--date", "2023-05-01"])
            .is_err()
    );
    // Database options don't belong to parse
    assert!(Cli::try_parse_from([
        "iotopload", "parse", "--filename", "x", "--date", "2023-05-01", "--hostname", "h",
        "--dbhost", "y"
    ])
    .is_err());
}

#[test]
fn test_run_load() {
    use mockito::Matcher;

    let mut server = mockito::Server::new();
    let ping = server.mock("GET", "/ping").with_status(204).create();
    let create = server
        .mock("POST", "/query")
        .match_query(Matcher::UrlEncoded("q".into(), "CREATE DATABASE \"iotop\"".into()))
        .with_status(200)
        .with_body(r#"{"results":[{"statement_id":0}]}"#)
        .create();
    let first = server
        .mock("POST", "/write")
        .match_query(Matcher::UrlEncoded("db".into(), "iotop".into()))
        .match_body(Matcher::Regex("^iotop,hostname=host1,user=root,command=\\[txg_sync\\] .*\niotop,hostname=host1,user=postgres,.*\n$".into()))
        .with_status(204)
        .expect(1)
        .create();
    let second = server
        .mock("POST", "/write")
        .match_query(Matcher::UrlEncoded("db".into(), "iotop".into()))
        .match_body(Matcher::Regex("^iotop,hostname=host1,user=www-data,command=nginx: .* 1682967878000000000\n$".into()))
        .with_status(204)
        .expect(1)
        .create();

    let hp = server.host_with_port();
    let (host, port) = hp.split_once(':').unwrap();
    let cli = test_args(&[
        "load",
        "--filename",
        "../tests/iotoplog/iotop-sample.log",
        "--date",
        "2023-05-01",
        "--hostname",
        "host1",
        "--dbhost",
        host,
        "--dbport",
        port,
        "--batchsize",
        "2",
    ]);
    let (stats, sink_stats) = match cli.command {
        Commands::Load(ref a) => run_load(a).unwrap(),
        _ => panic!("Expected load"),
    };
    assert!(stats.samples == 3);
    assert!(stats.errors == 1);
    assert!(sink_stats == SinkStats { points: 3, batches: 2 });
    ping.assert();
    create.assert();
    first.assert();
    second.assert();
}

#[test]
fn test_run_load_strict() {
    let mut server = mockito::Server::new();
    let _ping = server.mock("GET", "/ping").with_status(204).create();
    let _query = server
        .mock("POST", "/query")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body(r#"{"results":[{"statement_id":0}]}"#)
        .create();
    let hp = server.host_with_port();
    let (host, port) = hp.split_once(':').unwrap();
    let cli = test_args(&[
        "load",
        "--filename",
        "../tests/iotoplog/iotop-sample.log",
        "--date",
        "2023-05-01",
        "--hostname",
        "host1",
        "--dbhost",
        host,
        "--dbport",
        port,
        "--strict",
    ]);
    let e = match cli.command {
        Commands::Load(ref a) => run_load(a).unwrap_err(),
        _ => panic!("Expected load"),
    };
    assert!(e.to_string().contains("iotop-sample.log:10:"));
}

#[test]
fn test_run_load_no_files() {
    // Fails before any request is made, so no server is needed.
    let cli = test_args(&[
        "load",
        "--filename",
        "../tests/iotoplog/*.nonesuch",
        "--date",
        "2023-05-01",
        "--hostname",
        "host1",
        "--dbport",
        "1",
    ]);
    match cli.command {
        Commands::Load(ref a) => assert!(run_load(a).is_err()),
        _ => panic!("Expected load"),
    }
}

#[test]
fn test_ingest_multiple_files() {
    let mut buf = Vec::<u8>::new();
    let sink = BatchSink::new(LineProtocolWriter::new(&mut buf), 1).unwrap();
    let mut files = expand_file_pattern("../tests/iotoplog/iotop-*.log").unwrap();
    files.sort();
    let options = ParseOptions::new(NaiveDate::from_ymd_opt(2023, 5, 1).unwrap(), "host1");
    let (stats, sink_stats) = ingest(&files, &options, sink).unwrap();
    assert!(stats.samples == 5);
    assert!(sink_stats == SinkStats { points: 5, batches: 5 });
    assert!(String::from_utf8(buf).unwrap().lines().count() == 5);
}
