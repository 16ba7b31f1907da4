use clap::Parser;
use log::{error, info};
use oracle_csv_migrator::application::orchestrator::Orchestrator;
use oracle_csv_migrator::config::{AppConfig, CliArgs};
use oracle_csv_migrator::domain::cancel::CancelToken;
use oracle_csv_migrator::infrastructure::csv::writer::CsvChunkWriter;
use oracle_csv_migrator::infrastructure::oracle::connection_manager::SourceConnectionManager;
use oracle_csv_migrator::infrastructure::oracle::probe::OracleProbe;
use oracle_csv_migrator::infrastructure::oracle::reader::OracleChunkReader;
use oracle_csv_migrator::infrastructure::oracle::splitter::OracleRowidSplitter;
use oracle_csv_migrator::infrastructure::sqlite::meta_store::SqliteMetaStore;
use std::path::Path;
use std::process;
use std::sync::Arc;

fn main() {
    env_logger::init();

    let args = CliArgs::parse();
    let mut config = match AppConfig::from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load config: {}", e);
            process::exit(1);
        }
    };
    config.merge_cli(&args);
    if let Err(e) = config.validate() {
        error!("invalid configuration: {}", e);
        process::exit(1);
    }

    let password = config
        .database
        .password
        .clone()
        .or_else(|| std::env::var("ORACLE_PASSWORD").ok())
        .unwrap_or_default();
    let conn_str = config.database.connection_string();
    info!("initializing connection pool for {}", conn_str);

    let manager = SourceConnectionManager::new(&config.database.username, &password, &conn_str);
    let pool = match manager.build_pool(
        config.export.table_concurrency,
        config.export.chunk_concurrency,
    ) {
        Ok(p) => p,
        Err(e) => {
            error!("failed to create connection pool: {}", e);
            process::exit(1);
        }
    };

    let gateway = match SqliteMetaStore::open(Path::new(&config.meta.path)) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("failed to open metadata store {}: {}", config.meta.path, e);
            process::exit(1);
        }
    };

    let probe = Arc::new(OracleProbe::new(Arc::clone(&pool)));
    let splitter = Arc::new(OracleRowidSplitter::new(Arc::clone(&pool)));
    let reader = Arc::new(OracleChunkReader::new(
        Arc::clone(&pool),
        config.export.prefetch_rows,
    ));
    let writer = Arc::new(CsvChunkWriter::new(
        config.delimiter_byte(),
        config.export.write_header,
        config.export.null_as.clone(),
    ));

    let orchestrator = Orchestrator::new(
        probe,
        splitter,
        reader,
        writer,
        gateway,
        config,
        CancelToken::new(),
    );
    match orchestrator.run() {
        Ok(report) => {
            if !report.is_clean() {
                process::exit(1);
            }
        }
        Err(e) => {
            error!("migration run failed: {}", e);
            process::exit(1);
        }
    }
}
