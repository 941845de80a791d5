pub mod catalog;
pub mod cli;
pub mod config;
pub mod data;
pub mod descriptor;
pub mod error;
pub mod extract;
pub mod filter;
pub mod io_utils;
pub mod pipeline;
pub mod resolve;
pub mod schedule;
pub mod scheduler;
pub mod sink;
pub mod store;
pub mod table;
pub mod transform;

use std::{env, sync::Arc, sync::OnceLock};

use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDate;
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    catalog::Catalog,
    cli::{Cli, Commands, DatasetSource, DescribeFormat},
    config::EtlConfig,
    data::{decode_compact_month, normalize_raw_column_name},
    descriptor::{DatasetDescriptor, undocumented_placeholder},
    error::MappingError,
    filter::parse_conditions,
    io_utils::{delimiter_byte, printable_delimiter, read_header, resolve_encoding},
    pipeline::{CaptureRequest, DEFAULT_DRY_RUN_ROW_LIMIT, PipelineOptions},
    resolve::Dimensions,
    scheduler::RunOptions,
    table::print_table,
    transform::TransformContext,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("datasus_etl", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => handle_run(&args),
        Commands::Capture(args) => handle_capture(&args),
        Commands::Validate(args) => handle_validate(&args),
        Commands::Describe(args) => handle_describe(&args),
        Commands::Init(args) => handle_init(&args),
    }
}

fn load_catalog(source: &DatasetSource) -> Result<Catalog> {
    let mut catalog = Catalog::builtin().context("Loading built-in descriptors")?;
    for path in &source.descriptors {
        catalog
            .load_file(path)
            .with_context(|| format!("Loading descriptor {path:?}"))?;
    }
    Ok(catalog)
}

/// The named dataset, or the only descriptor file given when no name is.
fn select_descriptor(catalog: &Catalog, source: &DatasetSource) -> Result<Arc<DatasetDescriptor>> {
    if let Some(name) = &source.dataset {
        return Ok(catalog.get(name)?);
    }
    match source.descriptors.as_slice() {
        [path] => Ok(Arc::new(DatasetDescriptor::load(path)?)),
        _ => Err(anyhow!(
            "--dataset is required (available: {})",
            catalog.names().collect::<Vec<_>>().join(", ")
        )),
    }
}

fn parse_period(value: &str) -> Result<NaiveDate> {
    let trimmed = value.trim();
    NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d")
        .ok()
        .or_else(|| decode_compact_month(trimmed))
        .ok_or_else(|| anyhow!("Invalid period '{value}', expected YYYY-MM"))
}

fn handle_run(args: &cli::RunArgs) -> Result<()> {
    let config = EtlConfig::load(&args.config)
        .with_context(|| format!("Loading configuration {:?}", args.config))?;
    let mut catalog = Catalog::builtin().context("Loading built-in descriptors")?;
    config.extend_catalog(&mut catalog)?;

    let database = args
        .database
        .clone()
        .or_else(|| config.database.clone())
        .ok_or_else(|| anyhow!("No database configured; pass --database or set it in {:?}", args.config))?;
    let batch_size = args.batch_size.unwrap_or(config.batch_size);
    if batch_size == 0 {
        bail!("--batch-size must be greater than zero");
    }
    let operations = config.operations(&catalog, &args.operations)?;
    info!(
        "Running {} operation(s) against {:?}{}",
        operations.len(),
        database,
        if args.dry_run { " (dry run)" } else { "" }
    );

    let mut conn = store::open(&database).with_context(|| format!("Opening database {database:?}"))?;
    store::bootstrap(&conn).context("Creating bookkeeping tables")?;
    let summary = scheduler::run(
        &mut conn,
        &operations,
        &RunOptions {
            batch_size,
            dry_run: args.dry_run,
            dry_run_row_limit: config.dry_run_row_limit,
            timestamp: None,
        },
    )?;

    let mut rows = summary
        .done
        .iter()
        .map(|c| {
            vec![
                "done".to_string(),
                c.operation.clone(),
                c.periodo_id.clone(),
                c.unidade_geografica_id.clone(),
                c.rows_loaded.to_string(),
                String::new(),
            ]
        })
        .collect::<Vec<_>>();
    rows.extend(summary.failed.iter().map(|f| {
        vec![
            "failed".to_string(),
            f.operation.clone(),
            f.periodo_id.clone(),
            f.unidade_geografica_id.clone(),
            "0".to_string(),
            format!("{}: {}", f.kind, f.message),
        ]
    }));
    if !rows.is_empty() {
        print_table(
            &["status", "operacao_id", "periodo_id", "unidade_geografica_id", "rows", "error"],
            &rows,
        );
    }
    println!(
        "{} capture(s) done, {} failed, {} row(s) loaded{}",
        summary.done.len(),
        summary.failed.len(),
        summary.rows_loaded(),
        if summary.dry_run { " (rolled back)" } else { "" }
    );
    if !summary.is_success() {
        bail!("{} capture(s) failed", summary.failed.len());
    }
    Ok(())
}

fn handle_capture(args: &cli::CaptureArgs) -> Result<()> {
    if args.batch_size == 0 {
        bail!("--batch-size must be greater than zero");
    }
    let catalog = load_catalog(&args.source)?;
    let descriptor = select_descriptor(&catalog, &args.source)?;
    let period_start = parse_period(&args.period)?;
    let conditions = parse_conditions(args.conditions.as_slice())?;
    let params = args.params.iter().try_fold(
        extract::TemplateParams::for_capture(&args.uf_sigla, period_start),
        |params, pair| {
            pair.split_once('=')
                .map(|(name, value)| params.with(name.trim(), value.trim()))
                .ok_or_else(|| anyhow!("Invalid --param '{pair}', expected name=value"))
        },
    )?;
    let request = CaptureRequest::new(
        args.uf_sigla.as_str(),
        period_start,
        args.table.as_str(),
        args.source_root.as_str(),
    )
    .with_params(params)
    .with_conditions(conditions);

    let mut conn =
        store::open(&args.database).with_context(|| format!("Opening database {:?}", args.database))?;
    store::bootstrap(&conn).context("Creating bookkeeping tables")?;
    if args.create_table {
        store::create_destination(&conn, &descriptor, &args.table)?;
    }
    let dimensions = Dimensions::load(&conn).context("Loading period and geography tables")?;
    let context = TransformContext::new(&dimensions, &dimensions);
    let options = PipelineOptions {
        batch_size: args.batch_size,
        row_limit: args.dry_run.then_some(DEFAULT_DRY_RUN_ROW_LIMIT),
    };

    let mut tx = conn.transaction()?;
    let report = pipeline::capture(&mut tx, &descriptor, &request, &context, options)
        .map_err(|err| anyhow!(err.chain()))
        .with_context(|| format!("Capturing '{}' for {} {}", descriptor.name, args.uf_sigla, args.period))?;
    if args.dry_run {
        tx.rollback()?;
        info!("Dry run: all changes rolled back");
    } else {
        tx.commit()?;
    }
    println!(
        "{} row(s) read, {} row(s) loaded into {}{}",
        report.rows_read,
        report.rows_loaded,
        args.table,
        if args.dry_run { " (rolled back)" } else { "" }
    );
    Ok(())
}

fn handle_validate(args: &cli::ValidateArgs) -> Result<()> {
    let catalog = load_catalog(&args.source)?;
    let descriptor = select_descriptor(&catalog, &args.source)?;
    let encoding = resolve_encoding(
        args.input_encoding
            .as_deref()
            .or(descriptor.source.encoding.as_deref()),
    )?;
    let delimiter = match args.delimiter {
        Some(delimiter) => delimiter,
        None => delimiter_byte(descriptor.source.delimiter).map_err(|reason| anyhow!(reason))?,
    };
    info!(
        "Validating '{}' against dataset '{}' (delimiter '{}', encoding {})",
        args.input.display(),
        descriptor.name,
        printable_delimiter(delimiter),
        encoding.name()
    );
    let headers = read_header(&args.input, delimiter, encoding)?
        .iter()
        .map(|h| normalize_raw_column_name(h))
        .collect::<Vec<_>>();
    debug!("Sample header: {:?}", headers);

    let unmapped = match descriptor.validate(headers.as_slice()) {
        Ok(()) => Vec::new(),
        Err(MappingError::UnmappedColumns { columns, .. }) => columns,
        Err(err) => return Err(err.into()),
    };
    let missing = match descriptor.check_mandatory(headers.as_slice()) {
        Ok(()) => Vec::new(),
        Err(MappingError::MissingColumns { columns, .. }) => columns,
        Err(err) => return Err(err.into()),
    };

    if unmapped.is_empty() && missing.is_empty() {
        println!(
            "{} column(s) match dataset '{}'",
            headers.len(),
            descriptor.name
        );
        return Ok(());
    }

    let mut rows = unmapped
        .iter()
        .map(|raw| vec!["unmapped".to_string(), raw.clone(), undocumented_placeholder(raw)])
        .collect::<Vec<_>>();
    rows.extend(missing.iter().map(|raw| {
        let canonical = descriptor
            .mapping_for_raw(raw)
            .map(|m| m.to.clone())
            .unwrap_or_default();
        vec!["missing".to_string(), raw.clone(), canonical]
    }));
    print_table(&["problem", "raw column", "canonical column"], &rows);
    bail!(
        "Sample does not match dataset '{}': {} unmapped, {} missing",
        descriptor.name,
        unmapped.len(),
        missing.len()
    )
}

fn handle_describe(args: &cli::DescribeArgs) -> Result<()> {
    let catalog = load_catalog(&args.source)?;
    let descriptor = select_descriptor(&catalog, &args.source)?;
    if args.format == DescribeFormat::Yaml {
        print!("{}", descriptor.to_yaml_string()?);
        return Ok(());
    }

    let period_sources = descriptor.period.sources();
    let mut rows = descriptor
        .mapping
        .iter()
        .map(|entry| {
            let ty = if period_sources.contains(&entry.to.as_str()) {
                format!("period -> {}", descriptor.period.target())
            } else {
                descriptor
                    .type_of(&entry.to)
                    .map(|t| t.to_string())
                    .unwrap_or_default()
            };
            vec![
                entry.from.clone(),
                entry.to.clone(),
                ty,
                descriptor
                    .decoding_for(&entry.to)
                    .map(|d| d.as_str().to_string())
                    .unwrap_or_default(),
                if entry.optional { "yes".to_string() } else { String::new() },
            ]
        })
        .collect::<Vec<_>>();
    rows.extend(
        descriptor
            .columns
            .iter()
            .filter(|c| !descriptor.mapping.iter().any(|m| m.to == c.name))
            .map(|c| {
                vec![
                    "-".to_string(),
                    c.name.clone(),
                    c.ty.to_string(),
                    "derived".to_string(),
                    String::new(),
                ]
            }),
    );
    println!(
        "{}: {} raw column(s), {} canonical column(s)",
        descriptor.name,
        descriptor.mapping.len(),
        descriptor.columns.len()
    );
    print_table(&["raw", "canonical", "type", "decoding", "optional"], &rows);
    Ok(())
}

fn handle_init(args: &cli::InitArgs) -> Result<()> {
    let conn =
        store::open(&args.database).with_context(|| format!("Opening database {:?}", args.database))?;
    store::bootstrap(&conn).context("Creating bookkeeping tables")?;
    info!("Bookkeeping tables ready in {:?}", args.database);
    if let Some(table) = &args.table {
        let catalog = load_catalog(&args.source)?;
        let descriptor = select_descriptor(&catalog, &args.source)?;
        store::create_destination(&conn, &descriptor, table)?;
        info!("Destination table {table} ready for '{}'", descriptor.name);
    }
    Ok(())
}
