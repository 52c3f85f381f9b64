use anyhow::Result;
use flexi_logger::{DeferredNow, Logger, Record};
use infradig::cli::{self, Command, Options, RunArgs};
use infradig::config::{Config, LoggingConfig};
use infradig::inspect::{Pipeline, effective_modules};
use infradig::model::ModuleKind;
use infradig::report::Materializer;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn json_format(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &Record<'_>,
) -> Result<(), std::io::Error> {
    let line = serde_json::json!({
        "ts": now.now().format("%Y-%m-%dT%H:%M:%S%.3f%z").to_string(),
        "level": record.level().to_string().to_lowercase(),
        "target": record.module_path().unwrap_or(""),
        "message": record.args().to_string(),
    });
    return write!(w, "{}", line);
}

fn init_logging(
    config: &LoggingConfig,
    level_override: Option<&str>,
) -> Result<flexi_logger::LoggerHandle> {
    let level = level_override.unwrap_or(&config.level);
    // Override with RUST_LOG
    let logger = Logger::try_with_env_or_str(format!(
        "{},reqwest=warn,hyper=warn,rustls=warn,handlebars=warn",
        level
    ))?;
    let logger = match config.format.as_str() {
        "json" => logger.format(json_format),
        _ => logger.format(flexi_logger::colored_detailed_format),
    };
    return Ok(logger.start()?);
}

fn validate(options: &Options, config: &Config) -> i32 {
    let pipeline = Pipeline::new(config.clone(), Default::default(), VERSION);
    let modules: Vec<ModuleKind> = ModuleKind::ALL
        .into_iter()
        .filter(|module| config.module_enabled(*module))
        .collect();
    match pipeline.load_catalogs(&modules) {
        Ok(catalogs) => {
            println!("config {} is valid", options.config.display());
            for (module, definitions) in &catalogs {
                println!(
                    "  {}: {} metrics ({} active)",
                    module,
                    definitions.len(),
                    infradig::catalog::count_active(definitions)
                );
            }
            return 0;
        }
        Err(err) => {
            eprintln!("❌ metric catalog validation failed: {:#}", err);
            return 1;
        }
    }
}

async fn run_inspection(config: Config, args: &RunArgs) -> i32 {
    let run_options = match args.to_run_options() {
        Ok(run_options) => run_options,
        Err(err) => {
            eprintln!("❌ {:#}", err);
            return 1;
        }
    };
    let timezone = match config.timezone() {
        Ok(timezone) => timezone,
        Err(err) => {
            eprintln!("❌ {:#}", err);
            return 1;
        }
    };
    // Resolve writers and formats before talking to any upstream.
    let materializer = match Materializer::new(&config.report, &run_options, timezone) {
        Ok(materializer) => materializer,
        Err(err) => {
            eprintln!("❌ {:#}", err);
            return 1;
        }
    };

    let pipeline = Pipeline::new(config, run_options, VERSION);
    let report = match pipeline.run().await {
        Ok(report) => report,
        Err(err) => {
            eprintln!("❌ inspection failed: {:#}", err);
            return 1;
        }
    };

    for bundle in &report.bundles {
        match &bundle.error {
            Some(error) => {
                eprintln!("⚠ {}: module failed: {}", bundle.module, error);
            }
            None => {
                log::info!(
                    "{}: {} instances, {} alerts",
                    bundle.module,
                    bundle.summary.total,
                    bundle.alerts.len()
                );
            }
        }
    }

    match materializer.write(&report) {
        Ok(written) => {
            for path in written {
                println!("report written: {}", path.display());
            }
        }
        Err(err) => {
            eprintln!("❌ could not write reports: {:#}", err);
            return 1;
        }
    }

    let summary = report.summary();
    println!(
        "inspected {} instances: {} normal, {} warning, {} critical, {} failed",
        summary.total, summary.normal, summary.warning, summary.critical, summary.failed
    );
    return report.exit_class();
}

async fn run(options: Options) -> i32 {
    let Some(command) = options.command.clone() else {
        // cli::parse already printed help for this case.
        return 1;
    };
    if matches!(command, Command::Version) {
        println!("infradig {}", VERSION);
        return 0;
    }

    let config = match Config::load(&options.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("❌ configuration error: {:#}", err);
            return 1;
        }
    };
    // The handle must outlive the run, dropping it shuts the logger down.
    let _logger = match init_logging(&config.logging, options.log_level.as_deref()) {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("❌ cannot initialize logging: {:#}", err);
            return 1;
        }
    };

    match command {
        Command::Version => unreachable!("handled above"),
        Command::Validate => {
            // Also surface lattice problems a dry run would hit.
            if let Err(err) = effective_modules(&config, &Default::default()) {
                eprintln!("❌ {:#}", err);
                return 1;
            }
            return validate(&options, &config);
        }
        Command::Run(args) => {
            return run_inspection(config, &args).await;
        }
    }
}

#[tokio::main]
async fn main() {
    let options = match cli::parse() {
        Ok(options) => options,
        Err(err) => {
            // clap renders its own help/usage text.
            if let Some(clap_err) = err.downcast_ref::<clap::Error>() {
                let _ = clap_err.print();
                std::process::exit(if clap_err.use_stderr() { 1 } else { 0 });
            }
            eprintln!("❌ {:#}", err);
            std::process::exit(1);
        }
    };
    let code = run(options).await;
    std::process::exit(code);
}
