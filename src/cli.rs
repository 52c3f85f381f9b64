use crate::inspect::RunOptions;
use crate::model::ModuleKind;
use anyhow::{Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process;

#[derive(Parser, Clone)]
#[command(name = "infradig")]
#[command(author, version, about, long_about = None)]
pub struct Options {
    /// Configuration file
    #[arg(
        short('c'),
        long,
        global = true,
        env = "INFRADIG_CONFIG",
        default_value = "configs/config.yaml"
    )]
    pub config: PathBuf,

    /// Override logging.level from the config
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    // Optional so that bare `--completion <shell>` works.
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    service: ServiceOptions,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run an inspection and write the report
    Run(RunArgs),
    /// Check the configuration and metric catalogs without touching any upstream
    Validate,
    /// Print version information
    Version,
}

#[derive(Debug, Clone, Args, Default)]
pub struct RunArgs {
    /// Report formats to produce (comma separated, e.g. excel,html)
    #[arg(short('f'), long, value_delimiter = ',')]
    pub format: Vec<String>,

    /// Output directory override
    #[arg(short('o'), long)]
    pub output: Option<PathBuf>,

    /// Host metric catalog override
    #[arg(short('m'), long, value_name = "FILE")]
    pub metrics: Option<PathBuf>,
    #[arg(long, value_name = "FILE")]
    pub mysql_metrics: Option<PathBuf>,
    #[arg(long, value_name = "FILE")]
    pub redis_metrics: Option<PathBuf>,
    #[arg(long, value_name = "FILE")]
    pub nginx_metrics: Option<PathBuf>,
    #[arg(long, value_name = "FILE")]
    pub tomcat_metrics: Option<PathBuf>,

    /// Inspect only MySQL
    #[arg(long)]
    pub mysql_only: bool,
    /// Inspect only Redis
    #[arg(long)]
    pub redis_only: bool,
    /// Inspect only Nginx
    #[arg(long)]
    pub nginx_only: bool,
    /// Inspect only Tomcat
    #[arg(long)]
    pub tomcat_only: bool,

    #[arg(long)]
    pub skip_mysql: bool,
    #[arg(long)]
    pub skip_redis: bool,
    #[arg(long)]
    pub skip_nginx: bool,
    #[arg(long)]
    pub skip_tomcat: bool,

    /// Excel workbook style template (YAML)
    #[arg(long, value_name = "FILE")]
    pub excel_template: Option<PathBuf>,
}

impl RunArgs {
    /// Check the only/skip lattice and produce the explicit options struct
    /// the pipeline runs from. All violations surface here, before any
    /// network I/O.
    pub fn to_run_options(&self) -> Result<RunOptions> {
        let only_flags = [
            (self.mysql_only, ModuleKind::Mysql),
            (self.redis_only, ModuleKind::Redis),
            (self.nginx_only, ModuleKind::Nginx),
            (self.tomcat_only, ModuleKind::Tomcat),
        ];
        let onlys: Vec<ModuleKind> = only_flags
            .iter()
            .filter(|(set, _)| *set)
            .map(|(_, module)| *module)
            .collect();
        if onlys.len() > 1 {
            bail!("at most one --<module>-only flag may be given");
        }
        let only = onlys.first().copied();

        let skip_flags = [
            (self.skip_mysql, ModuleKind::Mysql),
            (self.skip_redis, ModuleKind::Redis),
            (self.skip_nginx, ModuleKind::Nginx),
            (self.skip_tomcat, ModuleKind::Tomcat),
        ];
        let skip: Vec<ModuleKind> = skip_flags
            .iter()
            .filter(|(set, _)| *set)
            .map(|(_, module)| *module)
            .collect();
        if let Some(only) = only {
            if skip.contains(&only) {
                bail!(
                    "--{}-only and --skip-{} are mutually exclusive",
                    only,
                    only
                );
            }
        }

        let mut catalogs = std::collections::BTreeMap::new();
        let overrides = [
            (ModuleKind::Host, &self.metrics),
            (ModuleKind::Mysql, &self.mysql_metrics),
            (ModuleKind::Redis, &self.redis_metrics),
            (ModuleKind::Nginx, &self.nginx_metrics),
            (ModuleKind::Tomcat, &self.tomcat_metrics),
        ];
        for (module, path) in overrides {
            if let Some(path) = path {
                catalogs.insert(module, path.clone());
            }
        }

        return Ok(RunOptions {
            only,
            skip,
            formats: self.format.clone(),
            output_dir: self.output.clone(),
            catalogs,
            excel_template: self.excel_template.clone(),
        });
    }
}

#[derive(Args, Clone)]
struct ServiceOptions {
    #[arg(long, value_enum)]
    completion: Option<Shell>,
}

pub fn parse() -> Result<Options> {
    return parse_from(std::env::args_os());
}

pub fn parse_from<I, T>(itr: I) -> Result<Options>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let options = Options::try_parse_from(itr)?;

    // Generate autocompletion
    if let Some(shell) = options.service.completion {
        let mut cmd = Options::command();
        let name = cmd.get_name().to_string();
        generate(shell, &mut cmd, name, &mut io::stdout());
        process::exit(0);
    }

    if options.command.is_none() {
        let mut cmd = Options::command();
        let _ = cmd.print_help();
        process::exit(1);
    }

    return Ok(options);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_run(args: &[&str]) -> Result<RunOptions> {
        let mut argv = vec!["infradig", "run"];
        argv.extend_from_slice(args);
        let options = parse_from(argv)?;
        match options.command {
            Some(Command::Run(run)) => return run.to_run_options(),
            other => panic!("expected run command, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_run() {
        let options = parse_run(&[]).unwrap();
        assert_eq!(options.only, None);
        assert!(options.skip.is_empty());
        assert!(options.formats.is_empty());
    }

    #[test]
    fn test_formats_csv() {
        let options = parse_run(&["--format", "excel,html"]).unwrap();
        assert_eq!(options.formats, ["excel", "html"]);
    }

    #[test]
    fn test_one_only_flag() {
        let options = parse_run(&["--redis-only"]).unwrap();
        assert_eq!(options.only, Some(ModuleKind::Redis));
    }

    #[test]
    fn test_two_only_flags_conflict() {
        let err = parse_run(&["--redis-only", "--mysql-only"]).unwrap_err();
        assert!(err.to_string().contains("at most one"));
    }

    #[test]
    fn test_only_and_skip_conflict() {
        let err = parse_run(&["--redis-only", "--skip-redis"]).unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_skip_flags() {
        let options = parse_run(&["--skip-mysql", "--skip-tomcat"]).unwrap();
        assert_eq!(options.skip, [ModuleKind::Mysql, ModuleKind::Tomcat]);
    }

    #[test]
    fn test_catalog_overrides() {
        let options =
            parse_run(&["--metrics", "custom-host.yaml", "--nginx-metrics", "ngx.yaml"]).unwrap();
        assert_eq!(
            options.catalogs.get(&ModuleKind::Host).unwrap(),
            &PathBuf::from("custom-host.yaml")
        );
        assert_eq!(
            options.catalogs.get(&ModuleKind::Nginx).unwrap(),
            &PathBuf::from("ngx.yaml")
        );
    }

    #[test]
    fn test_unknown_flag_is_an_error() {
        assert!(parse_from(["infradig", "run", "--frobnicate"]).is_err());
    }
}
