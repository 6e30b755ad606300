use anyhow::{Context, Result};
use burrow::{
    config::{Config, DEFAULT_CONFIG_PATH, ensure_usable, expand_home},
    fsops::FileManager,
    lookup::LookupClient,
    rename::EpisodeRenamer,
    service::{self, Service, ServiceRequest, ServiceResponse},
    telemetry::{self, DEFAULT_LOG_LEVEL, LogFormat},
};
use clap::{Parser, Subcommand};
use colored::Colorize;
use inquire::Confirm;
use std::{path::PathBuf, process::ExitCode, sync::Arc};
use tabled::{Table, Tabled, settings::Style};
use tokio::io::{self, AsyncWriteExt, BufReader};

#[derive(Subcommand, Debug)]
enum Commands {
    /// List a directory inside the jail
    List {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Remove a file or a whole directory tree
    Remove {
        path: String,
        /// Do not ask for confirmation
        #[arg(long, short)]
        yes: bool,
    },
    /// Move or rename a file or directory
    Move { source: String, target: String },
    /// Create a directory
    Mkdir { path: String },
    /// Copy a file out of the jail
    Download {
        path: String,
        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Identify a TV episode by its file name and rename it
    Rename {
        path: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Answer newline delimited JSON requests from stdin
    Serve,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
    /// Restrict file operations to this directory
    #[arg(long, global = true)]
    jail: Option<PathBuf>,
    /// Include dotfiles in listings
    #[arg(long, global = true)]
    include_dotfiles: bool,
    /// Episode information service URL
    #[arg(long, global = true)]
    lookup_endpoint: Option<String>,
    /// Print responses as JSON
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, global = true, default_value = DEFAULT_LOG_LEVEL)]
    log_level: String,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Tabled)]
struct ListingRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    kind: &'static str,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(&expand_home(&args.config))?;
    config.apply_env()?;
    if let Some(jail) = &args.jail {
        config.jail_root =
            Some(std::path::absolute(jail).context("Failed to make jail path absolute")?);
    }
    if args.include_dotfiles {
        config.include_dotfiles = true;
    }
    if let Some(endpoint) = &args.lookup_endpoint {
        config.lookup.endpoint = endpoint.clone();
    }
    ensure_usable(&config)?;
    Ok(config)
}

fn listing_rows(names: &[String]) -> Vec<ListingRow> {
    let mut rows = names
        .iter()
        .map(|name| match name.strip_suffix('/') {
            Some(dir) => ListingRow {
                name: dir.to_string(),
                kind: "directory",
            },
            None => ListingRow {
                name: name.clone(),
                kind: "file",
            },
        })
        .collect::<Vec<_>>();
    rows.sort_by(|a, b| a.kind.cmp(b.kind).then_with(|| a.name.cmp(&b.name)));
    rows
}

fn print_response(response: &ServiceResponse, json: bool) -> Result<ExitCode> {
    if json {
        println!("{}", serde_json::to_string(response)?);
    } else {
        match response {
            ServiceResponse::Listing(names) => {
                println!("{}", Table::new(listing_rows(names)).with(Style::rounded()));
            }
            ServiceResponse::Done { .. } => println!("{}", "Done".green()),
            ServiceResponse::Path { path, .. } => println!("{} {}", "->".green(), path.bold()),
            ServiceResponse::Failure { message, .. } => {
                eprintln!("{} {}", "error:".red().bold(), message)
            }
        }
    }
    Ok(if response.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn download(service: &Service, path: &str, output: Option<PathBuf>) -> Result<ExitCode> {
    let check = service.files().validate_for_download(path).await;
    if !check.valid {
        return print_response(&ServiceResponse::failure("not found"), false);
    }
    let metadata = tokio::fs::metadata(&check.path)
        .await
        .with_context(|| format!("Failed to stat {path}"))?;
    if metadata.is_dir() {
        return print_response(&ServiceResponse::failure("path is a directory"), false);
    }
    match output {
        Some(output) => {
            tokio::fs::copy(&check.path, &output)
                .await
                .with_context(|| format!("Failed to copy {path}"))?;
        }
        None => {
            let mut file = tokio::fs::File::open(&check.path)
                .await
                .with_context(|| format!("Failed to open {path}"))?;
            let mut stdout = io::stdout();
            io::copy(&mut file, &mut stdout).await?;
            stdout.flush().await?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn dry_run(service: &Service, path: &str, json: bool) -> Result<ExitCode> {
    let jail = service.files().jail();
    match EpisodeRenamer::new(jail, service.lookup()).plan(path).await {
        Ok(plan) => {
            let source = jail.display(&plan.source);
            let target = jail.display(&plan.target);
            if json {
                println!("{}", serde_json::to_string(&ServiceResponse::path(target))?);
            } else {
                println!("{:?} -> {:?}", source, target);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => print_response(&service.failure(&err), json),
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let config = load_config(&args)?;
    let files = FileManager::new(config.jail()?);
    let lookup = LookupClient::new(&config.lookup)?;
    let service = Service::new(files, lookup);

    let request = match args.command {
        Commands::Serve => {
            service::serve(Arc::new(service), BufReader::new(io::stdin()), io::stdout()).await?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Download { path, output } => return download(&service, &path, output).await,
        Commands::Rename {
            path,
            dry_run: true,
        } => return dry_run(&service, &path, args.json).await,
        Commands::Rename {
            path,
            dry_run: false,
        } => ServiceRequest::TvRename { path },
        Commands::List { path } => ServiceRequest::List { path },
        Commands::Remove { path, yes } => {
            let confirmed = yes
                || Confirm::new(&format!("Remove {path} and everything below it?"))
                    .with_default(false)
                    .prompt()?;
            if !confirmed {
                println!("Skip {:?}", path);
                return Ok(ExitCode::SUCCESS);
            }
            ServiceRequest::Remove { path }
        }
        Commands::Move { source, target } => ServiceRequest::Move { source, target },
        Commands::Mkdir { path } => ServiceRequest::Mkdir { path },
    };

    let response = service.handle(request).await;
    print_response(&response, args.json)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    let format = if args.log_json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    telemetry::init_logging(&args.log_level, format)?;
    run(args).await
}
