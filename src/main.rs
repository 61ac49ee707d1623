use clap::{Arg, Command};
use header_scan::workspace::Workspace;
use header_scan::{Analysis, Config, IpInfoClient, ReportPresenter};
use log::LevelFilter;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process;

#[tokio::main]
async fn main() {
    let matches = Command::new("header-scan")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Parse an email header and score how likely it is to be forged")
        .arg(
            Arg::new("file")
                .value_name("FILE")
                .help("Raw email header file (body optional)")
                .required_unless_present("generate-config"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/header-scan.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-lookup")
                .long("no-lookup")
                .help("Skip IP geolocation lookups")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-color")
                .long("no-color")
                .help("Disable colored output")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-view")
                .long("no-view")
                .help("Never offer to open the decoded body")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print the analysis as JSON instead of the text report")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("/etc/header-scan.yaml");
    let mut config = match Config::load_or_default(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };
    if matches.get_flag("no-lookup") {
        config.ip_lookup.enabled = false;
    }
    if matches.get_flag("no-color") {
        config.color = false;
    }

    let Some(input) = matches.get_one::<String>("file") else {
        eprintln!("Usage: header-scan <FILE>");
        process::exit(1);
    };
    let analysis = match Analysis::from_file(input) {
        Ok(analysis) => analysis,
        Err(e) => {
            eprintln!("{e:#}");
            process::exit(1);
        }
    };

    let decoded_path = match prepare_workspace(&config, &analysis) {
        Ok(path) => path,
        Err(e) => {
            log::warn!("Scratch storage unavailable: {e:#}");
            None
        }
    };

    let locations = if config.ip_lookup.enabled {
        match IpInfoClient::new(&config.ip_lookup) {
            Ok(client) => analysis.locate(&client).await,
            Err(e) => {
                log::warn!("IP lookups disabled: {e}");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    if matches.get_flag("json") {
        let document = serde_json::json!({
            "analysis": analysis,
            "locations": locations,
        });
        match serde_json::to_string_pretty(&document) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Error encoding analysis: {e}");
                process::exit(1);
            }
        }
        return;
    }

    print!("{}", ReportPresenter::new(config.color).render(&analysis, &locations));

    if matches.get_flag("no-view") {
        return;
    }
    if let Some(path) = decoded_path {
        if analysis.document.body.decode().is_empty() {
            return;
        }
        println!();
        if confirm("View base64 encodings [y/n]?: ") {
            open_viewer(&config.viewer, &path);
        }
    }
}

/// Writes the scratch files; returns the decoded body path when one exists.
fn prepare_workspace(config: &Config, analysis: &Analysis) -> anyhow::Result<Option<std::path::PathBuf>> {
    let workspace = Workspace::prepare(&config.work_dir)?;
    workspace.write_parsed(&analysis.document.fields)?;
    workspace.write_body(&analysis.document.body)
}

fn confirm(prompt: &str) -> bool {
    print!("{prompt}");
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => answer.trim() == "y",
        Err(e) => {
            log::warn!("Failed to read answer: {e}");
            false
        }
    }
}

fn open_viewer(viewer: &str, path: &Path) {
    log::debug!("Opening {} with {viewer}", path.display());
    match process::Command::new(viewer).arg(path).status() {
        Ok(status) if !status.success() => log::warn!("{viewer} exited with {status}"),
        Ok(_) => {}
        Err(e) => eprintln!("Failed to start {viewer}: {e}"),
    }
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}
