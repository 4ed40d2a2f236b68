mod cli;

use sceneforged_demux::config::{self, Config};
use sceneforged_demux::report::{ProbeReport, SampleLine, Session, SessionOptions};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, SessionArgs};
use std::path::Path;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "sceneforged_demux=debug,sceneforged_extractor=trace".to_string()
        } else {
            "sceneforged_demux=info,sceneforged_extractor=warn".to_string()
        }
    });

    // Logs go to stderr so --json output stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Formats { mime } => list_formats(mime.as_deref()),
        Commands::Probe { session, json } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            probe_file(&config, &session, json || config.output.json)
        }
        Commands::Dump {
            session,
            limit,
            json,
        } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let limit = limit.or(config.output.max_samples);
            dump_file(&config, &session, limit, json || config.output.json)
        }
        Commands::Seek {
            session,
            time_us,
            json,
        } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            seek_file(&config, &session, time_us, json || config.output.json)
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("sceneforged-demux {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn list_formats(mime: Option<&str>) -> Result<()> {
    let names = sceneforged_extractor::list_formats(mime);
    if names.is_empty() {
        if let Some(mime) = mime {
            tracing::info!("No format handles {}", mime);
        }
    }
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

fn open_session(config: &Config, args: &SessionArgs) -> Result<Session> {
    if !args.file.exists() {
        anyhow::bail!("File does not exist: {:?}", args.file);
    }
    let options = SessionOptions {
        format: args.format.clone(),
        parameters: args.parameters.clone(),
    };
    Session::open(&args.file, config, &options)
}

fn probe_file(config: &Config, args: &SessionArgs, json: bool) -> Result<()> {
    let mut session = open_session(config, args)?;
    session.run(None)?;
    let report = ProbeReport::from_parser(&session.parser);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("File: {}", args.file.display());
        println!("{}", report);
    }
    Ok(())
}

fn dump_file(config: &Config, args: &SessionArgs, limit: Option<usize>, json: bool) -> Result<()> {
    let mut session = open_session(config, args)?;
    session.run(limit)?;

    let samples = &session.parser.sink().samples;
    let shown = limit.map_or(samples.len(), |n| n.min(samples.len()));
    for sample in &samples[..shown] {
        let line = SampleLine::from(sample);
        if json {
            println!("{}", serde_json::to_string(&line)?);
        } else {
            println!("{}", line);
        }
    }
    Ok(())
}

fn seek_file(config: &Config, args: &SessionArgs, time_us: i64, json: bool) -> Result<()> {
    let mut session = open_session(config, args)?;
    session.run(None)?;
    let report = session.seek_and_resume(time_us)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Sniff window: {} bytes", config.input.sniff_window);
            println!("  Read chunk: {} bytes", config.input.read_chunk);
            match config.output.max_samples {
                Some(n) => println!("  Max samples: {}", n),
                None => println!("  Max samples: unlimited"),
            }
            println!("  Parameters: {}", config.parameters.len());
        }
        None => {
            println!("No config file specified, using defaults");
            let config = Config::default();
            println!("Default config:");
            println!("  Sniff window: {} bytes", config.input.sniff_window);
            println!("  Read chunk: {} bytes", config.input.read_chunk);
        }
    }

    Ok(())
}
