//! mailbounce - Binary Entry Point
//!
//! Thin command dispatch over the library pipeline.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{error, info};

use mailbounce::feed::JsonlFeed;
use mailbounce::logging::init_logging;
use mailbounce::types::Event;
use mailbounce::utils::{format_timestamp, CancelToken};
use mailbounce::{BouncerConfig, Monitor, MonitorOptions, Pipeline, NAME, VERSION};

const USAGE: &str = "\
Usage: mailbounce [OPTIONS] <COMMAND>

Commands:
  query            Fetch all available events and store the new ones
  monitor          Poll for events, bounce failures, prune; until interrupted
  bounce           Send bounces for stored failures not yet bounced
  prune            Drop bounced markers whose event is gone
  rebuild          Reset the events store and query it again
  events [--json]  List stored events
  reset <events|bounced>
                   Empty one store

Options:
  -c, --config <PATH>  Configuration file (TOML, JSON or YAML)
      --feed <PATH>    JSON-lines event file to read from
      --dry-run        Log bounces instead of sending them
      --no-bounce      Store events without sending bounces
  -h, --help           Print help
  -V, --version        Print version

Every option can also be set through MAILBOUNCE_* environment variables.";

#[derive(Debug, PartialEq, Eq)]
enum Store {
    Events,
    Bounced,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Query,
    Monitor,
    Bounce,
    Prune,
    Rebuild,
    Events { json: bool },
    Reset(Store),
    Help,
    Version,
}

#[derive(Debug)]
struct Cli {
    config: Option<PathBuf>,
    feed: Option<PathBuf>,
    dry_run: bool,
    no_bounce: bool,
    command: Command,
}

impl Cli {
    fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self> {
        let mut config = None;
        let mut feed = None;
        let mut dry_run = false;
        let mut no_bounce = false;
        let mut json = false;
        let mut positional = Vec::new();

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    let value = args.next().ok_or_else(|| anyhow!("{} needs a path", arg))?;
                    config = Some(PathBuf::from(value));
                }
                "--feed" => {
                    let value = args.next().ok_or_else(|| anyhow!("--feed needs a path"))?;
                    feed = Some(PathBuf::from(value));
                }
                "--dry-run" => dry_run = true,
                "--no-bounce" => no_bounce = true,
                "--json" => json = true,
                "-h" | "--help" => positional.insert(0, "help".to_string()),
                "-V" | "--version" => positional.insert(0, "version".to_string()),
                flag if flag.starts_with('-') => bail!("unknown option: {}", flag),
                _ => positional.push(arg),
            }
        }

        let mut positional = positional.into_iter();
        let command = match positional.next().as_deref() {
            None | Some("help") => Command::Help,
            Some("version") => Command::Version,
            Some("query") => Command::Query,
            Some("monitor") => Command::Monitor,
            Some("bounce") => Command::Bounce,
            Some("prune") => Command::Prune,
            Some("rebuild") => Command::Rebuild,
            Some("events") => Command::Events { json },
            Some("reset") => match positional.next().as_deref() {
                Some("events") => Command::Reset(Store::Events),
                Some("bounced") => Command::Reset(Store::Bounced),
                Some(other) => bail!("unknown store: {} (expected events or bounced)", other),
                None => bail!("reset needs a store: events or bounced"),
            },
            Some(other) => bail!("unknown command: {}", other),
        };

        if let Some(extra) = positional.next() {
            bail!("unexpected argument: {}", extra);
        }

        Ok(Self {
            config,
            feed,
            dry_run,
            no_bounce,
            command,
        })
    }

    fn load_config(&self) -> Result<BouncerConfig> {
        let mut config =
            BouncerConfig::load(self.config.as_deref()).context("failed to load configuration")?;
        config.dry_run |= self.dry_run;
        config.no_bounce |= self.no_bounce;
        if let Some(feed) = &self.feed {
            config.feed_path = Some(feed.clone());
        }
        Ok(config)
    }
}

fn open_feed(config: &BouncerConfig) -> Result<JsonlFeed> {
    let path = config
        .feed_path
        .as_ref()
        .ok_or_else(|| anyhow!("no event feed configured (use --feed or MAILBOUNCE_FEED_PATH)"))?;
    Ok(JsonlFeed::new(path).with_page_size(config.page_size))
}

fn list_events(pipeline: &Pipeline, json: bool) -> Result<()> {
    let stores = pipeline.stores();
    let mut keys = stores.events.keys()?;
    keys.sort();

    for key in keys {
        let Some(data) = stores.events.get(&key)? else {
            continue;
        };
        match Event::decode(&data) {
            Ok(event) if json => println!("{}", serde_json::to_string(event.raw())?),
            Ok(event) => println!(
                "{}\t{}\t{}\t{}",
                key,
                format_timestamp(event.timestamp),
                event.kind,
                if stores.bounced.exists(&key) { "bounced" } else { "-" }
            ),
            Err(e) => error!(key = %key, error = %e, "corrupt stored event"),
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Help => {
            println!("{}", USAGE);
            return Ok(());
        }
        Command::Version => {
            println!("{} {}", NAME, VERSION);
            return Ok(());
        }
        _ => {}
    }

    let config = cli.load_config()?;
    init_logging(&config.log_level, &config.log_file)?;

    let pipeline = Pipeline::from_config(&config).context("failed to open stores")?;
    info!(
        data_root = %config.data_root.display(),
        domain = %config.domain,
        dry_run = config.dry_run,
        "{} {}",
        NAME,
        VERSION
    );

    match cli.command {
        Command::Query => {
            let mut feed = open_feed(&config)?;
            pipeline.query(&mut feed, &config.domain)?;
        }
        Command::Monitor => {
            let mut feed = open_feed(&config)?;
            let cancel = CancelToken::new();
            let handler = cancel.clone();
            ctrlc::set_handler(move || handler.cancel())
                .context("failed to install signal handler")?;

            let monitor = Monitor::new(pipeline, MonitorOptions::from_config(&config));
            monitor.run(&mut feed, &cancel)?;
        }
        Command::Bounce => {
            if config.no_bounce {
                info!("bouncing disabled, nothing to do");
                return Ok(());
            }
            let report = pipeline.generate_bounces()?;
            if !report.is_clean() {
                for (key, failure) in &report.failures {
                    error!(key = %key, "{}", failure);
                }
                bail!("{} event(s) could not be bounced", report.failures.len());
            }
        }
        Command::Prune => {
            pipeline.prune_bounced()?;
        }
        Command::Rebuild => {
            let mut feed = open_feed(&config)?;
            pipeline.rebuild_events(&mut feed, &config.domain)?;
        }
        Command::Events { json } => list_events(&pipeline, json)?,
        Command::Reset(Store::Events) => pipeline.reset_events()?,
        Command::Reset(Store::Bounced) => pipeline.reset_bounced()?,
        Command::Help | Command::Version => {}
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = match Cli::parse(env::args().skip(1)) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("error: {}\n\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli> {
        Cli::parse(args.iter().map(|a| a.to_string()))
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse(&[]).unwrap().command, Command::Help);
        assert_eq!(parse(&["query"]).unwrap().command, Command::Query);
        assert_eq!(
            parse(&["events", "--json"]).unwrap().command,
            Command::Events { json: true }
        );
        assert_eq!(
            parse(&["reset", "bounced"]).unwrap().command,
            Command::Reset(Store::Bounced)
        );
        assert_eq!(parse(&["monitor", "-h"]).unwrap().command, Command::Help);
    }

    #[test]
    fn test_parse_global_options() {
        let cli = parse(&[
            "--config",
            "/etc/mailbounce.toml",
            "monitor",
            "--feed",
            "e.jsonl",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.command, Command::Monitor);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/mailbounce.toml")));
        assert_eq!(cli.feed, Some(PathBuf::from("e.jsonl")));
        assert!(cli.dry_run);
        assert!(!cli.no_bounce);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse(&["frobnicate"]).is_err());
        assert!(parse(&["reset"]).is_err());
        assert!(parse(&["reset", "everything"]).is_err());
        assert!(parse(&["query", "extra"]).is_err());
        assert!(parse(&["--config"]).is_err());
        assert!(parse(&["--verbose"]).is_err());
    }
}
