pub mod cli;

use std::fmt::Display;
use std::io::{self, Read, Write};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::CommandFactory;
use clap_complete::{generate, shells::Bash};
use log::error;

use probelink_lib::port;
use probelink_lib::protocol::master::{Master, ReadPolicy};

use cli::{Cli, Commands, Parser};

enum OutputFormat {
    Plain,
    Json,
}

fn slice_to_column<T>(data: &[T]) -> String
where
    T: Display,
{
    data.iter()
        .map(|x| x.to_string())
        .collect::<Vec<String>>()
        .join("\n")
}

fn cmd_read<P: Read + Write>(
    master: &mut Master<P>,
    target: u8,
    indexes: &[u8],
    fmt: OutputFormat,
) -> Result<String> {
    let res = master
        .read_blocks(target, indexes)
        .with_context(|| format!("Failed to read blocks {:?} of target {}", indexes, target))?;

    Ok(match fmt {
        OutputFormat::Plain => slice_to_column(res.as_slice()),
        OutputFormat::Json => {
            if res.len() > 1 {
                json::stringify(res)
            } else {
                res[0].to_string()
            }
        }
    })
}

fn cmd_write<P: Read + Write>(
    master: &mut Master<P>,
    target: u8,
    indexes: &[u8],
    value: u32,
    verify: bool,
) -> Result<String> {
    master
        .write_blocks(target, indexes, &value.to_le_bytes(), verify)
        .with_context(|| format!("Failed to write blocks {:?} of target {}", indexes, target))
        .map(|_| String::new())
}

fn cmd_present<P: Read + Write>(
    master: &mut Master<P>,
    target: u8,
    fmt: OutputFormat,
) -> Result<String> {
    let present = master
        .check_presence(target, 0)
        .with_context(|| format!("Failed to check presence of target {}", target))?;

    Ok(match fmt {
        OutputFormat::Plain => String::from(if present { "present" } else { "absent" }),
        OutputFormat::Json => json::stringify(present),
    })
}

fn cmd_uid<P: Read + Write>(
    master: &mut Master<P>,
    target: u8,
    fmt: OutputFormat,
) -> Result<String> {
    let uid = master
        .read_uid(target, 0)
        .with_context(|| format!("Failed to read uid of target {}", target))?;

    Ok(match fmt {
        OutputFormat::Plain => hex::encode_upper(&uid),
        OutputFormat::Json => json::stringify(uid),
    })
}

fn do_main() -> Result<String> {
    if std::env::var("GENERATE_COMPLETION").is_ok() {
        generate(Bash, &mut Cli::command(), "probelink", &mut io::stdout());

        return Ok(String::default());
    }

    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if cli.debug {
        "debug"
    } else {
        "info"
    }))
    .format_timestamp(None)
    .format_target(false)
    .init();

    let fmt = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Plain
    };

    let mut port = port::open_port(&cli.port, cli.baudrate, cli.force)?;
    let mut master = Master::new(port.as_mut(), cli.retries, cli.checksum)
        .with_response_timeout(Duration::from_millis(cli.timeout_ms))
        .with_read_policy(ReadPolicy {
            successive: cli.successive,
            attempts: cli.attempts,
            rounds: cli.rounds,
        });

    match cli.command {
        Commands::Read { target, indexes } => {
            if indexes.is_empty() {
                return Err(anyhow!("No block indexes given"));
            }
            cmd_read(&mut master, target, &indexes, fmt)
        }
        Commands::Write {
            verify,
            target,
            indexes,
            value,
        } => cmd_write(&mut master, target, &indexes, value, verify),
        Commands::Present { target } => cmd_present(&mut master, target, fmt),
        Commands::Uid { target } => cmd_uid(&mut master, target, fmt),
    }
}

fn main() {
    match do_main() {
        Ok(s) => println!("{}", s),
        Err(e) => error!("{:#}", e),
    }
}
