use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::TimestampPrecision;
use log::{error, info};

use probelink_lib::port;
use probelink_lib::protocol::slave::{byte_queue, pump, Session};
use probelink_lib::protocol::FramerConfig;
use probelink_lib::sim::{SimTag, DEFAULT_UID};

/// Serve a simulated tag over a serial port
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Skip sanity checks
    #[clap(long, short)]
    force: bool,

    /// enable debug output
    #[clap(long, short)]
    debug: bool,

    /// UART device or 'auto'
    #[clap(long, short, default_value = "auto")]
    port: String,

    /// UART baud rate
    #[clap(long, short, default_value_t = 115200)]
    baudrate: u32,

    /// Target address the tag answers on
    #[clap(long, short, default_value_t = 0)]
    target: u8,

    /// Tag UID as a hex string
    #[clap(long, short)]
    uid: Option<String>,

    /// Start with the tag out of the field
    #[clap(long, short)]
    absent: bool,

    /// Expect a CRC-8 byte in every frame
    #[clap(long, short)]
    checksum: bool,

    /// Drop frames left open longer than this
    #[clap(long)]
    frame_timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if args.debug {
        "debug"
    } else {
        "info"
    }))
    .format_timestamp(Some(TimestampPrecision::Millis))
    .format_target(false)
    .init();

    let uid = match &args.uid {
        Some(s) => hex::decode(s).with_context(|| format!("Bad uid '{}'", s))?,
        None => DEFAULT_UID.to_vec(),
    };
    let mut tag = SimTag::new(args.target, uid);
    tag.set_present(!args.absent);

    let config = FramerConfig {
        checksum: args.checksum,
        frame_timeout: args.frame_timeout_ms.map(Duration::from_millis),
    };

    let stream = port::open_port_async(&args.port, args.baudrate, args.force)?;
    let (reader, writer) = tokio::io::split(stream);
    let (tx, rx) = byte_queue();

    let reader_task = tokio::spawn(async move {
        if let Err(e) = pump(reader, tx).await {
            error!("port read failed: {:#}", e);
        }
    });

    info!("serving target {} ({:?})", args.target, config);
    let mut session = Session::new(config, tag, writer, rx);
    session.run().await?;

    reader_task.await?;
    Ok(())
}
