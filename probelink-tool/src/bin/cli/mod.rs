use anyhow::Result;
pub use clap::Parser;
use clap::Subcommand;
use lazy_static::lazy_static;
use regex::Regex;
use std::cmp;
use std::ops::Deref;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RangeError {
    #[error("invalid range '{0}'")]
    BadRange(String),
}

/// Block indexes given as `1,3-5`, sorted and deduplicated.
#[derive(Debug)]
pub struct IndexRange(Vec<u8>);

impl Deref for IndexRange {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

fn parse_index(s: &str, whole: &str) -> Result<u8, RangeError> {
    parse_with_radix::<u8>(s).map_err(|_| RangeError::BadRange(whole.to_string()))
}

impl FromStr for IndexRange {
    type Err = RangeError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        lazy_static! {
            static ref RE: Regex =
                Regex::new(r"^(0x[0-9a-fA-F]+|\d+)(?:-(0x[0-9a-fA-F]+|\d+))?$").unwrap();
        }

        let mut result: Vec<u8> = Vec::new();

        for s in input.split(',') {
            let c = RE
                .captures(s.trim())
                .ok_or_else(|| RangeError::BadRange(s.to_string()))?;

            let first = c.get(1).map_or("", |m| m.as_str());
            let val1 = parse_index(first, s)?;
            match c.get(2) {
                None => result.push(val1),
                Some(last) => {
                    let val2 = parse_index(last.as_str(), s)?;
                    result.extend(cmp::min(val1, val2)..=cmp::max(val1, val2));
                }
            }
        }

        result.sort_unstable();
        result.dedup();
        Ok(IndexRange(result))
    }
}

pub fn parse_with_radix<T>(input: &str) -> Result<T, T::FromStrRadixErr>
where
    T: num::Num,
    <T as num::Num>::FromStrRadixErr: std::error::Error + Send + Sync,
{
    if let Some(hex) = input.strip_prefix("0x") {
        T::from_str_radix(hex, 16)
    } else if let Some(bin) = input.strip_prefix("0b") {
        T::from_str_radix(bin, 2)
    } else {
        T::from_str_radix(input, 10)
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Skip sanity checks
    #[clap(long, short)]
    pub force: bool,

    /// enable debug output
    #[clap(long, short)]
    pub debug: bool,

    /// UART device or 'auto'
    #[clap(long, short, default_value = "auto")]
    pub port: String,

    /// UART baud rate
    #[clap(long, short, default_value_t = 115200)]
    pub baudrate: u32,

    /// Request retry count
    #[clap(long, short, default_value_t = 0)]
    pub retries: usize,

    /// Append a CRC-8 byte to every frame
    #[clap(long, short)]
    pub checksum: bool,

    /// Response timeout in milliseconds
    #[clap(long, short = 't', default_value_t = 100)]
    pub timeout_ms: u64,

    /// Use json-formatted output
    #[clap(long, short)]
    pub json: bool,

    /// Accept a block value once this many reads in a row agree
    #[clap(long, default_value_t = 1)]
    pub successive: usize,

    /// Reads per consistency round
    #[clap(long, default_value_t = 1)]
    pub attempts: usize,

    /// Consistency rounds before giving up
    #[clap(long, default_value_t = 1)]
    pub rounds: usize,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read 32-bit blocks
    Read {
        #[clap(parse(try_from_str=parse_with_radix))]
        target: u8,
        indexes: IndexRange,
    },

    /// Write a 32-bit value to one or more blocks
    Write {
        /// Read every block back and compare
        #[clap(long, short)]
        verify: bool,
        #[clap(parse(try_from_str=parse_with_radix))]
        target: u8,
        indexes: IndexRange,
        #[clap(parse(try_from_str=parse_with_radix))]
        value: u32,
    },

    /// Check whether a tag is in the field
    #[clap(visible_alias = "ping")]
    Present {
        #[clap(default_value_t = 0, parse(try_from_str=parse_with_radix))]
        target: u8,
    },

    /// Read tag UID
    Uid {
        #[clap(default_value_t = 0, parse(try_from_str=parse_with_radix))]
        target: u8,
    },
}
