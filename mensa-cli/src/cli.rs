//! Command-line interface definitions.
//!
//! Every option can also be given through the environment where noted.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::update::{Artifacts, UpdateOptions};

/// Published location of the generated files.
pub(crate) const DEFAULT_BASE_URL: &str = "https://cvzi.github.io/mensa/";

#[derive(Parser, Debug)]
#[command(name = "mensa", author, version, about)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Scrape all canteens and rewrite the published files
    Update(UpdateArgs),
    /// Serve a single feed file at /full.xml
    Serve(ServeArgs),
}

/// Without any of `--json --meta --feed --today --index`, everything except `today` is written.
#[derive(Args, Debug)]
pub(crate) struct UpdateArgs {
    /// Write `<parser>.json`
    #[arg(long)]
    pub(crate) json: bool,

    /// Write meta documents
    #[arg(long)]
    pub(crate) meta: bool,

    /// Write the regular feeds (and today feeds where a parser has them)
    #[arg(long)]
    pub(crate) feed: bool,

    /// Write only the today feeds
    #[arg(long)]
    pub(crate) today: bool,

    /// Regenerate index.html
    #[arg(long)]
    pub(crate) index: bool,

    /// Only run this parser
    #[arg(long)]
    pub(crate) parser: Option<String>,

    /// Only update this canteen reference
    #[arg(long)]
    pub(crate) canteen: Option<String>,

    /// Base URL the output directory is published at
    #[arg(long, env = "MENSA_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub(crate) url: String,

    /// Output directory
    #[arg(long, env = "MENSA_OUT_DIR", default_value = "docs")]
    pub(crate) out: PathBuf,
}

impl UpdateArgs {
    pub(crate) fn artifacts(&self) -> Artifacts {
        if !(self.json || self.meta || self.feed || self.today || self.index) {
            return Artifacts {
                json: true,
                meta: true,
                feed: true,
                today: false,
                index: true,
            };
        }
        Artifacts {
            json: self.json,
            meta: self.meta,
            feed: self.feed,
            today: self.today,
            index: self.index,
        }
    }

    pub(crate) fn options(&self) -> UpdateOptions {
        UpdateOptions {
            artifacts: self.artifacts(),
            parser: self.parser.clone(),
            canteen: self.canteen.clone(),
            base_url: self.url.clone(),
            out: self.out.clone(),
        }
    }
}

#[derive(Args, Debug)]
pub(crate) struct ServeArgs {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub(crate) addr: SocketAddr,

    /// File served at /full.xml
    #[arg(long, default_value = "full.xml")]
    pub(crate) file: PathBuf,
}
