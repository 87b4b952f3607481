use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the `.torrent` metainfo file to download.
    pub input: PathBuf,

    /// Path the assembled file is written to.
    pub output: PathBuf,
}
