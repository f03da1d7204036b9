use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Directory whose files are packed into the image
    #[arg(long, short)]
    pub source: PathBuf,

    /// Image file to create
    #[arg(long, short = 'O')]
    pub image: PathBuf,

    /// Image size in sectors
    #[arg(long, default_value_t = 16 * 1024)]
    pub sectors: u32,
}
