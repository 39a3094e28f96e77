use clap::Parser;

#[derive(Debug, Parser)]
#[clap(version, about)]
pub struct Args {
    /// Path to the server's YAML config file.
    #[arg(short, long, default_value = "/etc/rdhcpd.yml")]
    pub cfg: String,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
