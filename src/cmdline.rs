//! CLI flags, overlaid with environment variables in `config::Config::from_cli`
//! (spec.md §6 "Environment / config").

use clap::Parser;

#[derive(Parser)]
#[clap(name = "watchparty-relay")]
pub struct Opts {
    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Parser)]
pub enum SubCommand {
    Run(Run),
}

#[derive(Parser)]
pub struct Run {
    #[clap(long)]
    pub cert_path: Option<String>,
    #[clap(long)]
    pub key_path: Option<String>,
    #[clap(long, default_value = "0.0.0.0:8080")]
    pub listen_addr: String,
    #[clap(long, default_value = "127.0.0.1")]
    pub rtc_ip: String,
    #[clap(long)]
    pub rtc_announce_ip: Option<String>,
    #[clap(long, default_value = "40000")]
    pub rtc_port: u16,
    #[clap(long, default_value = "1")]
    pub num_workers: usize,
}
