use clap::Parser;
use log::debug;

use cardsearch::Opts;
use cardsearch::cli::SubCommandExtend;
use cardsearch::config::SubCommand;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();
    debug!("{:?}", opts);

    match &opts.subcmd {
        SubCommand::Build(config) => config.run(&opts).await,
        SubCommand::Match(config) => config.run(&opts).await,
        SubCommand::Multi(config) => config.run(&opts).await,
        SubCommand::Clean(config) => config.run(&opts).await,
    }
}
