//! `mensa`: regenerates `OpenMensa` feeds and meta documents for all parsers and serves a static feed.

mod cli;
mod index;
mod serve;
mod update;

use std::sync::Arc;

use anyhow::bail;
use clap::Parser;
use mensa_core::{MensaService, ParserPlugin, ParserRegistry, PortError, build_client};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();

    match Cli::parse().command {
        Command::Update(args) => {
            let registry = Arc::new(ParserRegistry::new(plugins()?));
            let service = MensaService::new(registry, args.url.clone());
            let errors = update::run(&service, &args.options()).await?;
            if !errors.is_empty() {
                bail!("{} parser errors recorded", errors.len() / 2);
            }
            info!("update finished");
        }
        Command::Serve(args) => serve::run(args.addr, args.file).await?,
    }
    Ok(())
}

fn plugins() -> Result<Vec<ParserPlugin>, PortError> {
    let client = build_client(None)?;
    Ok(vec![
        mensa_provider_eurest::plugin(client.clone())?,
        mensa_provider_greifswald::plugin(client.clone())?,
        mensa_provider_inetmenue::plugin(client.clone())?,
        mensa_provider_kaiserslautern::plugin(client.clone())?,
        mensa_provider_koeln::plugin(client.clone())?,
        mensa_provider_luxembourg::plugin(client.clone())?,
        mensa_provider_mampf1a::plugin(client.clone())?,
        mensa_provider_markas::plugin(client.clone())?,
        mensa_provider_mensenat::plugin(client.clone())?,
        mensa_provider_wuerzburg::plugin(client.clone())?,
        mensa_provider_wuwien::plugin(client)?,
    ])
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn every_parser_is_registered_once() {
        let plugins = plugins().expect("registries load");
        let ids: BTreeSet<String> = plugins.iter().map(|plugin| plugin.meta.id.0.clone()).collect();
        assert_eq!(ids.len(), 11);
        assert!(ids.contains("koeln"));
        assert!(ids.contains("wuwien"));
        assert!(plugins.iter().all(|plugin| !plugin.port.references().is_empty()));
    }
}
