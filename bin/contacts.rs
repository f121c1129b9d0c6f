use anyhow::Context;
use clap::{Arg, ArgAction, Command};
use contact_ingest::{export_contacts, ContactIngestor, DirectorySink, IngestConfig, SourceMode};
use std::path::PathBuf;
use std::time::Instant;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let matches = Command::new("contacts")
        .about("Fetch, normalize and optionally export a contact feed")
        .arg(Arg::new("url").long("url").help("Feed url (overrides the config file)"))
        .arg(Arg::new("config").long("config").value_parser(clap::value_parser!(PathBuf)))
        .arg(Arg::new("cache-dir").long("cache-dir").value_parser(clap::value_parser!(PathBuf)))
        .arg(Arg::new("relay").long("relay").help("Relay url template containing {url}"))
        .arg(Arg::new("local").long("local").help("Serve bundled sample data only").action(ArgAction::SetTrue))
        .arg(Arg::new("export-dir").long("export-dir").value_parser(clap::value_parser!(PathBuf)))
        .arg(Arg::new("filter").long("filter").help("Only contacts whose name, company or email contains this text").default_value(""))
        .get_matches();

    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => IngestConfig::load(path)?,
        None => IngestConfig::default(),
    };
    if let Some(url) = matches.get_one::<String>("url") {
        config.source_url = url.clone();
    }
    if let Some(dir) = matches.get_one::<PathBuf>("cache-dir") {
        config.cache_dir = dir.clone();
    }
    if let Some(relay) = matches.get_one::<String>("relay") {
        config.proxy_url_template = Some(relay.clone());
    }
    if matches.get_flag("local") {
        config.mode = SourceMode::Local;
    }
    if config.mode == SourceMode::Remote && config.source_url.is_empty() {
        anyhow::bail!("Provide --url <feed> or a config file with source_url");
    }

    let ingestor = ContactIngestor::new(&config).context("failed to build http client")?;
    let start = Instant::now();
    let outcome = ingestor.load(true).await;
    let elapsed = start.elapsed().as_secs_f64();

    let filter = matches
        .get_one::<String>("filter")
        .map(|f| f.to_lowercase())
        .unwrap_or_default();
    let selected: Vec<_> = outcome
        .contacts
        .iter()
        .filter(|c| {
            filter.is_empty()
                || [&c.name, &c.company, &c.email]
                    .iter()
                    .any(|v| v.to_lowercase().contains(&filter))
        })
        .cloned()
        .collect();

    println!(
        "source={} stage={:?} status={} contacts={} selected={}\nelapsed={:.2}s",
        if config.source_url.is_empty() { "(sample)" } else { config.source_url.as_str() },
        outcome.stage,
        outcome.status,
        outcome.contacts.len(),
        selected.len(),
        elapsed
    );

    if let Some(dir) = matches.get_one::<PathBuf>("export-dir") {
        let sink = DirectorySink::new(dir.clone());
        let name = export_contacts(&sink, &filter, &selected).await?;
        println!("exported={}", dir.join(name).display());
    }
    Ok(())
}
