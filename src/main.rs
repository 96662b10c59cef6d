use cnae_prospector::{Config, SearchService};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    let mut args = std::env::args().skip(1);
    let cnae = match args.next() {
        Some(c) => c,
        None => {
            eprintln!("Usage: cnae-prospector <cnae> [uf] [cidade] [limit]");
            std::process::exit(2);
        }
    };
    let uf = args.next();
    let cidade = args.next();
    let limit: usize = args.next().and_then(|v| v.parse().ok()).unwrap_or(20);

    let service = SearchService::new(&config);
    let results = service
        .search_by_cnae(&cnae, uf.as_deref(), cidade.as_deref(), limit)
        .await?;

    tracing::info!("Found {} companies", results.len());
    println!("{}", serde_json::to_string_pretty(results.records())?);

    Ok(())
}
