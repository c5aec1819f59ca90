use std::time::Instant;

use anyhow::{Context, anyhow, bail};
use log::info;
use nhanes_dl::utils::logging::console::{print_sample_rows, print_schema_info, print_table_summary};
use nhanes_dl::utils::logging::{create_spinner, finish_progress_bar};
use nhanes_dl::{CachedSource, CodebookRequest, Pipeline, ReqwestRetriever, SurveyConfig, SurveyWave};

#[global_allocator]
static ALLOC: snmalloc_rs::SnMalloc = snmalloc_rs::SnMalloc;

const USAGE: &str = "usage: nhanes-dl <start-year>... -- <codebook-stem>...";

/// Split `2005 2007 -- DEMO BMX` into waves and codebook stems
fn parse_args(args: &[String]) -> anyhow::Result<(Vec<SurveyWave>, Vec<String>)> {
    let Some(split) = args.iter().position(|a| a == "--") else {
        bail!(USAGE);
    };
    let waves = args[..split]
        .iter()
        .map(|a| a.parse::<SurveyWave>().map_err(|e| anyhow!("invalid wave {a}: {e}")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let stems = args[split + 1..].to_vec();

    if waves.is_empty() || stems.is_empty() {
        bail!(USAGE);
    }
    Ok((waves, stems))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (waves, stems) = parse_args(&args)?;

    // Assembly reads the cache only, so mortality has to be cached up front
    let config = SurveyConfig::from_env()
        .context("reading configuration")?
        .with_prefetch_mortality(true);
    info!("Caching tables under {}", config.cache_dir.display());

    let requests: Vec<CodebookRequest> = waves
        .iter()
        .map(|&wave| CodebookRequest::from_stems(wave, &stems))
        .collect();

    let retriever = ReqwestRetriever::new(config.timeout()).context("building HTTP client")?;
    let source = CachedSource::new(retriever, &config);

    let prefetched = source.prefetch(&requests).await;
    if !prefetched.is_complete() {
        for key in prefetched.failed_keys() {
            log::warn!("Not cached: {key}");
        }
    }

    let start = Instant::now();
    let spinner = create_spinner(Some("Linking codebooks with mortality"));
    let pipeline = Pipeline::new(source.cache_only(), &config);
    let assembled = pipeline
        .codebooks_with_mortality_for_waves(&requests)
        .await
        .context("assembling survey tables")?;
    finish_progress_bar(&spinner, Some("Done"));

    print_table_summary(&assembled, start.elapsed());
    print_schema_info(&assembled);
    print_sample_rows(&assembled, 5);

    Ok(())
}
