mod utils;

use std::sync::Arc;

use nhanes_dl::config::BatchPolicy;
use nhanes_dl::{
    CachedSource, CodebookRequest, DataPageCatalog, FetchReason, Fetcher, Pipeline,
    RetrievalErrorKind, SurveyWave, TableKey,
};
use nhanes_dl::pipeline::CodebookCatalog;
use nhanes_dl::pipeline::catalog::DATA_PAGE_COMPONENTS;
use utils::{
    ScriptedRetriever, codebook_url, codebook_xpt, data_page, data_page_url, float_column,
    mortality_payload, mortality_url, test_config,
};

const D: SurveyWave = SurveyWave::Fourth;
const E: SurveyWave = SurveyWave::Fifth;

/// Two waves with DEMO and BMX each; BMX_E is missing upstream
fn scripted() -> Arc<ScriptedRetriever> {
    ScriptedRetriever::new()
        .body(
            codebook_url(D, "DEMO_D"),
            codebook_xpt(&[1, 2, 3], &[("RIAGENDR", vec![Some(1.0), Some(2.0), Some(1.0)])]),
        )
        .body(
            codebook_url(D, "BMX_D"),
            codebook_xpt(&[2, 3], &[("BMXWT", vec![Some(70.0), Some(80.0)])]),
        )
        .body(
            codebook_url(E, "DEMO_E"),
            codebook_xpt(&[10, 11], &[("RIAGENDR", vec![Some(2.0), Some(2.0)])]),
        )
        .fail(codebook_url(E, "BMX_E"), RetrievalErrorKind::NotFound)
        .body(mortality_url(D), mortality_payload(&[(1, 0, 100), (3, 1, 20), (4, 0, 90)]))
        .body(mortality_url(E), mortality_payload(&[(10, 0, 60)]))
        .into_shared()
}

fn requests() -> Vec<CodebookRequest> {
    vec![
        CodebookRequest::from_stems(E, ["DEMO", "BMX"]),
        CodebookRequest::from_stems(D, ["DEMO", "BMX"]),
    ]
}

#[tokio::test]
async fn test_codebooks_joins_one_wave() -> nhanes_dl::Result<()> {
    let pipeline = Pipeline::new(Fetcher::new(scripted(), &test_config()), &test_config());

    let joined = pipeline
        .codebooks(&CodebookRequest::from_stems(D, ["DEMO", "BMX"]))
        .await?;

    assert_eq!(joined.key_values(), &[1, 2, 3]);
    // request order is alphabetical
    assert_eq!(joined.column_names(), vec!["BMXWT", "RIAGENDR"]);
    assert_eq!(float_column(&joined, "BMXWT"), vec![None, Some(70.0), Some(80.0)]);
    Ok(())
}

#[tokio::test]
async fn test_lenient_policy_drops_failed_codebooks() -> nhanes_dl::Result<()> {
    let retriever = scripted();
    let pipeline = Pipeline::new(Fetcher::new(retriever.clone(), &test_config()), &test_config());

    let joined = pipeline
        .codebooks(&CodebookRequest::from_stems(E, ["DEMO", "BMX"]))
        .await?;

    assert_eq!(joined.key_values(), &[10, 11]);
    assert_eq!(joined.column_names(), vec!["RIAGENDR"]);
    // the missing table was retried once by the fetcher
    assert_eq!(retriever.calls(&codebook_url(E, "BMX_E")), 2);
    Ok(())
}

#[tokio::test]
async fn test_strict_policy_returns_first_failure() {
    let config = test_config().with_batch_policy(BatchPolicy::Strict);
    let pipeline = Pipeline::new(Fetcher::new(scripted(), &config), &config);

    let err = pipeline
        .codebooks(&CodebookRequest::from_stems(E, ["DEMO", "BMX"]))
        .await
        .unwrap_err();

    assert_eq!(err.fetch_reason(), Some(FetchReason::RetryFailed));
}

#[tokio::test]
async fn test_codebooks_for_waves_appends_in_wave_order() -> nhanes_dl::Result<()> {
    let pipeline = Pipeline::new(Fetcher::new(scripted(), &test_config()), &test_config());

    let assembled = pipeline.codebooks_for_waves(&requests()).await?;

    assert_eq!(assembled.key_values(), &[1, 2, 3, 10, 11]);
    assert_eq!(assembled.column_names(), vec!["BMXWT", "RIAGENDR"]);
    assert_eq!(
        float_column(&assembled, "BMXWT"),
        vec![None, Some(70.0), Some(80.0), None, None]
    );
    Ok(())
}

#[tokio::test]
async fn test_codebooks_with_mortality_for_waves() -> nhanes_dl::Result<()> {
    let pipeline = Pipeline::new(Fetcher::new(scripted(), &test_config()), &test_config());

    let linked = pipeline.codebooks_with_mortality_for_waves(&requests()).await?;

    assert_eq!(linked.key_values(), &[1, 2, 3, 4, 10, 11]);
    assert_eq!(linked.num_columns(), 2 + 7);
    assert_eq!(
        float_column(&linked, "MORTSTAT"),
        vec![Some(0.0), None, Some(1.0), Some(0.0), Some(0.0), None]
    );
    assert_eq!(
        float_column(&linked, "RIAGENDR"),
        vec![Some(1.0), Some(2.0), Some(1.0), None, Some(2.0), Some(2.0)]
    );
    Ok(())
}

#[tokio::test]
async fn test_codebook_with_mortality() -> nhanes_dl::Result<()> {
    let pipeline = Pipeline::new(Fetcher::new(scripted(), &test_config()), &test_config());

    let linked = pipeline.codebook_with_mortality(D, "BMX_D").await?;

    assert_eq!(linked.key_values(), &[1, 2, 3, 4]);
    assert_eq!(float_column(&linked, "BMXWT"), vec![None, Some(70.0), Some(80.0), None]);
    Ok(())
}

#[tokio::test]
async fn test_mortality_for_waves_skips_missing_wave() -> nhanes_dl::Result<()> {
    let pipeline = Pipeline::new(Fetcher::new(scripted(), &test_config()), &test_config());

    let mortality = pipeline
        .mortality_for_waves(&[D, SurveyWave::Twelfth, E])
        .await?;

    assert_eq!(mortality.key_values(), &[1, 3, 4, 10]);
    Ok(())
}

#[tokio::test]
async fn test_all_waves_with_mortality() -> nhanes_dl::Result<()> {
    let config = test_config();
    let pipeline = Pipeline::new(CachedSource::new(scripted(), &config), &config);

    let linked = pipeline
        .all_waves_with_mortality(&|wave: SurveyWave| match wave {
            SurveyWave::Fourth => vec![wave.codebook_name("DEMO")],
            _ => Vec::new(),
        })
        .await?;

    assert_eq!(linked.key_values(), &[1, 2, 3, 4]);
    assert_eq!(linked.num_columns(), 1 + 7);
    assert!(pipeline.source().cache().mortality_location(D).exists());
    Ok(())
}

/// Assembling after a prefetch reads the cache and never refetches failures
#[tokio::test]
async fn test_assembly_after_prefetch_does_not_refetch() -> nhanes_dl::Result<()> {
    let config = test_config();
    let retriever = scripted();
    let source = CachedSource::new(retriever.clone(), &config);

    let prefetched = source.prefetch(&requests()).await;
    assert_eq!(
        prefetched.failed_keys().collect::<Vec<_>>(),
        vec![&TableKey::codebook(E, "BMX_E")]
    );

    let pipeline = Pipeline::new(source.cache_only(), &config);
    let linked = pipeline.codebooks_with_mortality_for_waves(&requests()).await?;

    assert_eq!(linked.key_values(), &[1, 2, 3, 4, 10, 11]);
    // the first attempt and its single retry, both during prefetch
    assert_eq!(retriever.calls(&codebook_url(E, "BMX_E")), 2);
    assert_eq!(retriever.calls(&codebook_url(D, "DEMO_D")), 1);
    Ok(())
}

/// Listing pages for the fourth wave; every other wave's pages are missing
fn with_data_pages(retriever: ScriptedRetriever) -> ScriptedRetriever {
    DATA_PAGE_COMPONENTS
        .iter()
        .fold(retriever, |retriever, &component| {
            let names: &[&str] = match component {
                "Demographics" => &["DEMO_D", "PAXMIN_D"],
                "Examination" => &["BMX_D"],
                _ => &[],
            };
            retriever.body(data_page_url(D, component), data_page(D, names))
        })
}

#[tokio::test]
async fn test_data_page_catalog_lists_wave() -> nhanes_dl::Result<()> {
    let config = test_config();
    let catalog = DataPageCatalog::new(with_data_pages(ScriptedRetriever::new()), &config);

    let names = catalog.codebook_names(D).await?;

    // excluded names are dropped
    assert_eq!(names, vec!["BMX_D", "DEMO_D"]);
    assert!(catalog.codebook_names(E).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_all_waves_with_discovered_codebooks() -> nhanes_dl::Result<()> {
    let config = test_config();
    let retriever = scripted();
    let pages = Arc::new(with_data_pages(ScriptedRetriever::new()));
    let catalog = DataPageCatalog::new(pages, &config);
    let pipeline = Pipeline::new(Fetcher::new(retriever.clone(), &config), &config);

    let linked = pipeline.all_waves_with_mortality(&catalog).await?;

    assert_eq!(linked.key_values(), &[1, 2, 3, 4]);
    assert_eq!(linked.num_columns(), 2 + 7);
    assert_eq!(retriever.calls(&codebook_url(D, "PAXMIN_D")), 0);
    Ok(())
}

#[tokio::test]
async fn test_strict_policy_fails_on_unlisted_wave() {
    let config = test_config().with_batch_policy(BatchPolicy::Strict);
    let catalog = DataPageCatalog::new(with_data_pages(ScriptedRetriever::new()), &config);
    let pipeline = Pipeline::new(Fetcher::new(scripted(), &config), &config);

    let err = pipeline.all_waves_with_mortality(&catalog).await.unwrap_err();

    assert_eq!(err.fetch_reason(), Some(FetchReason::NotFound));
}
