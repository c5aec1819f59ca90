mod utils;

use std::error::Error as _;

use nhanes_dl::{FetchReason, Fetcher, RetrievalErrorKind, SurveyWave};
use utils::{
    ScriptedRetriever, codebook_url, codebook_xpt, float_column, mortality_payload, mortality_url,
    test_config, xpt_bytes,
};

const WAVE: SurveyWave = SurveyWave::Fourth;

fn demo() -> Vec<u8> {
    codebook_xpt(
        &[31127, 31128, 31129],
        &[("RIAGENDR", vec![Some(1.0), Some(2.0), None])],
    )
}

#[tokio::test]
async fn test_fetch_codebook() -> nhanes_dl::Result<()> {
    let url = codebook_url(WAVE, "DEMO_D");
    let retriever = ScriptedRetriever::new().body(&url, demo()).into_shared();
    let fetcher = Fetcher::new(retriever.clone(), &test_config());

    let codebook = fetcher.fetch_codebook(WAVE, "DEMO_D").await?;

    assert_eq!(codebook.key_values(), &[31127, 31128, 31129]);
    assert_eq!(codebook.column_names(), vec!["RIAGENDR"]);
    assert_eq!(float_column(&codebook, "RIAGENDR"), vec![Some(1.0), Some(2.0), None]);
    assert_eq!(retriever.calls(&url), 1);
    Ok(())
}

#[tokio::test]
async fn test_retry_after_timeout_succeeds() {
    let url = codebook_url(WAVE, "DEMO_D");
    let retriever = ScriptedRetriever::new()
        .fail(&url, RetrievalErrorKind::Timeout)
        .body(&url, demo())
        .into_shared();
    let fetcher = Fetcher::new(retriever.clone(), &test_config());

    let codebook = fetcher.fetch_codebook(WAVE, "DEMO_D").await.unwrap();

    assert_eq!(codebook.num_rows(), 3);
    assert_eq!(retriever.calls(&url), 2);
}

#[tokio::test]
async fn test_two_failures_give_retry_failed() {
    let url = codebook_url(WAVE, "DEMO_D");
    let retriever = ScriptedRetriever::new()
        .fail(&url, RetrievalErrorKind::NotFound)
        .fail(&url, RetrievalErrorKind::Timeout)
        .into_shared();
    let fetcher = Fetcher::new(retriever.clone(), &test_config());

    let err = fetcher.fetch_codebook(WAVE, "DEMO_D").await.unwrap_err();

    assert_eq!(err.reason, FetchReason::RetryFailed);
    assert_eq!(err.location, url);
    let last = err.source.as_deref().unwrap();
    assert_eq!(last.reason, FetchReason::Timeout);
    assert!(err.source().is_some());
    assert_eq!(retriever.calls(&url), 2);
}

#[tokio::test]
async fn test_error_status_is_retried_as_not_found() {
    let url = codebook_url(WAVE, "DEMO_D");
    let retriever = ScriptedRetriever::new()
        .fail(&url, RetrievalErrorKind::Status(503))
        .into_shared();
    let fetcher = Fetcher::new(retriever.clone(), &test_config());

    let err = fetcher.fetch_codebook(WAVE, "DEMO_D").await.unwrap_err();

    assert_eq!(err.reason, FetchReason::RetryFailed);
    assert_eq!(err.source.as_deref().unwrap().reason, FetchReason::NotFound);
    assert_eq!(retriever.calls(&url), 2);
}

#[tokio::test]
async fn test_missing_key_column_is_not_retried() {
    let url = codebook_url(WAVE, "DEMO_D");
    let payload = xpt_bytes(&["RIAGENDR"], &[vec![Some(1.0)]]);
    let retriever = ScriptedRetriever::new().body(&url, payload).into_shared();
    let fetcher = Fetcher::new(retriever.clone(), &test_config());

    let err = fetcher.fetch_codebook(WAVE, "DEMO_D").await.unwrap_err();

    assert_eq!(err.reason, FetchReason::NoKeyColumn);
    assert_eq!(retriever.calls(&url), 1);
    assert!(err.to_string().contains(&url));
}

#[tokio::test]
async fn test_duplicate_key_is_rejected() {
    let url = codebook_url(WAVE, "DEMO_D");
    let payload = codebook_xpt(&[5, 5], &[("A", vec![Some(1.0), Some(2.0)])]);
    let retriever = ScriptedRetriever::new().body(&url, payload).into_shared();
    let fetcher = Fetcher::new(retriever.clone(), &test_config());

    let err = fetcher.fetch_codebook(WAVE, "DEMO_D").await.unwrap_err();

    assert_eq!(err.reason, FetchReason::DuplicateKey);
    assert_eq!(retriever.calls(&url), 1);
}

#[tokio::test]
async fn test_key_that_is_not_an_integer_overflows() {
    let url = codebook_url(WAVE, "DEMO_D");
    let payload = xpt_bytes(&["SEQN"], &[vec![Some(1.5)], vec![Some(2.0)]]);
    let retriever = ScriptedRetriever::new().body(&url, payload).into_shared();
    let fetcher = Fetcher::new(retriever, &test_config());

    let err = fetcher.fetch_codebook(WAVE, "DEMO_D").await.unwrap_err();

    assert_eq!(err.reason, FetchReason::Overflow);
}

#[tokio::test]
async fn test_malformed_payload_is_not_retried() {
    let url = codebook_url(WAVE, "DEMO_D");
    let retriever = ScriptedRetriever::new()
        .body(&url, b"<html>maintenance</html>".to_vec())
        .into_shared();
    let fetcher = Fetcher::new(retriever.clone(), &test_config());

    let err = fetcher.fetch_codebook(WAVE, "DEMO_D").await.unwrap_err();

    assert_eq!(err.reason, FetchReason::Malformed);
    assert_eq!(retriever.calls(&url), 1);
}

#[tokio::test]
async fn test_excluded_codebook_is_never_retrieved() {
    let retriever = ScriptedRetriever::new().into_shared();
    let fetcher = Fetcher::new(retriever.clone(), &test_config());

    let err = fetcher.fetch_codebook(WAVE, "PAXMIN_D").await.unwrap_err();

    assert_eq!(err.reason, FetchReason::Excluded);
    assert_eq!(retriever.total_calls(), 0);
}

#[tokio::test]
async fn test_custom_deny_list() {
    let retriever = ScriptedRetriever::new().into_shared();
    let config = test_config().with_excluded_prefixes(["DEMO"]);
    let fetcher = Fetcher::new(retriever.clone(), &config);

    assert!(fetcher.is_excluded("DEMO_D"));
    assert!(!fetcher.is_excluded("PAXMIN_D"));
    let err = fetcher.fetch_codebook(WAVE, "DEMO_D").await.unwrap_err();
    assert_eq!(err.reason, FetchReason::Excluded);
    assert_eq!(retriever.total_calls(), 0);
}

#[tokio::test]
async fn test_fetch_mortality() -> nhanes_dl::Result<()> {
    let url = mortality_url(WAVE);
    let payload = mortality_payload(&[(31127, 0, 120), (31128, 1, 45)]);
    let retriever = ScriptedRetriever::new().body(&url, payload).into_shared();
    let fetcher = Fetcher::new(retriever, &test_config());

    let mortality = fetcher.fetch_mortality(WAVE).await?;

    assert_eq!(mortality.key_values(), &[31127, 31128]);
    assert_eq!(mortality.num_columns(), 7);
    assert_eq!(float_column(&mortality, "MORTSTAT"), vec![Some(0.0), Some(1.0)]);
    assert_eq!(float_column(&mortality, "PERMTH_EXM"), vec![Some(120.0), Some(45.0)]);
    assert_eq!(float_column(&mortality, "UCOD_LEADING"), vec![None, None]);
    Ok(())
}

#[tokio::test]
async fn test_missing_mortality_is_not_retried() {
    let url = mortality_url(WAVE);
    let retriever = ScriptedRetriever::new().into_shared();
    let fetcher = Fetcher::new(retriever.clone(), &test_config());

    let err = fetcher.fetch_mortality(WAVE).await.unwrap_err();

    assert_eq!(err.reason, FetchReason::NotFound);
    assert_eq!(retriever.calls(&url), 1);
}

#[test]
fn test_source_locations() {
    let fetcher = Fetcher::new(ScriptedRetriever::new(), &nhanes_dl::SurveyConfig::default());
    assert_eq!(
        fetcher.codebook_location(SurveyWave::Fourth, "DEMO_D"),
        "https://wwwn.cdc.gov/Nchs/Nhanes/2005-2006/DEMO_D.XPT"
    );
    assert_eq!(
        fetcher.mortality_location(SurveyWave::First),
        "https://ftp.cdc.gov/pub/Health_Statistics/NCHS/datalinkage/linked_mortality/NHANES_1999_2000_MORT_2015_PUBLIC.dat"
    );
}
