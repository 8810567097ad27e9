use std::fs;

use phishnet_core::ForestParams;
use phishnet_ml::extract::{FetchError, PageFetcher, RegistrationLookup};
use phishnet_ml::training::run_training_pipeline;
use phishnet_ml::whois::WhoisError;
use phishnet_ml::{
    PhishingPredictor, ScanHistory, TrainingError, TrainingSettings, UrlFeatureExtractor,
    FEATURE_COUNT,
};
use time::{Duration, OffsetDateTime};

/// Serves a login form with off-site links for suspicious hosts and a plain
/// page for everything else.
struct StubPages;

impl PageFetcher for StubPages {
    fn fetch(&self, url: &str) -> Result<String, FetchError> {
        if url.contains("offline") {
            return Err(FetchError::Other("connection refused".into()));
        }
        if url.contains("secure-") {
            Ok(r#"<form action="https://collector.example/steal"></form>
                  <a href="https://bank.example/">bank</a>
                  <a href="https://other.example/">other</a>
                  <iframe src="https://ads.example/"></iframe>"#
                .into())
        } else {
            Ok(r#"<a href="/about">about</a><p>welcome</p>"#.into())
        }
    }
}

/// Suspicious domains were registered last week, the rest years ago.
struct StubRegistry;

impl RegistrationLookup for StubRegistry {
    fn creation_dates(&self, domain: &str) -> Result<Vec<OffsetDateTime>, WhoisError> {
        let age = if domain.starts_with("secure-") {
            Duration::days(7)
        } else {
            Duration::days(3650)
        };
        Ok(vec![OffsetDateTime::now_utc() - age])
    }
}

fn extractor() -> UrlFeatureExtractor {
    UrlFeatureExtractor::with_backends(StubPages, StubRegistry)
}

fn dataset() -> String {
    let mut csv = String::from("url,is_phishing\n");
    for i in 0..30 {
        csv.push_str(&format!(
            "http://login.secure-update{i}.com/verify/account?id={i}{i},1\n"
        ));
        csv.push_str(&format!("https://www.shop{i}.org/,0\n"));
    }
    csv
}

fn settings() -> TrainingSettings {
    TrainingSettings {
        forest: ForestParams {
            trees: 15,
            ..ForestParams::default()
        },
        ..TrainingSettings::default()
    }
}

#[test]
fn trained_model_round_trips_through_disk_and_explains_predictions() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let dataset_path = dir.path().join("data/phishing_dataset.csv");
    fs::create_dir_all(dataset_path.parent().unwrap()).unwrap();
    fs::write(&dataset_path, dataset()).unwrap();
    let model_path = dir.path().join("model/phishing_model.json");

    let extractor = extractor();
    let outcome =
        run_training_pipeline(&dataset_path, &model_path, &extractor, &settings()).unwrap();
    assert_eq!(outcome.kept, 60);
    assert_eq!(outcome.skipped, 0);
    assert!(outcome.report.is_some());
    assert!(model_path.exists());

    let predictor = PhishingPredictor::load(&model_path).unwrap();
    assert_eq!(predictor.metadata().features.len(), FEATURE_COUNT);

    let mut history = ScanHistory::default();
    for (url, expected) in [
        ("http://login.secure-payments.com/verify/account?id=99", true),
        ("https://www.bakery.org/", false),
    ] {
        let vector = extractor.extract(url);
        assert!(vector.is_complete(), "{url}: {:?}", vector.unavailable_features());
        let result = predictor.predict(&vector);
        assert_eq!(result.label, expected, "{url}");
        assert!(
            (result.base_value + result.attribution.total() - result.phishing_probability).abs()
                < 1e-9
        );
        history.record(url, &result, OffsetDateTime::now_utc());
    }

    let newest = history.iter().next().unwrap();
    assert_eq!(newest.url, "https://www.bakery.org/");
}

#[test]
fn dataset_without_complete_rows_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let dataset_path = dir.path().join("offline.csv");
    fs::write(
        &dataset_path,
        "url,is_phishing\nhttps://offline.example.com/,1\nhttp://10.0.0.1/login,0\n",
    )
    .unwrap();
    let model_path = dir.path().join("model.json");

    let result = run_training_pipeline(&dataset_path, &model_path, &extractor(), &settings());
    assert!(matches!(
        result,
        Err(TrainingError::EmptyTrainingMatrix { total: 2 })
    ));
    assert!(!model_path.exists());
}

#[test]
fn missing_dataset_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = run_training_pipeline(
        &dir.path().join("absent.csv"),
        &dir.path().join("model.json"),
        &extractor(),
        &settings(),
    );
    assert!(matches!(result, Err(TrainingError::Dataset(_))));
}
