use logregr::config::{Method, RegressionConfig};
use logregr::driver::{FitOptions, Observation, fit, fold_partition};
use logregr::state::{FitStatus, TransitionState};
use logregr::{CgState, IrlsState, LogisticFitResult};
use ndarray::array;

fn rows() -> Vec<Observation> {
    vec![
        Observation::new(true, array![1.0, 0.5]),
        Observation::new(false, array![1.0, -1.5]),
        Observation::new(true, array![1.0, 2.0]),
        Observation::new(false, array![1.0, 0.2]),
        Observation::new(true, array![1.0, -0.3]),
    ]
}

#[test]
fn finalized_state_survives_a_json_round_trip() {
    let state = fold_partition::<CgState>(&rows(), None)
        .unwrap()
        .finalize()
        .unwrap();
    let json = serde_json::to_string(&state).unwrap();
    let restored: CgState = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, state);

    // A restored state seeds the next iteration exactly like the original.
    let next_from_original = fold_partition(&rows(), Some(&state)).unwrap();
    let next_from_restored: CgState = fold_partition(&rows(), Some(&restored)).unwrap();
    assert_eq!(next_from_original, next_from_restored);
}

#[test]
fn fit_result_serializes_status_by_name() {
    let report = fit::<IrlsState>(&[rows()], &FitOptions::default()).unwrap();
    let output = report.output.unwrap();

    let value = serde_json::to_value(&output).unwrap();
    assert_eq!(value["status"], "Completed");
    assert_eq!(value["coef"]["dim"][0], 2);

    let restored: LogisticFitResult = serde_json::from_value(value).unwrap();
    assert_eq!(restored.status, FitStatus::Completed);
    assert_eq!(restored.coef, output.coef);
}

#[test]
fn config_file_uses_lowercase_method_names() {
    let config = RegressionConfig {
        method: Method::Igd,
        ..RegressionConfig::default()
    };
    let text = toml::to_string_pretty(&config).unwrap();
    assert!(text.contains("method = \"igd\""));
    let restored: RegressionConfig = toml::from_str(&text).unwrap();
    assert_eq!(restored, config);
}
