//! End-to-end verifier tests.

use crate::{
    AstraError, Layer, LinearConstraints, LinearLayer, Network, ReluLayer, SafetyProperty,
    SearchConfig, SearchOrder, StarVerifier, Verdict,
};
use ndarray::{arr1, arr2, Array1};

/// 2-2-1 network with two activation layers:
/// y = 2·relu(relu(x0 - x1) + relu(x0 + x1)) - 1.
///
/// Over [-1, 1]^2 the inner sum ranges over [0, 2], so y ranges over [-1, 3].
fn deep_network() -> Network {
    let mut net = Network::new();
    net.add_layer(Layer::Linear(
        LinearLayer::new(arr2(&[[1.0, -1.0], [1.0, 1.0]]), arr1(&[0.0, 0.0])).unwrap(),
    ));
    net.add_layer(Layer::Relu(ReluLayer {
        identifier: "relu_0".to_string(),
    }));
    net.add_layer(Layer::Linear(
        LinearLayer::new(arr2(&[[1.0, 1.0]]), arr1(&[0.0])).unwrap(),
    ));
    net.add_layer(Layer::Relu(ReluLayer {
        identifier: "relu_1".to_string(),
    }));
    net.add_layer(Layer::Linear(
        LinearLayer::new(arr2(&[[2.0]]), arr1(&[-1.0])).unwrap(),
    ));
    net
}

fn unit_box() -> LinearConstraints {
    LinearConstraints::new(
        arr2(&[[1.0, 0.0], [-1.0, 0.0], [0.0, 1.0], [0.0, -1.0]]),
        arr1(&[1.0, 1.0, 1.0, 1.0]),
    )
    .unwrap()
}

/// Unsafe region `y >= threshold` as a single disjunct.
fn output_at_least(threshold: f64) -> LinearConstraints {
    LinearConstraints::new(arr2(&[[-1.0]]), arr1(&[-threshold])).unwrap()
}

/// Unsafe region `y <= threshold` as a single disjunct.
fn output_at_most(threshold: f64) -> LinearConstraints {
    LinearConstraints::new(arr2(&[[1.0]]), arr1(&[threshold])).unwrap()
}

#[test]
fn unreachable_region_is_verified() {
    let net = deep_network();
    let property = SafetyProperty::new(unit_box(), vec![output_at_least(4.0)]).unwrap();
    let outcome = StarVerifier::default().verify(&net, &property).unwrap();
    assert_eq!(outcome.verdict, Verdict::Verified);
    assert_eq!(outcome.unknown_branches, 0);
    assert!(outcome.stars_explored >= 1);
}

#[test]
fn lower_unreachable_region_is_verified() {
    // y never drops below -1.
    let net = deep_network();
    let property = SafetyProperty::new(unit_box(), vec![output_at_most(-2.0)]).unwrap();
    let outcome = StarVerifier::default().verify(&net, &property).unwrap();
    assert_eq!(outcome.verdict, Verdict::Verified);
}

#[test]
fn reachable_region_is_falsified_with_a_valid_counterexample() {
    let net = deep_network();
    let property = SafetyProperty::new(unit_box(), vec![output_at_least(2.0)]).unwrap();
    let outcome = StarVerifier::default().verify(&net, &property).unwrap();

    let Verdict::Falsified {
        counterexample,
        output,
    } = outcome.verdict
    else {
        panic!("expected a violation, got {:?}", outcome.verdict);
    };
    let input = Array1::from(counterexample);
    assert!(property.input.contains(&input, 1e-6));
    let executed = net.execute(&input).unwrap();
    assert!(property.output_is_unsafe(&executed, 1e-6));
    // The reported output matches a fresh execution.
    assert!((executed[0] - output[0]).abs() < 1e-9);
}

#[test]
fn disjunction_is_falsified_through_its_reachable_disjunct() {
    let net = deep_network();
    let property = SafetyProperty::new(
        unit_box(),
        vec![output_at_most(-2.0), output_at_least(2.0)],
    )
    .unwrap();
    let outcome = StarVerifier::default().verify(&net, &property).unwrap();
    assert!(outcome.verdict.is_falsified());
}

#[test]
fn stable_network_is_verified_without_branching() {
    // Over [1, 2]^2 the single activation is positively stable.
    let mut net = Network::new();
    net.add_layer(Layer::Linear(
        LinearLayer::new(arr2(&[[1.0, 1.0]]), arr1(&[0.0])).unwrap(),
    ));
    net.add_layer(Layer::Relu(ReluLayer {
        identifier: "relu_0".to_string(),
    }));
    net.add_layer(Layer::Linear(
        LinearLayer::new(arr2(&[[1.0]]), arr1(&[0.0])).unwrap(),
    ));

    let input = LinearConstraints::new(
        arr2(&[[1.0, 0.0], [-1.0, 0.0], [0.0, 1.0], [0.0, -1.0]]),
        arr1(&[2.0, -1.0, 2.0, -1.0]),
    )
    .unwrap();
    let property = SafetyProperty::new(input, vec![output_at_most(1.0)]).unwrap();
    let outcome = StarVerifier::default().verify(&net, &property).unwrap();
    assert_eq!(outcome.verdict, Verdict::Verified);
}

#[test]
fn search_orders_agree_on_the_verdict() {
    let net = deep_network();
    for threshold in [-2.0, 1.5, 4.0] {
        let property =
            SafetyProperty::new(unit_box(), vec![output_at_least(threshold)]).unwrap();
        let dfs = StarVerifier::new(SearchConfig {
            order: SearchOrder::DepthFirst,
            ..SearchConfig::default()
        })
        .verify(&net, &property)
        .unwrap();
        let bfs = StarVerifier::new(SearchConfig {
            order: SearchOrder::BreadthFirst,
            ..SearchConfig::default()
        })
        .verify(&net, &property)
        .unwrap();
        assert_eq!(
            dfs.verdict.is_verified(),
            bfs.verdict.is_verified(),
            "threshold {}",
            threshold
        );
        assert_eq!(dfs.verdict.is_falsified(), bfs.verdict.is_falsified());
    }
}

#[test]
fn star_budget_exhaustion_yields_unknown() {
    let net = deep_network();
    let property = SafetyProperty::new(unit_box(), vec![output_at_least(2.0)]).unwrap();
    let config = SearchConfig {
        max_stars: 1,
        ..SearchConfig::default()
    };
    let outcome = StarVerifier::new(config).verify(&net, &property).unwrap();
    match outcome.verdict {
        Verdict::Unknown { reason } => assert!(reason.contains("budget")),
        other => panic!("expected unknown, got {:?}", other),
    }
}

#[test]
fn lp_failures_degrade_to_unknown_not_verified() {
    let net = deep_network();
    // Reachable violation, but a zero pivot budget makes every feasibility
    // query fail. The verdict must not claim safety.
    let property = SafetyProperty::new(unit_box(), vec![output_at_least(2.0)]).unwrap();
    let config = SearchConfig {
        lp_pivot_budget: 0,
        ..SearchConfig::default()
    };
    let outcome = StarVerifier::new(config).verify(&net, &property).unwrap();
    match outcome.verdict {
        Verdict::Unknown { .. } => assert!(outcome.unknown_branches > 0),
        other => panic!("expected unknown, got {:?}", other),
    }
}

#[test]
fn property_dimension_mismatch_is_a_structural_error() {
    let net = deep_network();
    // Three-dimensional input region against a two-input network.
    let input = LinearConstraints::new(
        arr2(&[
            [1.0, 0.0, 0.0],
            [-1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, -1.0, 0.0],
            [0.0, 0.0, 1.0],
            [0.0, 0.0, -1.0],
        ]),
        arr1(&[1.0; 6]),
    )
    .unwrap();
    let property = SafetyProperty::new(input, vec![output_at_least(0.0)]).unwrap();
    assert!(matches!(
        StarVerifier::default().verify(&net, &property),
        Err(AstraError::DimensionMismatch { .. })
    ));
}

#[test]
fn unbounded_input_region_is_a_structural_error() {
    let net = deep_network();
    let input = LinearConstraints::new(arr2(&[[1.0, 0.0], [0.0, 1.0]]), arr1(&[1.0, 1.0])).unwrap();
    let property = SafetyProperty::new(input, vec![output_at_least(0.0)]).unwrap();
    assert!(matches!(
        StarVerifier::default().verify(&net, &property),
        Err(AstraError::InvalidProperty(_))
    ));
}

#[test]
fn malformed_network_is_rejected_before_searching() {
    let mut net = Network::new();
    net.add_layer(Layer::Relu(ReluLayer {
        identifier: "relu_0".to_string(),
    }));
    let property = SafetyProperty::new(unit_box(), vec![output_at_least(0.0)]).unwrap();
    assert!(matches!(
        StarVerifier::default().verify(&net, &property),
        Err(AstraError::UnsupportedTopology(_))
    ));
}

#[test]
fn outcome_statistics_are_populated() {
    let net = deep_network();
    let property = SafetyProperty::new(unit_box(), vec![output_at_least(4.0)]).unwrap();
    let outcome = StarVerifier::default().verify(&net, &property).unwrap();
    assert!(outcome.stars_explored >= 1);
    assert!(outcome.max_depth_reached >= (1, 0));
    assert!(outcome.time_elapsed.as_nanos() > 0);
}

#[test]
fn config_deserializes_with_defaults() {
    let config: SearchConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config.order, SearchOrder::DepthFirst);
    assert_eq!(config.max_stars, 10_000);
    assert_eq!(config.lp_pivot_budget, 50_000);

    let config: SearchConfig =
        serde_json::from_str(r#"{"order":"BreadthFirst","max_stars":64}"#).unwrap();
    assert_eq!(config.order, SearchOrder::BreadthFirst);
    assert_eq!(config.max_stars, 64);
}
