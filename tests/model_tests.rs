use ndarray::{Array4, Axis};
use pur_hpo::data::Dataset;
use pur_hpo::{Adam, Device, Error, Model, NetConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn small_net() -> NetConfig {
    NetConfig {
        input_shape: (1, 8, 8),
        conv1_filters: 2,
        conv2_filters: 4,
        kernel_size: 3,
        pool_size: 2,
        hidden: 8,
        classes: 3,
        conv_dropout: 0.25,
        hidden_dropout: 0.5,
    }
}

#[test]
fn test_parameter_count_accuracy() {
    let test_cases = vec![
        // conv1: 2 * (1 * 3 * 3) + 2 = 20
        // conv2: 4 * (2 * 3 * 3) + 4 = 76
        // fc1:   8 * (4 * 2 * 2) + 8 = 136
        // fc2:   3 * 8 + 3 = 27
        (small_net(), 259),
        // conv1: 32 * 9 + 32 = 320
        // conv2: 64 * 288 + 64 = 18_496
        // fc1:   128 * 9216 + 128 = 1_179_776
        // fc2:   10 * 128 + 10 = 1_290
        (NetConfig::mnist(), 1_199_882),
    ];

    for (net, expected_params) in test_cases {
        let mut rng = StdRng::seed_from_u64(1);
        let model = Model::new(&net, &mut rng).unwrap();
        assert_eq!(
            model.parameter_count(),
            expected_params,
            "Parameter count mismatch for {:?}",
            net
        );
    }
}

#[test]
fn test_layer_order() {
    let mut rng = StdRng::seed_from_u64(1);
    let model = Model::new(&small_net(), &mut rng).unwrap();
    let names: Vec<&str> = model.layers.iter().map(|layer| layer.name()).collect();
    assert_eq!(
        names,
        vec!["conv2d", "conv2d", "max_pool", "dropout", "feed_forward", "dropout", "feed_forward"]
    );
}

#[test]
fn test_inference_outputs_log_probabilities() {
    let mut rng = StdRng::seed_from_u64(1);
    let model = Model::new(&small_net(), &mut rng).unwrap();
    let data = Dataset::synthetic(4, (1, 8, 8), 3, &mut rng);

    let log_probs = model.infer(data.images(), &Device::Cpu).unwrap();
    assert_eq!(log_probs.dim(), (4, 3));

    for row in log_probs.axis_iter(Axis(0)) {
        let total: f32 = row.iter().map(|v| v.exp()).sum();
        assert!((total - 1.0).abs() < 1e-5, "probabilities sum to {}", total);
        assert!(row.iter().all(|&v| v <= 0.0));
    }
}

#[test]
fn test_inference_is_repeatable() {
    let mut rng = StdRng::seed_from_u64(2);
    let model = Model::new(&small_net(), &mut rng).unwrap();
    let data = Dataset::synthetic(3, (1, 8, 8), 3, &mut rng);

    let first = model.infer(data.images(), &Device::Cpu).unwrap();
    let second = model.infer(data.images(), &Device::Cpu).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_inference_invalid_input_size() {
    let mut rng = StdRng::seed_from_u64(1);
    let model = Model::new(&small_net(), &mut rng).unwrap();

    let invalid_input = Array4::<f32>::zeros((2, 1, 9, 9));
    let err = model.infer(&invalid_input, &Device::Cpu).unwrap_err();
    assert!(matches!(err, Error::Shape { .. }));
}

#[test]
fn test_backward_requires_forward() {
    let mut rng = StdRng::seed_from_u64(1);
    let mut model = Model::new(&small_net(), &mut rng).unwrap();
    let data = Dataset::synthetic(2, (1, 8, 8), 3, &mut rng);

    let log_probs = model.infer(data.images(), &Device::Cpu).unwrap();
    assert!(model.backward(&log_probs, data.labels(), &Device::Cpu).is_err());
}

#[test]
fn test_training_basic() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut model = Model::new(&small_net(), &mut rng).unwrap();
    let data = Dataset::synthetic(6, (1, 8, 8), 3, &mut rng);
    let mut optimizer = Adam::default_params(0.01);

    let loss_before = {
        let log_probs = model.infer(data.images(), &Device::Cpu).unwrap();
        model.loss.mean(log_probs.view(), data.labels()).unwrap()
    };

    for _ in 0..150 {
        let loss = model
            .train_batch(data.images(), data.labels(), &mut optimizer, &Device::Cpu)
            .unwrap();
        assert!(loss.is_finite());
        assert!(loss >= 0.0);
    }

    let log_probs = model.infer(data.images(), &Device::Cpu).unwrap();
    let loss_after = model.loss.mean(log_probs.view(), data.labels()).unwrap();
    println!("loss before: {}, after: {}", loss_before, loss_after);
    assert!(loss_after < loss_before);
}

#[test]
fn test_zero_gradients() {
    let mut rng = StdRng::seed_from_u64(4);
    let mut model = Model::new(&small_net(), &mut rng).unwrap();
    let data = Dataset::synthetic(2, (1, 8, 8), 3, &mut rng);

    let log_probs = model.forward(data.images(), &Device::Cpu).unwrap();
    model.backward(&log_probs, data.labels(), &Device::Cpu).unwrap();
    assert!(model
        .params_mut()
        .iter()
        .any(|p| p.weight_grads.iter().any(|&g| g != 0.0)));

    model.zero_gradients();
    for params in model.params_mut() {
        assert!(params.weight_grads.iter().all(|&g| g == 0.0));
        assert!(params.bias_grads.iter().all(|&g| g == 0.0));
    }
}

#[test]
fn test_save_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    let mut rng = StdRng::seed_from_u64(1);
    let model = Model::new(&small_net(), &mut rng).unwrap();

    model.save_json(&path).unwrap();

    let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let layers = saved.as_array().unwrap();
    assert_eq!(layers.len(), 4);
    assert_eq!(layers[0]["layer"], "conv2d");
    assert_eq!(layers[3]["layer"], "feed_forward");
}
