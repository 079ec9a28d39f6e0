use ndarray::{Array4, ArrayD};
use pur_hpo::layers::{Conv2DLayer, DropoutLayer, FeedForwardLayer, Layer, LayerParams, MaxPoolLayer};
use pur_hpo::{ActivationType, Device};
use rand::rngs::StdRng;
use rand::SeedableRng;

#[test]
fn test_layer_initialization() {
    let mut rng = StdRng::seed_from_u64(1);
    let layer = FeedForwardLayer::new(
        3, // inputs
        4, // neurons
        ActivationType::ReLU,
        &mut rng,
    )
    .unwrap();

    // Check layer configuration
    assert_eq!(layer.inputs, 3);
    assert_eq!(layer.neurons, 4);

    // Weights are (neurons x inputs)
    assert_eq!(layer.params.weights.dim(), (4, 3));
    assert_eq!(layer.params.bias.len(), 4);
    assert!(layer.params.bias.iter().all(|&b| b == 0.0));
}

#[test]
fn test_forward_propagate() {
    let mut rng = StdRng::seed_from_u64(1);
    let layer = FeedForwardLayer::new(3, 2, ActivationType::ReLU, &mut rng).unwrap();

    let input = ArrayD::from_shape_vec(vec![1, 3], vec![1.0f32, 2.0, 3.0]).unwrap();
    let output = layer.infer(&input, &Device::Cpu).unwrap();

    assert_eq!(output.shape(), &[1, 2]);
    // ReLU ensures non-negative
    assert!(output.iter().all(|&v| v >= 0.0));
}

#[test]
fn test_forward_propagate_invalid_input_size() {
    let mut rng = StdRng::seed_from_u64(1);
    let layer = FeedForwardLayer::new(3, 2, ActivationType::ReLU, &mut rng).unwrap();

    let invalid_input = ArrayD::from_shape_vec(vec![1, 2], vec![1.0f32, 2.0]).unwrap();
    let err = layer.infer(&invalid_input, &Device::Cpu).unwrap_err();
    assert!(err.to_string().contains("Input size does not match layer's input size"));
}

#[test]
fn test_parameter_count() {
    let mut rng = StdRng::seed_from_u64(1);
    let layer = FeedForwardLayer::new(3, 4, ActivationType::ReLU, &mut rng).unwrap();

    // Parameter count should be weights + biases
    assert_eq!(layer.params.parameter_count(), 3 * 4 + 4);
}

#[test]
fn test_he_initialization_is_seeded() {
    let mut a = StdRng::seed_from_u64(9);
    let mut b = StdRng::seed_from_u64(9);
    let first = LayerParams::he_normal(4, 3, ActivationType::ReLU, &mut a).unwrap();
    let second = LayerParams::he_normal(4, 3, ActivationType::ReLU, &mut b).unwrap();

    assert_eq!(first.weights, second.weights);
    assert!(first.weights.iter().any(|&w| w != 0.0));
}

#[test]
fn test_conv_then_pool_shapes() {
    let mut rng = StdRng::seed_from_u64(1);
    let mut conv = Conv2DLayer::new((1, 6, 6), (3, 3), 2, (1, 1), (0, 0), ActivationType::ReLU, &mut rng).unwrap();
    assert_eq!(conv.output_shape(), (2, 4, 4));

    let mut pool = MaxPoolLayer::new(2, 4, 4, (2, 2), 2).unwrap();
    let input = Array4::<f32>::ones((3, 1, 6, 6)).into_dyn();

    let conv_out = conv.forward(&input, &Device::Cpu).unwrap();
    let pooled = pool.forward(&conv_out, &Device::Cpu).unwrap();
    assert_eq!(pooled.shape(), &[3, 2, 2, 2]);

    let grad = pool.backward(&ArrayD::ones(pooled.raw_dim()), &Device::Cpu).unwrap();
    let grad = conv.backward(&grad, &Device::Cpu).unwrap();
    assert_eq!(grad.shape(), input.shape());
}

#[test]
fn test_dropout_inference_is_identity() {
    let mut rng = StdRng::seed_from_u64(1);
    let dropout = DropoutLayer::new(0.5, &mut rng).unwrap();
    let input = ArrayD::from_elem(vec![2, 5], 3.0f32);

    assert_eq!(dropout.infer(&input, &Device::Cpu).unwrap(), input);
}

#[test]
fn test_boxed_layers_clone() {
    let mut rng = StdRng::seed_from_u64(1);
    let layers: Vec<Box<dyn Layer>> = vec![
        Box::new(FeedForwardLayer::new(2, 2, ActivationType::Linear, &mut rng).unwrap()),
        Box::new(DropoutLayer::new(0.25, &mut rng).unwrap()),
    ];
    let copies = layers.clone();

    assert_eq!(copies.len(), 2);
    assert_eq!(copies[0].params().unwrap().weights, layers[0].params().unwrap().weights);
    assert!(copies[1].params().is_none());
}
