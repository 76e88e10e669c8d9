//! End-to-end training loop against a mock model

use ruvector_rl::{
    BufferConfig, Candle, DecaySchedule, Experience, ExperienceMetadata, FeatureVector,
    GradientSource, Gradients, LayerSpec, LayerType, NonFinitePolicy, ParamSet, Result, RlError,
    SampledBatch, TrainerConfig, TrainerContext, FEATURE_DIM,
};

/// Pulls every parameter towards a fixed target; TD error is the reward
/// scaled by the current distance.
struct QuadraticModel {
    target: f64,
    calls: usize,
}

impl GradientSource for QuadraticModel {
    fn compute(&mut self, params: &ParamSet, batch: &SampledBatch) -> Result<Gradients> {
        self.calls += 1;
        let mut grads = params.clone();
        for layer in grads.layers_mut() {
            layer.mapv_inplace(|p| p - self.target);
        }
        let loss = 0.5 * grads.l2_norm().powi(2);
        let td_errors = batch
            .experiences
            .iter()
            .map(|e| e.reward.abs() * (1.0 + loss.sqrt()))
            .collect();
        Ok(Gradients {
            grads,
            td_errors,
            loss,
        })
    }
}

/// Always returns NaN gradients
struct ExplodingModel;

impl GradientSource for ExplodingModel {
    fn compute(&mut self, params: &ParamSet, batch: &SampledBatch) -> Result<Gradients> {
        let mut grads = ParamSet::zeros_like(params);
        grads.set(0, 0, 0, f64::NAN)?;
        Ok(Gradients {
            grads,
            td_errors: vec![0.1; batch.len()],
            loss: f64::NAN,
        })
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("ruvector_rl=debug")
        .with_test_writer()
        .try_init();
}

fn config() -> TrainerConfig {
    let mut config = TrainerConfig::default();
    config.buffer = BufferConfig {
        capacity: 256,
        seed: Some(11),
        ..BufferConfig::default()
    };
    config.optimizer.learning_rate = 0.05;
    config.optimizer.weight_decay = 0.0;
    config.clip.max_norm = 5.0;
    config.exploration.seed = Some(12);
    config.init.seed = Some(13);
    config
}

fn layers() -> Vec<LayerSpec> {
    vec![
        LayerSpec::new(LayerType::Dense, FEATURE_DIM, 16),
        LayerSpec::new(LayerType::Recurrent, 16, 16),
        LayerSpec::new(LayerType::Dense, 16, 3),
    ]
}

fn candles(n: usize) -> Vec<Candle> {
    (0..n)
        .map(|i| {
            let base = 100.0 + (i as f64 * 0.3).sin() * 5.0;
            Candle::new(base, base + 1.0, base - 1.0, base + 0.2, 1_000.0 + i as f64)
        })
        .collect()
}

fn populate(ctx: &mut TrainerContext, n: usize) {
    let series = candles(n + 2);
    for i in 0..n {
        let state = FeatureVector::from_candles(&series[i], &series[i + 1], 1_000.0);
        let next = FeatureVector::from_candles(&series[i + 1], &series[i + 2], 1_000.0);
        let q = [0.1, 0.2 * (i % 3) as f64, 0.05];
        let action = ctx.select_action(&q, None).unwrap().action;
        let reward = state.as_slice()[6];
        ctx.observe(
            Experience::new(state.to_vec(), action, reward, next.to_vec(), false)
                .with_symbol("ETH-USD")
                .with_metadata(ExperienceMetadata {
                    price: series[i + 1].close,
                    volume: series[i + 1].volume,
                    volatility: 0.01,
                    confidence: 0.5,
                }),
        )
        .unwrap();
    }
}

#[test]
fn test_training_reduces_loss() {
    init_tracing();
    let mut ctx = TrainerContext::new(config(), &layers()).unwrap();
    populate(&mut ctx, 128);
    assert_eq!(ctx.buffer().len(), 128);

    let mut model = QuadraticModel {
        target: 0.05,
        calls: 0,
    };
    let first = ctx.train_step(&mut model, 32).unwrap();
    let mut last = first.clone();
    for _ in 0..199 {
        last = ctx.train_step(&mut model, 32).unwrap();
    }

    assert_eq!(model.calls, 200);
    assert_eq!(last.step, 200);
    assert_eq!(ctx.step_count(), 200);
    assert!(last.loss < first.loss * 0.1, "{} vs {}", last.loss, first.loss);
    assert!(last.beta > first.beta);
    assert!(ctx.buffer().tree().check_consistency().is_none());
    assert!(ctx.buffer().iter().any(|e| e.td_error != 0.0));
}

#[test]
fn test_insufficient_samples_surface() {
    let mut ctx = TrainerContext::new(config(), &layers()).unwrap();
    populate(&mut ctx, 4);
    let mut model = QuadraticModel {
        target: 0.0,
        calls: 0,
    };
    let err = ctx.train_step(&mut model, 8).unwrap_err();
    assert_eq!(
        err,
        RlError::InsufficientSamples {
            requested: 8,
            available: 4
        }
    );
    assert_eq!(model.calls, 0);
}

#[test]
fn test_non_finite_gradients_error_policy() {
    let mut ctx = TrainerContext::new(config(), &layers()).unwrap();
    populate(&mut ctx, 16);
    let before = ctx.parameters().clone();

    let err = ctx.train_step(&mut ExplodingModel, 4).unwrap_err();
    match err {
        RlError::NumericalInstability { layer, .. } => assert_eq!(layer, Some(0)),
        other => panic!("expected instability, got {other:?}"),
    }
    assert_eq!(ctx.parameters(), &before);
    assert_eq!(ctx.step_count(), 0);
}

#[test]
fn test_non_finite_gradients_zero_policy() {
    let mut cfg = config();
    cfg.clip.non_finite = NonFinitePolicy::ZeroAndContinue;
    cfg.optimizer.weight_decay = 0.0;
    let mut ctx = TrainerContext::new(cfg, &layers()).unwrap();
    populate(&mut ctx, 16);
    let before = ctx.parameters().clone();

    let report = ctx.train_step(&mut ExplodingModel, 4).unwrap();
    assert!(report.clipped);
    assert_eq!(ctx.clip_stats().non_finite, 1);
    // Zero gradients and no decay leave the parameters where they were
    assert_eq!(ctx.parameters(), &before);
}

#[test]
fn test_warmup_schedule_drives_learning_rate() {
    let mut cfg = config();
    cfg.lr_schedule = Some(DecaySchedule::WarmupLinear {
        peak: 0.01,
        warmup_steps: 4,
        total_steps: 8,
    });
    let mut ctx = TrainerContext::new(cfg, &layers()).unwrap();
    populate(&mut ctx, 16);
    let mut model = QuadraticModel {
        target: 0.0,
        calls: 0,
    };

    let rates: Vec<f64> = (0..8)
        .map(|_| ctx.train_step(&mut model, 4).unwrap().learning_rate)
        .collect();
    assert!(rates[0] > 0.0);
    assert!((rates[4] - 0.01).abs() < 1e-12);
    assert!(rates[7] < rates[4]);
}

#[test]
fn test_load_parameters_checks_shape() {
    let mut ctx = TrainerContext::new(config(), &layers()).unwrap();
    let zeros = ParamSet::zeros_like(ctx.parameters());
    ctx.load_parameters(zeros.clone()).unwrap();
    assert_eq!(ctx.parameters(), &zeros);

    let wrong = ParamSet::zeros(&[(2, 2)]);
    assert!(ctx.load_parameters(wrong).is_err());
}

#[test]
fn test_independent_contexts() {
    let mut a = TrainerContext::new(config(), &layers()).unwrap();
    let b = TrainerContext::new(config(), &layers()).unwrap();
    assert_eq!(a.parameters(), b.parameters());

    populate(&mut a, 8);
    let mut model = QuadraticModel {
        target: 1.0,
        calls: 0,
    };
    a.train_step(&mut model, 4).unwrap();
    assert_ne!(a.parameters(), b.parameters());
    assert!(b.buffer().is_empty());
}
