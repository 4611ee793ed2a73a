//! Benchmarks for the forward model stages

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;

use bilinear_fnirs_core::constants::BalloonConstants;
use bilinear_fnirs_core::hemo::{self, RegionalBalloon};
use bilinear_fnirs_core::spectral::Spectral;
use bilinear_fnirs_core::{
    presets, ForwardModel, NoiseInjector, NoiseKind, NoiseSpecification, SimulationParameters,
    StimulusProtocol,
};

/// Two-region preset stretched to `cycles` task/rest cycles
fn two_region_with_cycles(cycles: usize) -> ForwardModel {
    let base = presets::two_region().unwrap();
    let params = SimulationParameters::new(
        base.connectivity().to_owned(),
        base.modulation().to_owned(),
        base.input_effect().to_owned(),
        base.physiology().to_owned(),
        base.frequency(),
        StimulusProtocol::Uniform { action_s: 5.0, rest_s: 25.0, cycles },
    )
    .unwrap();
    ForwardModel::new(params).unwrap()
}

fn bench_simulate(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulate");

    for cycles in [2, 8, 32].iter() {
        let model = two_region_with_cycles(*cycles);

        group.bench_with_input(BenchmarkId::from_parameter(cycles * 300), cycles, |b, _| {
            b.iter(|| black_box(model.simulate().unwrap()));
        });
    }

    group.finish();
}

fn bench_neurodynamics(c: &mut Criterion) {
    let mut group = c.benchmark_group("neurodynamics");

    for name in ["two-region", "three-region", "five-region"] {
        let model = ForwardModel::new(presets::by_name(name).unwrap()).unwrap();
        let stimulus = model.stimulus().unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(name), &stimulus, |b, stimulus| {
            b.iter(|| black_box(model.neurodynamics(black_box(stimulus)).unwrap()));
        });
    }

    group.finish();
}

fn bench_balloon(c: &mut Criterion) {
    let mut group = c.benchmark_group("balloon");
    let balloon = RegionalBalloon::derive(
        &BalloonConstants::default(),
        Array2::zeros((4, 1)).view(),
        4,
    )
    .unwrap();

    for samples in [600, 2400, 9600].iter() {
        let neural = Array2::from_shape_fn((*samples, 4), |(t, _)| {
            if t % 300 < 50 { 0.05 } else { 0.0 }
        });

        group.bench_with_input(BenchmarkId::from_parameter(samples), samples, |b, _| {
            b.iter(|| black_box(hemo::integrate(neural.view(), &balloon, 0.1).unwrap()));
        });
    }

    group.finish();
}

fn bench_noise(c: &mut Criterion) {
    let mut group = c.benchmark_group("noise_injection");
    let output = presets::two_region()
        .and_then(ForwardModel::new)
        .and_then(|model| model.simulate())
        .unwrap();
    let spec = NoiseSpecification::new(
        vec![NoiseKind::White, NoiseKind::Heart, NoiseKind::Breathing, NoiseKind::Vasomotion],
        5.0,
    );

    group.bench_function("pooled_four_sources", |b| {
        let mut injector = NoiseInjector::new(spec.clone()).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        b.iter(|| {
            black_box(
                injector
                    .inject(
                        output.optical.view(),
                        output.stimulus.timestamps().view(),
                        None,
                        &mut rng,
                    )
                    .unwrap(),
            )
        });
    });

    group.finish();
}

fn bench_resample(c: &mut Criterion) {
    let mut group = c.benchmark_group("resample");
    let trace: Vec<f64> = (0..1000).map(|i| (i as f64 * 0.05).sin()).collect();

    for num in [600, 2400, 9600].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(num), num, |b, &num| {
            let mut spectral = Spectral::new();
            b.iter(|| black_box(spectral.resample(black_box(&trace), num)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_simulate,
    bench_neurodynamics,
    bench_balloon,
    bench_noise,
    bench_resample,
);

criterion_main!(benches);
