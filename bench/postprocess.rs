use criterion::{black_box, criterion_group, criterion_main, Criterion};

use hsm_deploy::inference::{postprocess, ImageSizes, Size};
use hsm_deploy::prelude::*;

fn postprocess_bench(c: &mut Criterion) {

    // Half scale megapixel frame, padded up to the network alignment
    let res_scale = 0.5;
    let sizes = ImageSizes::new(Size::new(1000, 1000), res_scale, 64);
    let shape = [1, sizes.network.height, sizes.network.width];

    // Network output with a ramp of disparities and a band of invalid values
    let numel = shape.iter().product::<usize>();
    let disparity: Vec<f32> = (0..numel)
        .map(|i| if i % 97 == 0 { f32::NAN } else { (i % 128) as f32 })
        .collect();
    let output = NetworkOutput {
        disparity: Tensor::from_shape_vec(&shape, disparity, Device::Cpu).unwrap(),
        entropy: Tensor::full(&shape, 0.25, Device::Cpu),
        auxiliary: Vec::new(),
    };

    c.bench_function("postprocess 1000x1000 half scale", |b| {
        b.iter(|| postprocess(black_box(output.clone()), &sizes, res_scale))
    });

    let (disparity, _) = postprocess(output, &sizes, res_scale).unwrap();
    c.bench_function("normalise 1000x1000", |b| b.iter(|| disparity.normalised()));
}

criterion_group!(benches, postprocess_bench);
criterion_main!(benches);
