use criterion::{black_box, criterion_group, criterion_main, Criterion};
use danmaku_system_kinematics::Kernel;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const ROWS: usize = 4_096;

fn columns() -> (Vec<f64>, Vec<f64>, Vec<bool>) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let x = (0..ROWS).map(|_| rng.gen_range(-20.0..1_300.0)).collect();
    let speed = (0..ROWS).map(|_| rng.gen_range(120.0..190.0)).collect();
    let movable = (0..ROWS).map(|_| rng.gen_bool(0.95)).collect();
    (x, speed, movable)
}

fn advance(c: &mut Criterion) {
    let (x, speed, movable) = columns();
    for (name, kernel) in [("scalar", Kernel::scalar()), ("wide", Kernel::wide())] {
        let mut positions = x.clone();
        let mut changed = vec![false; ROWS];
        c.bench_function(&format!("advance_{name}_{ROWS}"), |b| {
            b.iter(|| {
                kernel.advance(
                    black_box(&mut positions),
                    black_box(&speed),
                    black_box(&movable),
                    black_box(0.016),
                    &mut changed,
                );
            })
        });
    }
}

criterion_group!(benches, advance);
criterion_main!(benches);
