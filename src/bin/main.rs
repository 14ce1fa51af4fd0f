use std::time::Instant;

use clap::Parser;
use krylov_ldr::{
    dense::{multiply_dense, transpose_multiply_dense},
    errors::KrylovError,
    krylov::{KrylovEngine, KrylovTensor},
    parameters::{BackendKind, KrylovConfig},
};
use p3_matrix::dense::RowMajorMatrix;
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::warn;
use tracing_forest::{ForestLayer, util::LevelFilter};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Largest size for which the O(n²) dense comparison still runs.
const MAX_DENSE_LOG_N: u32 = 12;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short = 'l', long, default_value = "10", value_parser = clap::value_parser!(u32).range(0..=24))]
    log_n: u32,

    #[arg(short = 'r', long, default_value = "3")]
    rank: usize,

    #[arg(short = 'b', long, default_value = "8")]
    batch: usize,

    #[arg(long, default_value = "RustFft")]
    backend: BackendKind,

    #[arg(short = 's', long, default_value = "0")]
    seed: u64,

    #[arg(long)]
    check_finite: bool,

    /// Also compare against the quadratic dense computation (log n <= 12).
    #[arg(long)]
    dense: bool,
}

fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn main() -> Result<(), KrylovError> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    Registry::default()
        .with(env_filter)
        .with(ForestLayer::default())
        .init();

    let args = Args::parse();
    let n = 1usize << args.log_n;
    let (rank, batch) = (args.rank, args.batch);

    let config = KrylovConfig::new(args.backend, args.check_finite);
    let engine = KrylovEngine::<f64>::new(config);

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut sample = |len: usize| -> Vec<f64> {
        (0..len).map(|_| rng.random_range(-1.0..1.0)).collect()
    };
    let subdiag = sample(n - 1);
    let generators = RowMajorMatrix::new(sample(rank * n), n);
    let u = RowMajorMatrix::new(sample(batch * n), n);
    let w = KrylovTensor::new(sample(batch * rank * n), batch, rank, n);

    println!("=========================================");
    println!("Krylov engine, n = {n}, rank = {rank}, batch = {batch}");
    println!("{config}");

    let time = Instant::now();
    let transposed = engine.transpose_multiply(&subdiag, &generators, &u)?;
    let transpose_time = time.elapsed();

    let time = Instant::now();
    let cache = engine.build_cache(&subdiag, &generators)?;
    let cache_time = time.elapsed();

    let time = Instant::now();
    let product = engine.multiply(&cache, &generators, &w)?;
    let multiply_time = time.elapsed();

    let time = Instant::now();
    let gradient = engine.multiply_gradient(&cache, &generators, &u)?;
    let gradient_time = time.elapsed();

    println!("transpose_multiply: {transpose_time:?}");
    println!("build_cache:        {cache_time:?}");
    println!("multiply:           {multiply_time:?}");
    println!("multiply_gradient:  {gradient_time:?}");

    let lhs = dot(&transposed, &w);
    let rhs = dot(&u.values, &product.values);
    println!("adjoint gap: {:.3e}", (lhs - rhs).abs());
    println!(
        "gradient vs transpose_multiply: {:.3e}",
        max_abs_diff(&gradient, &transposed)
    );

    if args.dense && args.log_n > MAX_DENSE_LOG_N {
        warn!(
            log_n = args.log_n,
            max = MAX_DENSE_LOG_N,
            "skipping dense comparison, size too large"
        );
    } else if args.dense {
        let time = Instant::now();
        let dense_transposed = transpose_multiply_dense(&subdiag, &generators, &u)?;
        let dense_product = multiply_dense(&subdiag, &generators, &w)?;
        let dense_time = time.elapsed();

        let transpose_error = max_abs_diff(&transposed, &dense_transposed);
        let multiply_error = max_abs_diff(&product.values, &dense_product.values);
        let mean_error = transposed
            .iter()
            .zip(dense_transposed.iter())
            .map(|(x, y)| (x - y).abs())
            .sum::<f64>()
            / transposed.len().max(1) as f64;

        println!("dense reference:    {dense_time:?}");
        println!("transpose_multiply vs dense: max {transpose_error:.3e}, mean {mean_error:.3e}");
        println!("multiply vs dense:           max {multiply_error:.3e}");
    }

    Ok(())
}
