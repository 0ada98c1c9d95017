//! Train a Born machine on even-parity bit strings
//!
//! Demonstrates: init -> forward -> loss -> backward -> optimizer step,
//! then checks how much probability mass ends up on the training set.
//!
//! Run with:
//! ```bash
//! RUST_LOG=info cargo run --example train_born_machine
//! ```

use prob_mps::prelude::*;
use tracing_subscriber::EnvFilter;

const SEQ_LEN: usize = 8;

fn parity_strings() -> (Vec<Vec<u32>>, Vec<Vec<u32>>) {
    (0..1u32 << SEQ_LEN)
        .map(|k| (0..SEQ_LEN).map(|t| (k >> t) & 1).collect::<Vec<u32>>())
        .partition(|bits| bits.iter().sum::<u32>() % 2 == 0)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let device = best_device();
    let (even, odd) = parity_strings();
    let train = MpsInput::from_sequences(&even, &device)?;
    let held_out = MpsInput::from_sequences(&odd, &device)?;

    // 1. Model: noise large enough to break the symmetry of the identity init
    let config = ProbMpsConfig::new(SEQ_LEN, 2, 4)
        .with_init_noise(0.1)
        .with_bias(true);
    let model = ProbMps::new(config, &device)?;
    println!("Training with {} parameters ({} vars)", model.param_count(), model.trainable_vars().len());

    // 2. Train
    let learning = LearningConfig {
        learning_rate: 0.02,
        batch_size: 32,
        epochs: 200,
        patience: Some(20),
        ..Default::default()
    };
    let mut trainer = Trainer::new(&model, learning)?;
    for summary in trainer.fit(&model, &train)? {
        if summary.epoch % 20 == 0 {
            println!("  epoch {:3}: nll={:.4}", summary.epoch, summary.mean_loss);
        }
    }

    // 3. Evaluate: the ideal model puts all mass uniformly on the even strings
    let ideal = (even.len() as f32).ln();
    println!("\nTrain NLL: {:.4} (ideal {:.4})", evaluate(&model, &train, 64)?, ideal);

    let log_probs = with_gpu_sync(|| model.forward(&train))?;
    let mass: f32 = log_probs.exp()?.sum_all()?.to_dtype(DType::F32)?.to_scalar::<f32>()?;
    println!("Probability mass on even strings: {:.3}", mass);

    match evaluate(&model, &held_out, 64) {
        Ok(nll) => println!("Odd-string NLL: {:.4}", nll),
        Err(e) => println!("Odd strings unreachable: {}", e),
    }

    match model.check_params_health()? {
        Some((idx, issue)) => println!("Warning: {} at parameter index {}", issue, idx),
        None => println!("All parameters healthy."),
    }

    Ok(())
}
