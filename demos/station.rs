extern crate nalgebra as na;

use abm_ukf::corridor::{Corridor, CorridorParams};
use abm_ukf::{
    AgentModel, FaultDetector, NoiseAdaptation, ObservedSubset, RunParams, UkfParams, UkfRun,
};
use anyhow::{Context, Result};
use rand::SeedableRng;

// 観測する割合
const PROP: f64 = 0.5;
const POP_TOTAL: usize = 10;
const SAMPLE_RATE: usize = 5;
// Rの想定より大きい観測ノイズ
const NOISE: f64 = 2.0;

fn main() -> Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()?;

    let model = Corridor::new(&CorridorParams {
        pop_total: POP_TOTAL,
        seed: 11,
        ..CorridorParams::default()
    });
    let n = 2 * model.pop_total();

    let mut rng = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(7);
    let hx = ObservedSubset::proportion(POP_TOTAL, PROP, &mut rng);
    let m = hx.coords.len();
    log::info!("observing agents {:?}", hx.agents);

    // Q is tight and R underestimates the sensor noise, so the fault test
    // rejects and R grows towards the true noise variance.
    let params = UkfParams::new(
        na::DMatrix::identity(n, n),
        na::DMatrix::identity(n, n) * 0.01,
        na::DMatrix::identity(m, m),
    )
    .with_tuning(1.0, 2.0, 0.0)
    .with_sample_rate(SAMPLE_RATE)
    .with_noise(NOISE)
    .with_adaptation(NoiseAdaptation::ChiSquared(FaultDetector::default()));

    let (q_trace, r_trace) = (params.q.trace(), params.r.trace());

    let run = RunParams {
        step_limit: 1000,
        seed: 1,
    };
    let mut ukf_run = UkfRun::new(model, hx, params, run)?;
    let steps = ukf_run.run()?;
    let record = ukf_run.record();

    // ログファイルの作成
    std::fs::create_dir_all("logs")?;
    let file_path = "logs/ukf-station.csv";
    let mut wtr = csv::Writer::from_path(file_path).context("file open error")?;
    let mut header = vec!["step".to_string()];
    for i in 0..POP_TOTAL {
        for c in ["x", "y"] {
            header.push(format!("truth_{c}{i}"));
            header.push(format!("pred_{c}{i}"));
        }
    }
    wtr.write_record(&header)?;
    for t in 0..record.truths.nrows() {
        let mut row = vec![t.to_string()];
        for j in 0..n {
            row.push(record.truths[(t, j)].to_string());
            row.push(record.preds[(t, j)].to_string());
        }
        wtr.write_record(&row)?;
    }
    wtr.flush()?;

    let errors = record.agent_errors(&record.preds);
    let forecast_errors = record.agent_errors(&record.forecasts);
    let mean = |e: &[f64]| {
        let finite: Vec<f64> = e.iter().copied().filter(|v| v.is_finite()).collect();
        finite.iter().sum::<f64>() / finite.len().max(1) as f64
    };
    println!("steps: {steps}, written to {file_path}");
    println!(
        "mean error: assimilated {:.3}, forecast {:.3}, median {:.3}",
        mean(&errors),
        mean(&forecast_errors),
        record.median_error().unwrap_or(f64::NAN)
    );
    println!("q trace: {q_trace:.3} -> {:.3}", ukf_run.filter().q().trace());
    println!("r trace: {r_trace:.3} -> {:.3}", ukf_run.filter().r().trace());
    Ok(())
}
