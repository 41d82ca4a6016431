// gatewarden/src/eval/mod.rs
//
// Labeled-dataset evaluation harness.
//
//   1. Loads a JSONL dataset of RequestSnapshots with `bot_label` set
//      (true = bot traffic, false = legitimate)
//   2. Runs the full pipeline on every snapshot in order
//   3. Computes per-detector and aggregate precision / recall / F1 / FPR
//   4. Prints a markdown-formatted report with a score histogram
//
// Run:
//   gatewarden --mode eval --path labeled.jsonl
//   gatewarden --mode eval --path labeled.jsonl --eval-threshold 0.6

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::engine::Engine;
use crate::events::RequestSnapshot;

// ── Per-detector performance counters ─────────────────────────────────────────

#[derive(Debug, Default, Clone)]
pub struct DetectorMetrics {
    pub tp: u64,
    pub fp: u64,
    pub tn: u64,
    pub fn_: u64,
}

impl DetectorMetrics {
    pub fn precision(&self) -> f64 {
        let denom = self.tp + self.fp;
        if denom == 0 { 1.0 } else { self.tp as f64 / denom as f64 }
    }

    pub fn recall(&self) -> f64 {
        let denom = self.tp + self.fn_;
        if denom == 0 { 0.0 } else { self.tp as f64 / denom as f64 }
    }

    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 { 0.0 } else { 2.0 * p * r / (p + r) }
    }

    pub fn fpr(&self) -> f64 {
        let denom = self.fp + self.tn;
        if denom == 0 { 0.0 } else { self.fp as f64 / denom as f64 }
    }

    fn observe(&mut self, predicted: bool, actual: bool) {
        match (predicted, actual) {
            (true, true)   => self.tp += 1,
            (true, false)  => self.fp += 1,
            (false, false) => self.tn += 1,
            (false, true)  => self.fn_ += 1,
        }
    }
}

// ── Aggregate result ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct EvalResult {
    pub n_events:        usize,
    pub n_positive:      usize,
    pub n_negative:      usize,
    pub threshold:       f64,
    pub global:          DetectorMetrics,
    pub per_detector:    HashMap<String, DetectorMetrics>,
    pub band_counts:     HashMap<String, u64>,
    pub score_histogram: Vec<(f64, usize)>,
}

pub async fn run_eval(engine: Arc<Engine>, path: &Path, threshold: f64) -> Result<EvalResult> {
    let content = tokio::fs::read_to_string(path).await?;
    let mut snapshots: Vec<RequestSnapshot> = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        snapshots.push(serde_json::from_str(line)?);
    }
    snapshots.sort_by_key(|s| s.received_at);
    info!(n = snapshots.len(), "eval dataset loaded");

    let mut result = EvalResult {
        n_events: snapshots.len(),
        n_positive: 0,
        n_negative: 0,
        threshold,
        global: DetectorMetrics::default(),
        per_detector: HashMap::new(),
        band_counts: HashMap::new(),
        score_histogram: (0..10).map(|i| (i as f64 / 10.0, 0)).collect(),
    };

    for snapshot in snapshots {
        let label = snapshot.bot_label;
        let evaluation = engine.evaluate(snapshot).await;

        let bin = ((evaluation.evidence.bot_probability * 10.0) as usize).min(9);
        result.score_histogram[bin].1 += 1;
        *result
            .band_counts
            .entry(evaluation.evidence.risk_band.to_string())
            .or_insert(0) += 1;

        let Some(actual) = label else { continue };
        if actual {
            result.n_positive += 1;
        } else {
            result.n_negative += 1;
        }

        let predicted = evaluation.evidence.bot_probability >= threshold;
        result.global.observe(predicted, actual);

        // Per-detector: a detector "votes bot" when its contribution is
        // positive.
        for c in &evaluation.evidence.contributions {
            result
                .per_detector
                .entry(c.detector_name.clone())
                .or_default()
                .observe(c.confidence_delta > 0.0, actual);
        }
    }

    Ok(result)
}

pub fn print_report(result: &EvalResult) {
    println!("\n## Gatewarden evaluation\n");
    println!(
        "events: {}  positive: {}  negative: {}  threshold: {:.2}\n",
        result.n_events, result.n_positive, result.n_negative, result.threshold
    );
    println!(
        "| metric | value |\n|---|---|\n| precision | {:.3} |\n| recall | {:.3} |\n| f1 | {:.3} |\n| fpr | {:.3} |\n",
        result.global.precision(),
        result.global.recall(),
        result.global.f1(),
        result.global.fpr()
    );

    println!("| detector | precision | recall | f1 | fpr |");
    println!("|---|---|---|---|---|");
    let mut names: Vec<&String> = result.per_detector.keys().collect();
    names.sort();
    for name in names {
        let m = &result.per_detector[name];
        println!(
            "| {} | {:.3} | {:.3} | {:.3} | {:.3} |",
            name,
            m.precision(),
            m.recall(),
            m.f1(),
            m.fpr()
        );
    }

    println!("\nrisk bands:");
    let mut bands: Vec<(&String, &u64)> = result.band_counts.iter().collect();
    bands.sort();
    for (band, count) in bands {
        println!("  {band:<10} {count}");
    }

    println!("\nscore histogram:");
    for (lower, count) in &result.score_histogram {
        println!("  [{:.1}-{:.1})  {}", lower, lower + 0.1, count);
    }
}
