//! Downtime-risk scoring.
//!
//! A trained model ships as two JSON artifacts: a standard scaler and a
//! logistic-regression model over a fixed-width feature vector. When the
//! artifacts are absent the agent still runs, but scores with a random
//! draw that has no predictive value. Those results are tagged
//! [`ScoreSource::Fallback`] all the way into the prediction log.

use crate::metrics::MetricSet;
use anyhow::{Context, Result, bail};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

/// Width of the model's input vector; unused trailing slots are zero.
pub const FEATURE_WIDTH: usize = 20;

/// Minutes-to-downtime reported for any at-risk result.
pub const RISK_ETA_MINUTES: i32 = 15;

/// Share of fallback draws that come out at risk.
const FALLBACK_RISK_SHARE: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreSource {
    Model,
    /// Random draw; not a prediction.
    Fallback,
}

impl ScoreSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreSource::Model => "model",
            ScoreSource::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskResult {
    pub is_risk: bool,
    /// Percent, 0-100.
    pub probability: f64,
    pub eta_minutes: Option<i32>,
    pub source: ScoreSource,
}

impl RiskResult {
    fn new(is_risk: bool, probability: f64, source: ScoreSource) -> Self {
        Self {
            is_risk,
            probability,
            eta_minutes: is_risk.then_some(RISK_ETA_MINUTES),
            source,
        }
    }

    pub fn is_predictive(&self) -> bool {
        self.source == ScoreSource::Model
    }
}

pub trait RiskScorer: Send + Sync + 'static {
    fn score(&self, metrics: &MetricSet) -> RiskResult;
}

#[derive(Debug, Clone, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogisticModel {
    pub weights: Vec<f64>,
    pub intercept: f64,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    0.5
}

#[derive(Debug, Clone)]
pub struct ModelScorer {
    scaler: StandardScaler,
    model: LogisticModel,
}

impl ModelScorer {
    pub fn new(scaler: StandardScaler, model: LogisticModel) -> Result<Self> {
        if scaler.mean.len() != FEATURE_WIDTH || scaler.scale.len() != FEATURE_WIDTH {
            bail!(
                "scaler expects {} features, got mean={} scale={}",
                FEATURE_WIDTH,
                scaler.mean.len(),
                scaler.scale.len()
            );
        }
        if model.weights.len() != FEATURE_WIDTH {
            bail!(
                "model expects {} weights, got {}",
                FEATURE_WIDTH,
                model.weights.len()
            );
        }
        Ok(Self { scaler, model })
    }

    pub fn load(model_path: &Path, scaler_path: &Path) -> Result<Self> {
        let model: LogisticModel = read_json(model_path)?;
        let scaler: StandardScaler = read_json(scaler_path)?;
        Self::new(scaler, model)
    }

    fn feature_vector(metrics: &MetricSet) -> [f64; FEATURE_WIDTH] {
        let mut features = [0.0; FEATURE_WIDTH];
        for (slot, value) in features.iter_mut().zip(metrics.features()) {
            *slot = value;
        }
        features
    }

    /// Probability of downtime in 0..=1.
    fn predict_proba(&self, metrics: &MetricSet) -> f64 {
        let raw = Self::feature_vector(metrics);
        let z = raw
            .iter()
            .zip(&self.scaler.mean)
            .zip(&self.scaler.scale)
            .zip(&self.model.weights)
            .map(|(((x, mean), scale), w)| {
                let centred = x - mean;
                let scaled = if *scale == 0.0 { centred } else { centred / scale };
                scaled * w
            })
            .sum::<f64>()
            + self.model.intercept;

        1.0 / (1.0 + (-z).exp())
    }
}

impl RiskScorer for ModelScorer {
    fn score(&self, metrics: &MetricSet) -> RiskResult {
        let p = self.predict_proba(metrics);
        RiskResult::new(p >= self.model.threshold, p * 100.0, ScoreSource::Model)
    }
}

/// Stand-in scorer used when no trained artifacts are available.
#[derive(Debug)]
pub struct FallbackScorer {
    rng: Mutex<StdRng>,
}

impl FallbackScorer {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_rng(&mut rand::rng())),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for FallbackScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskScorer for FallbackScorer {
    fn score(&self, _metrics: &MetricSet) -> RiskResult {
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let is_risk = rng.random_bool(FALLBACK_RISK_SHARE);
        let probability = rng.random_range(60.0..95.0);
        RiskResult::new(is_risk, probability, ScoreSource::Fallback)
    }
}

/// Scorer chosen at startup.
#[derive(Debug)]
pub enum Scorer {
    Model(ModelScorer),
    Fallback(FallbackScorer),
}

impl Scorer {
    /// Load the trained model, or fall back when either artifact is missing.
    ///
    /// Artifacts that exist but cannot be parsed are an error: silently
    /// scoring at random would hide a broken deployment.
    pub fn from_artifacts(model_path: &Path, scaler_path: &Path) -> Result<Self> {
        if !(model_path.exists() && scaler_path.exists()) {
            warn!(
                "Model artifacts not found ({}, {}); predictions are random and NOT predictive",
                model_path.display(),
                scaler_path.display()
            );
            return Ok(Scorer::Fallback(FallbackScorer::new()));
        }

        let scorer = ModelScorer::load(model_path, scaler_path)?;
        info!("Loaded risk model from {}", model_path.display());
        Ok(Scorer::Model(scorer))
    }

    pub fn source(&self) -> ScoreSource {
        match self {
            Scorer::Model(_) => ScoreSource::Model,
            Scorer::Fallback(_) => ScoreSource::Fallback,
        }
    }
}

impl RiskScorer for Scorer {
    fn score(&self, metrics: &MetricSet) -> RiskResult {
        match self {
            Scorer::Model(s) => s.score(metrics),
            Scorer::Fallback(s) => s.score(metrics),
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read artifact at {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse artifact at {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn metrics(cpu: f64) -> MetricSet {
        MetricSet {
            cpu_pct: cpu,
            mem_pct: 50.0,
            disk_pct: 40.0,
            net_latency: 5.0,
            error_rate: 0.01,
            timestamp: Utc::now(),
        }
    }

    /// Model that only looks at CPU: z = (cpu - 50) / 10.
    fn cpu_only_scorer() -> ModelScorer {
        let mut mean = vec![0.0; FEATURE_WIDTH];
        mean[0] = 50.0;
        let mut scale = vec![1.0; FEATURE_WIDTH];
        scale[0] = 10.0;
        let mut weights = vec![0.0; FEATURE_WIDTH];
        weights[0] = 1.0;

        ModelScorer::new(
            StandardScaler { mean, scale },
            LogisticModel {
                weights,
                intercept: 0.0,
                threshold: 0.5,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_model_scores_logistically() {
        let scorer = cpu_only_scorer();

        let calm = scorer.score(&metrics(50.0));
        assert!((calm.probability - 50.0).abs() < 1e-9);
        assert!(calm.is_risk);
        assert_eq!(calm.eta_minutes, Some(RISK_ETA_MINUTES));

        let idle = scorer.score(&metrics(10.0));
        assert!(!idle.is_risk);
        assert_eq!(idle.eta_minutes, None);
        assert!(idle.probability < 5.0);
        assert!(idle.is_predictive());
    }

    #[test]
    fn test_zero_scale_keeps_centred_value() {
        let mut scorer = cpu_only_scorer();
        scorer.scaler.scale[0] = 0.0;
        // z = 60 - 50 = 10 -> p ~ 1
        assert!(scorer.score(&metrics(60.0)).probability > 99.0);
    }

    #[test]
    fn test_model_rejects_wrong_width() {
        let err = ModelScorer::new(
            StandardScaler {
                mean: vec![0.0; 5],
                scale: vec![1.0; 5],
            },
            LogisticModel {
                weights: vec![0.0; FEATURE_WIDTH],
                intercept: 0.0,
                threshold: 0.5,
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("scaler expects"));
    }

    #[test]
    fn test_fallback_draws_eighty_twenty() {
        let scorer = FallbackScorer::with_seed(7);
        let draws = 10_000;
        let mut risky = 0;

        for _ in 0..draws {
            let result = scorer.score(&metrics(10.0));
            assert_eq!(result.source, ScoreSource::Fallback);
            assert!(!result.is_predictive());
            assert!((60.0..95.0).contains(&result.probability));
            assert_eq!(result.eta_minutes.is_some(), result.is_risk);
            if result.is_risk {
                risky += 1;
            }
        }

        let share = risky as f64 / draws as f64;
        assert!((0.17..0.23).contains(&share), "risk share was {}", share);
    }

    #[test]
    fn test_missing_artifacts_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let scorer = Scorer::from_artifacts(
            &dir.path().join("model.json"),
            &dir.path().join("scaler.json"),
        )
        .unwrap();

        assert_eq!(scorer.source(), ScoreSource::Fallback);
        assert!(!scorer.score(&metrics(90.0)).is_predictive());
    }

    #[test]
    fn test_artifacts_loaded_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("model.json");
        let scaler_path = dir.path().join("scaler.json");

        let mut weights = vec![0.0; FEATURE_WIDTH];
        weights[1] = 2.0;
        std::fs::write(
            &model_path,
            serde_json::json!({ "weights": weights, "intercept": -1.0 }).to_string(),
        )
        .unwrap();
        std::fs::write(
            &scaler_path,
            serde_json::json!({
                "mean": vec![0.0; FEATURE_WIDTH],
                "scale": vec![100.0; FEATURE_WIDTH],
            })
            .to_string(),
        )
        .unwrap();

        let scorer = Scorer::from_artifacts(&model_path, &scaler_path).unwrap();
        assert_eq!(scorer.source(), ScoreSource::Model);

        // mem 50 -> 0.5 scaled * 2.0 - 1.0 = 0 -> p = 0.5
        let result = scorer.score(&metrics(10.0));
        assert!((result.probability - 50.0).abs() < 1e-9);
        assert!(result.is_predictive());
    }

    #[test]
    fn test_malformed_artifact_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("model.json");
        let scaler_path = dir.path().join("scaler.json");
        std::fs::write(&model_path, "not json").unwrap();
        std::fs::write(&scaler_path, "{}").unwrap();

        assert!(Scorer::from_artifacts(&model_path, &scaler_path).is_err());
    }
}
