// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Moving-average threshold detector.
//!
//! Each payload carries one score, either as a bare JSON number or as an
//! object with a numeric `score` field. The detector keeps the last
//! `window_size` scores and emits an alert whenever their mean reaches
//! `threshold`.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{Component, ComponentError, ConfigSchema, Registration};

pub const COMPONENT_TYPE: &str = "detectors.ThresholdDetector";
pub const CONFIG_CLASS: &str = "detectors.ThresholdDetectorConfig";

/// Largest accepted `window_size`.
pub const MAX_WINDOW_SIZE: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThresholdDetectorConfig {
    pub threshold: f64,
    pub window_size: usize,
    pub enabled: bool,
}

impl Default for ThresholdDetectorConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            window_size: 10,
            enabled: true,
        }
    }
}

impl ConfigSchema for ThresholdDetectorConfig {
    fn check(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(format!(
                "threshold must be between 0.0 and 1.0, got {}",
                self.threshold
            ));
        }
        if !(1..=MAX_WINDOW_SIZE).contains(&self.window_size) {
            return Err(format!(
                "window_size must be between 1 and {MAX_WINDOW_SIZE}, got {}",
                self.window_size
            ));
        }
        Ok(())
    }
}

pub struct ThresholdDetector {
    config: ThresholdDetectorConfig,
    window: VecDeque<f64>,
    seen: u64,
}

impl ThresholdDetector {
    pub fn new(config: ThresholdDetectorConfig) -> Self {
        Self {
            window: VecDeque::new(),
            config,
            seen: 0,
        }
    }

    fn parse_score(payload: &[u8]) -> Result<f64, ComponentError> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| ComponentError::InvalidPayload(e.to_string()))?;
        let score = match &value {
            Value::Object(fields) => fields.get("score").and_then(Value::as_f64),
            other => other.as_f64(),
        };
        score.ok_or_else(|| {
            ComponentError::InvalidPayload(format!("expected a score, got {value}"))
        })
    }
}

impl Component for ThresholdDetector {
    fn process(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>, ComponentError> {
        if !self.config.enabled {
            return Ok(None);
        }
        let score = Self::parse_score(payload)?;
        self.seen += 1;
        self.window.push_back(score);
        while self.window.len() > self.config.window_size {
            self.window.pop_front();
        }

        let mean = self.window.iter().sum::<f64>() / self.window.len() as f64;
        if mean < self.config.threshold {
            return Ok(None);
        }
        let alert = json!({
            "alert": "threshold_exceeded",
            "score": score,
            "mean": mean,
            "threshold": self.config.threshold,
            "window": self.window.len(),
            "sequence": self.seen,
        });
        Ok(Some(alert.to_string().into_bytes()))
    }

    /// Keeps the scores seen so far, dropping the oldest ones that no longer
    /// fit a smaller window.
    fn reconfigure(&mut self, config: &Value) -> Result<bool, ComponentError> {
        let config: ThresholdDetectorConfig = serde_json::from_value(config.clone())
            .map_err(|e| ComponentError::Failed(e.to_string()))?;
        while self.window.len() > config.window_size {
            self.window.pop_front();
        }
        self.config = config;
        Ok(true)
    }
}

pub fn registration() -> Registration {
    Registration::new::<ThresholdDetectorConfig, _>(COMPONENT_TYPE, CONFIG_CLASS, |config| {
        Ok(Box::new(ThresholdDetector::new(config)))
    })
}
