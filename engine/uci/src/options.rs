//! Engine options.
//!
//! One flat struct carries every tunable the host can touch. Defaults can
//! be overridden from an optional `cinder.toml`, then mutated one at a time
//! by UCI `setoption`. Out-of-range values are rejected with the previous
//! state intact; nothing is applied to a live search — the controller reads
//! the options at the next action.

use cinder_search::Params;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("unknown option: {0}")]
    UnknownOption(String),

    #[error("invalid value '{value}' for option {name}: {reason}")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },

    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    ConfigParse {
        path: String,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct EngineOptions {
    pub threads: usize,
    pub minibatch_size: usize,
    pub max_prefetch: usize,
    pub cpuct: f32,
    pub temperature: f32,
    pub tempdecay_moves: u32,
    pub noise: bool,
    pub verbose_move_stats: bool,
    pub smart_pruning: bool,
    pub virtual_loss_bug: f32,
    pub fpu_reduction: f32,
    pub cache_history_length: usize,
    pub policy_softmax_temp: f32,
    pub allowed_node_collisions: usize,
    pub backpropagate_gamma: f32,
    pub backpropagate_beta: f32,
    pub nncache: usize,
    pub slowmover: f32,
    pub move_overhead: i64,
    pub time_curve_peak: f32,
    pub time_curve_left_width: f32,
    pub time_curve_right_width: f32,
    pub backend: String,
    pub weights: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            threads: 2,
            minibatch_size: 256,
            max_prefetch: 32,
            cpuct: 3.4,
            temperature: 0.0,
            tempdecay_moves: 0,
            noise: false,
            verbose_move_stats: false,
            smart_pruning: true,
            virtual_loss_bug: 0.0,
            fpu_reduction: 0.9,
            cache_history_length: 7,
            policy_softmax_temp: 2.2,
            allowed_node_collisions: 32,
            backpropagate_gamma: 1.0,
            backpropagate_beta: 1.0,
            nncache: 200_000,
            slowmover: 1.93,
            move_overhead: 100,
            time_curve_peak: 26.0,
            time_curve_left_width: 67.0,
            time_curve_right_width: 76.0,
            backend: "uniform".to_string(),
            weights: String::new(),
        }
    }
}

/// Search locations for `cinder.toml` when no explicit path is given.
const CONFIG_SEARCH_PATHS: &[&str] = &["cinder.toml", "../cinder.toml"];

impl EngineOptions {
    /// Loads options from `path`, or from the first `cinder.toml` found in
    /// the default locations, or plain defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, OptionsError> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => CONFIG_SEARCH_PATHS
                .iter()
                .map(Path::new)
                .find(|p| p.exists())
                .map(Path::to_path_buf),
        };
        let Some(path) = path else {
            return Ok(Self::default());
        };
        info!(path = %path.display(), "loading engine options");
        let text = std::fs::read_to_string(&path).map_err(|source| OptionsError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        let options: Self =
            toml::from_str(&text).map_err(|source| OptionsError::ConfigParse {
                path: path.display().to_string(),
                source,
            })?;
        options.validate()?;
        Ok(options)
    }

    /// Applies one `setoption`-style update.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), OptionsError> {
        let mut next = self.clone();
        match name.to_ascii_lowercase().as_str() {
            "threads" => next.threads = parse_int(name, value, 1, 128)? as usize,
            "minibatch-size" => next.minibatch_size = parse_int(name, value, 1, 1024)? as usize,
            "max-prefetch" => next.max_prefetch = parse_int(name, value, 0, 1024)? as usize,
            "cpuct" => next.cpuct = parse_float(name, value, 0.0, 100.0)?,
            "temperature" => next.temperature = parse_float(name, value, 0.0, 100.0)?,
            "tempdecay-moves" => next.tempdecay_moves = parse_int(name, value, 0, 100)? as u32,
            "noise" => next.noise = parse_bool(name, value)?,
            "verbose-move-stats" => next.verbose_move_stats = parse_bool(name, value)?,
            "smart-pruning" => next.smart_pruning = parse_bool(name, value)?,
            "virtual-loss-bug" => next.virtual_loss_bug = parse_float(name, value, -100.0, 100.0)?,
            "fpu-reduction" => next.fpu_reduction = parse_float(name, value, -100.0, 100.0)?,
            "cache-history-length" => {
                next.cache_history_length = parse_int(name, value, 0, 7)? as usize
            }
            "policy-softmax-temp" => {
                next.policy_softmax_temp = parse_float(name, value, 0.1, 10.0)?
            }
            "allowed-node-collisions" => {
                next.allowed_node_collisions = parse_int(name, value, 0, 1024)? as usize
            }
            "backpropagate-gamma" => {
                next.backpropagate_gamma = parse_float(name, value, -100.0, 100.0)?
            }
            "backpropagate-beta" => {
                next.backpropagate_beta = parse_float(name, value, 0.0, 100.0)?
            }
            "nncache" => next.nncache = parse_int(name, value, 0, 999_999_999)? as usize,
            "slowmover" => next.slowmover = parse_float(name, value, 0.0, 100.0)?,
            "move-overhead" => next.move_overhead = parse_int(name, value, 0, 10_000)?,
            "time-curve-peak" => next.time_curve_peak = parse_float(name, value, -1000.0, 1000.0)?,
            "time-curve-left-width" => {
                next.time_curve_left_width = parse_float(name, value, 0.0, 1000.0)?
            }
            "time-curve-right-width" => {
                next.time_curve_right_width = parse_float(name, value, 0.0, 1000.0)?
            }
            "backend" => next.backend = value.to_string(),
            "weights" => next.weights = value.to_string(),
            _ => return Err(OptionsError::UnknownOption(name.to_string())),
        }
        *self = next;
        Ok(())
    }

    /// Range checks for whole-struct loads.
    pub fn validate(&self) -> Result<(), OptionsError> {
        let check = |ok: bool, name: &str, value: String, reason: &str| {
            if ok {
                Ok(())
            } else {
                Err(OptionsError::InvalidValue {
                    name: name.to_string(),
                    value,
                    reason: reason.to_string(),
                })
            }
        };
        check(
            (1..=128).contains(&self.threads),
            "threads",
            self.threads.to_string(),
            "must be in 1..=128",
        )?;
        check(
            (1..=1024).contains(&self.minibatch_size),
            "minibatch-size",
            self.minibatch_size.to_string(),
            "must be in 1..=1024",
        )?;
        check(
            self.max_prefetch <= 1024,
            "max-prefetch",
            self.max_prefetch.to_string(),
            "must be at most 1024",
        )?;
        check(
            self.cache_history_length <= 7,
            "cache-history-length",
            self.cache_history_length.to_string(),
            "must be in 0..=7",
        )?;
        check(
            (0.1..=10.0).contains(&self.policy_softmax_temp),
            "policy-softmax-temp",
            self.policy_softmax_temp.to_string(),
            "must be in 0.1..=10",
        )?;
        check(
            self.nncache <= 999_999_999,
            "nncache",
            self.nncache.to_string(),
            "must be at most 999999999",
        )?;
        Ok(())
    }

    /// UCI `option` declaration lines, in announcement order.
    pub fn uci_option_lines(&self) -> Vec<String> {
        let spin = |name: &str, default: i64, min: i64, max: i64| {
            format!("option name {name} type spin default {default} min {min} max {max}")
        };
        let check = |name: &str, default: bool| {
            format!("option name {name} type check default {default}")
        };
        let string = |name: &str, default: &str| {
            format!("option name {name} type string default {default}")
        };
        let mut lines = vec![
            spin("threads", self.threads as i64, 1, 128),
            spin("minibatch-size", self.minibatch_size as i64, 1, 1024),
            spin("max-prefetch", self.max_prefetch as i64, 0, 1024),
            string("cpuct", &self.cpuct.to_string()),
            string("temperature", &self.temperature.to_string()),
            spin("tempdecay-moves", i64::from(self.tempdecay_moves), 0, 100),
            check("noise", self.noise),
            check("verbose-move-stats", self.verbose_move_stats),
            check("smart-pruning", self.smart_pruning),
            string("virtual-loss-bug", &self.virtual_loss_bug.to_string()),
            string("fpu-reduction", &self.fpu_reduction.to_string()),
            spin(
                "cache-history-length",
                self.cache_history_length as i64,
                0,
                7,
            ),
            string("policy-softmax-temp", &self.policy_softmax_temp.to_string()),
            spin(
                "allowed-node-collisions",
                self.allowed_node_collisions as i64,
                0,
                1024,
            ),
            string("backpropagate-gamma", &self.backpropagate_gamma.to_string()),
            string("backpropagate-beta", &self.backpropagate_beta.to_string()),
            spin("nncache", self.nncache as i64, 0, 999_999_999),
            string("slowmover", &self.slowmover.to_string()),
            spin("move-overhead", self.move_overhead, 0, 10_000),
            string("time-curve-peak", &self.time_curve_peak.to_string()),
            string("time-curve-left-width", &self.time_curve_left_width.to_string()),
            string(
                "time-curve-right-width",
                &self.time_curve_right_width.to_string(),
            ),
            string("weights", &self.weights),
        ];
        let backends = cinder_eval::registry::backends();
        if backends.is_empty() {
            warn!("no evaluator backends registered");
            lines.push(string("backend", &self.backend));
        } else {
            let vars: String = backends
                .iter()
                .map(|b| format!(" var {b}"))
                .collect();
            lines.push(format!(
                "option name backend type combo default {}{vars}",
                self.backend
            ));
        }
        lines
    }

    pub fn search_params(&self) -> Params {
        Params {
            cpuct: self.cpuct,
            minibatch_size: self.minibatch_size,
            max_prefetch_batch: self.max_prefetch,
            fpu_reduction: self.fpu_reduction,
            policy_softmax_temp: self.policy_softmax_temp,
            allowed_node_collisions: self.allowed_node_collisions,
            virtual_loss_bug: self.virtual_loss_bug,
            noise: self.noise,
            smart_pruning: self.smart_pruning,
            temperature: self.temperature,
            temp_decay_moves: self.tempdecay_moves,
            cache_history_length: self.cache_history_length,
            backprop_gamma: self.backpropagate_gamma,
            backprop_beta: self.backpropagate_beta,
            verbose_stats: self.verbose_move_stats,
            seed: None,
        }
    }
}

fn parse_int(name: &str, value: &str, min: i64, max: i64) -> Result<i64, OptionsError> {
    let parsed: i64 = value.parse().map_err(|_| OptionsError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
        reason: "not an integer".to_string(),
    })?;
    if !(min..=max).contains(&parsed) {
        return Err(OptionsError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            reason: format!("must be in {min}..={max}"),
        });
    }
    Ok(parsed)
}

fn parse_float(name: &str, value: &str, min: f32, max: f32) -> Result<f32, OptionsError> {
    let parsed: f32 = value.parse().map_err(|_| OptionsError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
        reason: "not a number".to_string(),
    })?;
    if !parsed.is_finite() || !(min..=max).contains(&parsed) {
        return Err(OptionsError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            reason: format!("must be in {min}..={max}"),
        });
    }
    Ok(parsed)
}

fn parse_bool(name: &str, value: &str) -> Result<bool, OptionsError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "on" | "1" => Ok(true),
        "false" | "off" | "0" => Ok(false),
        _ => Err(OptionsError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_announced_ranges() {
        let options = EngineOptions::default();
        options.validate().unwrap();
        assert_eq!(options.threads, 2);
        assert_eq!(options.minibatch_size, 256);
        assert_eq!(options.nncache, 200_000);
    }

    #[test]
    fn set_accepts_in_range_values() {
        let mut options = EngineOptions::default();
        options.set("threads", "8").unwrap();
        options.set("cpuct", "1.2").unwrap();
        options.set("noise", "true").unwrap();
        options.set("Smart-Pruning", "false").unwrap();
        assert_eq!(options.threads, 8);
        assert_eq!(options.cpuct, 1.2);
        assert!(options.noise);
        assert!(!options.smart_pruning);
    }

    #[test]
    fn set_rejects_and_keeps_previous_state() {
        let mut options = EngineOptions::default();
        assert!(options.set("threads", "0").is_err());
        assert!(options.set("threads", "129").is_err());
        assert!(options.set("threads", "many").is_err());
        assert!(options.set("hash", "64").is_err());
        assert_eq!(options.threads, 2);
    }

    #[test]
    fn toml_overrides_are_partial() {
        let options: EngineOptions =
            toml::from_str("threads = 4\nnoise = true\ncpuct = 2.5\n").unwrap();
        assert_eq!(options.threads, 4);
        assert!(options.noise);
        assert_eq!(options.cpuct, 2.5);
        // Everything else keeps its default.
        assert_eq!(options.minibatch_size, 256);
    }

    #[test]
    fn unknown_toml_keys_are_rejected() {
        assert!(toml::from_str::<EngineOptions>("hash = 64\n").is_err());
    }

    #[test]
    fn params_reflect_options() {
        let mut options = EngineOptions::default();
        options.set("cpuct", "2.0").unwrap();
        options.set("minibatch-size", "64").unwrap();
        let params = options.search_params();
        assert_eq!(params.cpuct, 2.0);
        assert_eq!(params.minibatch_size, 64);
        assert_eq!(params.cache_history_length, 7);
    }
}
