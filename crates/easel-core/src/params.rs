//! Effective generation-parameter resolution.
//!
//! A job may carry explicit values for the advanced parameters; the model
//! descriptor may carry defaults. Resolution is always: user value wins,
//! else the model default, else the parameter is omitted entirely. There is
//! deliberately no built-in numeric fallback for any of them -- an engine
//! that receives no `steps` uses its own default.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::status::JobType;

/// Strength applied to `variation` jobs that do not specify one.
pub const DEFAULT_VARIATION_STRENGTH: f64 = 0.75;

/// Steps implied by the coarse `quality` hint, used only on the CLI path
/// when no explicit or model-default `sample_steps` resolved.
const QUALITY_STEPS: &[(&str, u32)] = &[("standard", 25), ("hd", 40)];

/// Per-model generation defaults from the config document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationDefaults {
    pub cfg_scale: Option<f64>,
    pub sample_steps: Option<u32>,
    pub sampling_method: Option<String>,
    pub clip_skip: Option<u32>,
    /// `WxH`, e.g. `"512x512"`.
    pub size: Option<String>,
}

/// The user-supplied side of parameter resolution, lifted off a job row.
#[derive(Debug, Clone, Default)]
pub struct RequestedParams {
    pub size: Option<String>,
    pub seed: Option<i64>,
    pub batch_size: Option<u32>,
    pub sample_steps: Option<u32>,
    pub cfg_scale: Option<f64>,
    pub sampling_method: Option<String>,
    pub clip_skip: Option<u32>,
    pub strength: Option<f64>,
}

/// Fully resolved parameters as dispatched to an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveParams {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_steps: Option<u32>,
    pub cfg_scale: Option<f64>,
    pub sampling_method: Option<String>,
    pub clip_skip: Option<u32>,
    pub strength: Option<f64>,
    pub seed: Option<i64>,
    pub n: u32,
}

/// Resolve requested parameters against a model's defaults.
pub fn resolve(
    job_type: JobType,
    requested: &RequestedParams,
    defaults: &GenerationDefaults,
) -> Result<EffectiveParams, CoreError> {
    let size = requested
        .size
        .clone()
        .or_else(|| defaults.size.clone())
        .map(|s| parse_size(&s))
        .transpose()?;

    let strength = match requested.strength {
        Some(s) => {
            if !(0.0..=1.0).contains(&s) {
                return Err(CoreError::Validation(format!(
                    "strength must be within [0, 1], got {s}"
                )));
            }
            Some(s)
        }
        None if job_type == JobType::Variation => Some(DEFAULT_VARIATION_STRENGTH),
        None => None,
    };

    Ok(EffectiveParams {
        width: size.map(|(w, _)| w),
        height: size.map(|(_, h)| h),
        sample_steps: requested.sample_steps.or(defaults.sample_steps),
        cfg_scale: requested.cfg_scale.or(defaults.cfg_scale),
        sampling_method: requested
            .sampling_method
            .clone()
            .or_else(|| defaults.sampling_method.clone()),
        clip_skip: requested.clip_skip.or(defaults.clip_skip),
        strength,
        seed: requested.seed,
        n: requested.batch_size.unwrap_or(1).max(1),
    })
}

/// Steps implied by a `quality` hint, if the hint is known.
pub fn steps_for_quality(quality: &str) -> Option<u32> {
    QUALITY_STEPS
        .iter()
        .find(|(q, _)| *q == quality)
        .map(|(_, steps)| *steps)
}

/// The `--steps` value for a CLI invocation: resolved `sample_steps` first,
/// else the quality mapping, else nothing.
pub fn cli_steps(sample_steps: Option<u32>, quality: Option<&str>) -> Option<u32> {
    sample_steps.or_else(|| quality.and_then(steps_for_quality))
}

/// Parse a `WxH` size string into a `(width, height)` pair.
pub fn parse_size(size: &str) -> Result<(u32, u32), CoreError> {
    let invalid = || CoreError::Validation(format!("size must be 'WxH', got '{size}'"));

    let (w, h) = size.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
    let width: u32 = w.trim().parse().map_err(|_| invalid())?;
    let height: u32 = h.trim().parse().map_err(|_| invalid())?;

    if width == 0 || height == 0 {
        return Err(invalid());
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults_with_steps(steps: Option<u32>) -> GenerationDefaults {
        GenerationDefaults {
            sample_steps: steps,
            ..Default::default()
        }
    }

    // -- sample_steps fallback chain ----------------------------------------

    #[test]
    fn user_steps_win_over_model_default() {
        let requested = RequestedParams {
            sample_steps: Some(12),
            ..Default::default()
        };
        let eff = resolve(JobType::Generate, &requested, &defaults_with_steps(Some(30))).unwrap();
        assert_eq!(eff.sample_steps, Some(12));
    }

    #[test]
    fn model_default_steps_used_when_user_absent() {
        let eff = resolve(
            JobType::Generate,
            &RequestedParams::default(),
            &defaults_with_steps(Some(9)),
        )
        .unwrap();
        assert_eq!(eff.sample_steps, Some(9));
    }

    #[test]
    fn steps_absent_when_neither_side_provides() {
        let eff = resolve(
            JobType::Generate,
            &RequestedParams::default(),
            &defaults_with_steps(None),
        )
        .unwrap();
        assert_eq!(eff.sample_steps, None);
    }

    // -- strength -----------------------------------------------------------

    #[test]
    fn variation_defaults_strength() {
        let eff = resolve(
            JobType::Variation,
            &RequestedParams::default(),
            &GenerationDefaults::default(),
        )
        .unwrap();
        assert_eq!(eff.strength, Some(DEFAULT_VARIATION_STRENGTH));
    }

    #[test]
    fn non_variation_has_no_strength_default() {
        for jt in [JobType::Generate, JobType::Edit, JobType::Upscale] {
            let eff = resolve(jt, &RequestedParams::default(), &GenerationDefaults::default())
                .unwrap();
            assert_eq!(eff.strength, None, "{jt}");
        }
    }

    #[test]
    fn explicit_strength_passes_through() {
        let requested = RequestedParams {
            strength: Some(0.4),
            ..Default::default()
        };
        let eff = resolve(JobType::Edit, &requested, &GenerationDefaults::default()).unwrap();
        assert_eq!(eff.strength, Some(0.4));
    }

    #[test]
    fn out_of_range_strength_rejected() {
        let requested = RequestedParams {
            strength: Some(1.5),
            ..Default::default()
        };
        assert!(resolve(JobType::Variation, &requested, &GenerationDefaults::default()).is_err());
    }

    // -- size ---------------------------------------------------------------

    #[test]
    fn size_falls_back_to_model_default() {
        let defaults = GenerationDefaults {
            size: Some("768x512".into()),
            ..Default::default()
        };
        let eff = resolve(JobType::Generate, &RequestedParams::default(), &defaults).unwrap();
        assert_eq!((eff.width, eff.height), (Some(768), Some(512)));
    }

    #[test]
    fn parse_size_accepts_upper_and_lower_x() {
        assert_eq!(parse_size("512x512").unwrap(), (512, 512));
        assert_eq!(parse_size("1024X768").unwrap(), (1024, 768));
    }

    #[test]
    fn parse_size_rejects_garbage() {
        assert!(parse_size("512").is_err());
        assert!(parse_size("0x512").is_err());
        assert!(parse_size("wide x tall").is_err());
    }

    // -- quality mapping ----------------------------------------------------

    #[test]
    fn quality_mapping_known_values() {
        assert_eq!(steps_for_quality("standard"), Some(25));
        assert_eq!(steps_for_quality("hd"), Some(40));
        assert_eq!(steps_for_quality("ultra"), None);
    }

    #[test]
    fn cli_steps_prefers_resolved_steps_over_quality() {
        assert_eq!(cli_steps(Some(9), Some("hd")), Some(9));
        assert_eq!(cli_steps(None, Some("hd")), Some(40));
        assert_eq!(cli_steps(None, Some("unknown")), None);
        assert_eq!(cli_steps(None, None), None);
    }

    // -- batch size ---------------------------------------------------------

    #[test]
    fn batch_size_defaults_to_one() {
        let eff = resolve(
            JobType::Generate,
            &RequestedParams::default(),
            &GenerationDefaults::default(),
        )
        .unwrap();
        assert_eq!(eff.n, 1);
    }
}
