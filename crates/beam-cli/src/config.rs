use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use beam_core::{Capability, FaceFixOptions, JobParams, ProviderFamily};
use beam_upstream::{ModelPricing, PricingTable, RateGateRegistry};

use crate::cli::Cli;

/// One model's entry in the on-disk pricing table JSON.
#[derive(Debug, Deserialize)]
struct PricingEntry {
    rate_per_unit: f64,
    #[serde(default)]
    per_image: f64,
}

/// Load a pricing table from a JSON file shaped
/// `{"model-id": {"rate_per_unit": ..., "per_image": ...}}`. `per_image` is
/// optional and defaults to 0 for models that are never used for image
/// generation. A missing `--pricing-table` flag yields an all-zero table
/// rather than an error; a present-but-unparseable file is a fatal init
/// error (spec's "unparseable pricing table" exit condition).
pub fn load_pricing_table(path: Option<&Path>) -> Result<PricingTable> {
    let Some(path) = path else {
        return Ok(PricingTable::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading pricing table {}", path.display()))?;
    let entries: HashMap<String, PricingEntry> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing pricing table {}", path.display()))?;
    let rates = entries
        .into_iter()
        .map(|(model, entry)| {
            (
                model,
                ModelPricing {
                    rate_per_unit: entry.rate_per_unit,
                    per_image: entry.per_image,
                },
            )
        })
        .collect();
    Ok(PricingTable::new(rates))
}

fn parse_capability(s: &str) -> Result<Capability> {
    match s {
        "text" => Ok(Capability::Text),
        "image-gen" | "imagegen" | "image_gen" => Ok(Capability::ImageGen),
        "vision" => Ok(Capability::Vision),
        "vlm" => Ok(Capability::Vlm),
        other => bail!("unknown capability `{other}` (expected text, image-gen, vision, vlm)"),
    }
}

fn parse_family(s: &str) -> Result<ProviderFamily> {
    match s {
        "remote" => Ok(ProviderFamily::Remote),
        "local" => Ok(ProviderFamily::Local),
        other => bail!("unknown provider family `{other}` (expected remote, local)"),
    }
}

/// Parse `--provider-family capability=family` entries into the map
/// `JobParams.provider_families` expects (keyed by the capability's string
/// form, since `JobParams` is transport-facing and avoids a `beam-core` ->
/// `clap` dependency).
pub fn parse_provider_families(entries: &[String]) -> Result<HashMap<String, ProviderFamily>> {
    let mut map = HashMap::new();
    for entry in entries {
        let (capability, family) = entry
            .split_once('=')
            .with_context(|| format!("malformed --provider-family entry `{entry}` (expected capability=family)"))?;
        let capability = parse_capability(capability.trim())?;
        let family = parse_family(family.trim())?;
        map.insert(capability.to_string(), family);
    }
    Ok(map)
}

/// Parse `--rate-limit capability:family=limit` entries and apply them to
/// `registry`, pre-creating and overriding the named gates before the first
/// job runs.
pub fn apply_rate_limit_overrides(registry: &RateGateRegistry, entries: &[String]) -> Result<()> {
    for entry in entries {
        let (selector, limit) = entry
            .split_once('=')
            .with_context(|| format!("malformed --rate-limit entry `{entry}` (expected capability:family=limit)"))?;
        let (capability, family) = selector
            .split_once(':')
            .with_context(|| format!("malformed --rate-limit selector `{selector}` (expected capability:family)"))?;
        let capability = parse_capability(capability.trim())?;
        let family = parse_family(family.trim())?;
        let limit: usize = limit
            .trim()
            .parse()
            .with_context(|| format!("invalid --rate-limit limit in `{entry}`"))?;
        registry.gate_for(capability, family).set_limit(limit);
    }
    Ok(())
}

/// Build a validated [`JobParams`] from the parsed CLI. Validation itself
/// happens later at submit time (`Router::submit_job`); this only shapes
/// the request.
pub fn job_params_from_cli(cli: &Cli) -> Result<JobParams> {
    let provider_families = parse_provider_families(&cli.provider_family)?;

    let face_fix = if cli.fix_faces || cli.restoration_strength.is_some() || cli.face_upscale.is_some() {
        Some(FaceFixOptions {
            fix_faces: cli.fix_faces,
            restoration_strength: cli.restoration_strength,
            face_upscale: cli.face_upscale,
        })
    } else {
        None
    };

    Ok(JobParams {
        prompt: cli.prompt.clone(),
        n: cli.n,
        m: cli.m,
        max_iterations: cli.max_iterations,
        alpha: cli.alpha,
        temperature: cli.temperature,
        descriptiveness: cli.descriptiveness,
        ensemble_size: cli.ensemble_size,
        ranking_mode: cli.ranking_mode.into(),
        models: HashMap::new(),
        provider_families,
        face_fix,
        provider_options: serde_json::Value::Null,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_family_overrides() {
        let entries = vec!["image-gen=local".to_string(), "text=remote".to_string()];
        let map = parse_provider_families(&entries).unwrap();
        assert_eq!(map.get("image-gen"), Some(&ProviderFamily::Local));
        assert_eq!(map.get("text"), Some(&ProviderFamily::Remote));
    }

    #[test]
    fn rejects_malformed_provider_family_entry() {
        let entries = vec!["image-gen-local".to_string()];
        assert!(parse_provider_families(&entries).is_err());
    }

    #[test]
    fn applies_rate_limit_overrides() {
        let registry = RateGateRegistry::new();
        apply_rate_limit_overrides(&registry, &["text:remote=8".to_string()]).unwrap();
        let gate = registry.gate_for(Capability::Text, ProviderFamily::Remote);
        assert_eq!(gate.limit(), 8);
    }

    #[test]
    fn missing_pricing_table_path_yields_empty_table() {
        let table = load_pricing_table(None).unwrap();
        assert_eq!(table.estimate("anything", 1000), 0.0);
    }
}
