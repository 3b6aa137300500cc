//! Data-driven feature manifests.
//!
//! A feature ("gaussian blur") is declared as a manifest: either a single logical kernel
//! or an ordered list of passes wired together through named intermediates. Adding a
//! multi-pass feature is a data change, not an engine change — the scheduler
//! ([`scheduler`]) turns the declaration into graph nodes at compile time.

pub mod scheduler;

use std::collections::{BTreeMap, BTreeSet};

use crate::foundation::error::{WeftError, WeftResult};
use crate::graph::Params;

fn default_external_inputs() -> Vec<String> {
    vec!["source".to_owned()]
}

/// One pass of a multi-pass feature.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct PassDecl {
    /// Pass name, unique within the feature.
    pub name: String,
    /// Logical kernel this pass dispatches.
    pub kernel: String,
    /// Named inputs: external input names or earlier passes' outputs.
    pub inputs: Vec<String>,
    /// Named intermediate this pass produces. Exactly one pass must produce `output`.
    pub output: String,
    /// Pass-level parameter overrides.
    #[serde(default)]
    pub params: Params,
}

/// Body of a feature: a single kernel or an ordered pass list.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ManifestBody {
    /// One logical kernel consuming the external inputs directly.
    Kernel {
        /// The logical kernel name.
        kernel: String,
    },
    /// Multiple passes wired through named intermediates.
    Passes {
        /// The pass list, in declaration order.
        passes: Vec<PassDecl>,
    },
}

/// A declared feature.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct FeatureManifest {
    /// Stable feature id, referenced by [`crate::timeline::EffectCall`].
    pub feature: String,
    /// Display category ("filter", "grade", ...). Informational.
    #[serde(default)]
    pub category: String,
    /// Default parameter values, overridable per call site.
    #[serde(default)]
    pub params: Params,
    /// External input names the caller binds. Defaults to `["source"]`.
    #[serde(default = "default_external_inputs")]
    pub external_inputs: Vec<String>,
    /// The kernel or pass list.
    #[serde(flatten)]
    pub body: ManifestBody,
}

impl FeatureManifest {
    /// Structural validation: pass output names unique, exactly one `output` producer,
    /// no pass shadowing an external input.
    pub fn validate(&self) -> WeftResult<()> {
        let ManifestBody::Passes { passes } = &self.body else {
            return Ok(());
        };
        if passes.is_empty() {
            return Err(WeftError::validation(format!(
                "feature '{}' declares an empty pass list",
                self.feature
            )));
        }
        let mut seen = BTreeSet::new();
        let mut output_producers = 0usize;
        for pass in passes {
            if !seen.insert(pass.output.as_str()) {
                return Err(WeftError::validation(format!(
                    "feature '{}': intermediate '{}' is produced twice",
                    self.feature, pass.output
                )));
            }
            if self.external_inputs.iter().any(|e| e == &pass.output) {
                return Err(WeftError::validation(format!(
                    "feature '{}': pass '{}' shadows external input '{}'",
                    self.feature, pass.name, pass.output
                )));
            }
            if pass.output == "output" {
                output_producers += 1;
            }
        }
        if output_producers != 1 {
            return Err(WeftError::validation(format!(
                "feature '{}': exactly one pass must produce 'output', found {}",
                self.feature, output_producers
            )));
        }
        Ok(())
    }
}

/// Manifest store, keyed by feature id.
#[derive(Clone, Debug, Default)]
pub struct ManifestSet {
    by_id: BTreeMap<String, FeatureManifest>,
}

impl ManifestSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in features: a two-pass separable blur and the single-kernel grades.
    pub fn with_builtin_features() -> Self {
        let mut set = Self::new();
        let builtin = serde_json::json!([
            {
                "feature": "blur",
                "category": "filter",
                "params": { "radius_px": 4.0 },
                "passes": [
                    { "name": "horizontal", "kernel": "blur.horizontal",
                      "inputs": ["source"], "output": "tmp" },
                    { "name": "vertical", "kernel": "blur.vertical",
                      "inputs": ["tmp"], "output": "output" }
                ]
            },
            {
                "feature": "exposure",
                "category": "grade",
                "params": { "stops": 0.0 },
                "kernel": "grade.exposure"
            },
            {
                "feature": "invert",
                "category": "grade",
                "kernel": "grade.invert"
            }
        ]);
        // Built-in table is authored inline and structurally valid.
        if let Ok(text) = serde_json::to_string(&builtin) {
            let _ = set.merge_json(&text);
        }
        debug_assert!(set.get("blur").is_some());
        set
    }

    /// Parse a JSON array of manifests and merge it in, validating each. Later entries
    /// replace earlier ones with the same feature id.
    pub fn merge_json(&mut self, json: &str) -> WeftResult<()> {
        let parsed: Vec<FeatureManifest> = serde_json::from_str(json)
            .map_err(|e| WeftError::validation(format!("manifest parse: {e}")))?;
        for manifest in parsed {
            manifest.validate()?;
            self.by_id.insert(manifest.feature.clone(), manifest);
        }
        Ok(())
    }

    /// Insert a single manifest after validating it.
    pub fn insert(&mut self, manifest: FeatureManifest) -> WeftResult<()> {
        manifest.validate()?;
        self.by_id.insert(manifest.feature.clone(), manifest);
        Ok(())
    }

    /// Look up a feature by id.
    pub fn get(&self, feature: &str) -> Option<&FeatureManifest> {
        self.by_id.get(feature)
    }

    /// Registered feature ids, sorted.
    pub fn feature_ids(&self) -> impl Iterator<Item = &str> {
        self.by_id.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_features_parse_and_validate() {
        let set = ManifestSet::with_builtin_features();
        let blur = set.get("blur").unwrap();
        assert!(matches!(&blur.body, ManifestBody::Passes { passes } if passes.len() == 2));
        assert!(matches!(
            &set.get("exposure").unwrap().body,
            ManifestBody::Kernel { .. }
        ));
        assert_eq!(blur.external_inputs, vec!["source".to_owned()]);
    }

    #[test]
    fn duplicate_intermediate_name_is_rejected() {
        let mut set = ManifestSet::new();
        let err = set
            .merge_json(
                r#"[{ "feature": "bad", "passes": [
                    { "name": "a", "kernel": "grade.invert", "inputs": ["source"], "output": "x" },
                    { "name": "b", "kernel": "grade.invert", "inputs": ["x"], "output": "x" }
                ]}]"#,
            )
            .unwrap_err();
        assert!(err.to_string().contains("produced twice"));
    }

    #[test]
    fn a_feature_must_produce_output() {
        let mut set = ManifestSet::new();
        let err = set
            .merge_json(
                r#"[{ "feature": "bad", "passes": [
                    { "name": "a", "kernel": "grade.invert", "inputs": ["source"], "output": "x" }
                ]}]"#,
            )
            .unwrap_err();
        assert!(err.to_string().contains("output"));
    }

    #[test]
    fn later_manifests_replace_earlier_ones() {
        let mut set = ManifestSet::with_builtin_features();
        set.merge_json(r#"[{ "feature": "invert", "kernel": "grade.exposure" }]"#)
            .unwrap();
        assert!(matches!(
            &set.get("invert").unwrap().body,
            ManifestBody::Kernel { kernel } if kernel == "grade.exposure"
        ));
    }
}
