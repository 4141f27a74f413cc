use serde::{Deserialize, Serialize};

/// An upstream model capability. Exactly these four are GPU-resident and
/// therefore subject to [`crate`]-level mutual exclusion upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Prompt refinement and combination.
    Text,
    /// Image generation.
    ImageGen,
    /// Per-candidate vision scoring.
    Vision,
    /// Pairwise VLM tournament comparison.
    Vlm,
}

impl Capability {
    /// All capabilities, in a stable order, for iterating snapshots.
    pub const ALL: [Capability; 4] = [
        Capability::Text,
        Capability::ImageGen,
        Capability::Vision,
        Capability::Vlm,
    ];
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Capability::Text => "text",
            Capability::ImageGen => "image-gen",
            Capability::Vision => "vision",
            Capability::Vlm => "vlm",
        };
        f.write_str(s)
    }
}

/// Whether a capability is served by a remote API or a locally hosted model.
///
/// Remote families default to concurrent access; local families default to
/// serial access, since they typically share one GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    /// Hosted behind a remote API with its own concurrency budget.
    Remote,
    /// Hosted locally, typically sharing a single GPU.
    Local,
}

impl ProviderFamily {
    /// Default concurrency limit for a gate of this family.
    pub fn default_limit(self) -> usize {
        match self {
            ProviderFamily::Remote => 4,
            ProviderFamily::Local => 1,
        }
    }
}
