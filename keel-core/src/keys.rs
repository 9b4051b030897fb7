//! Coordination store key layout
//!
//! Pipelines and kill markers live in sibling namespaces under a configured
//! root:
//!
//! ```text
//! <root>/pipelines/<pipeline-id>
//! <root>/killer/<pipeline-id>
//! ```

use serde::Serialize;

const PIPELINES_SEGMENT: &str = "pipelines";
const KILLER_SEGMENT: &str = "killer";

/// Namespace prefixes derived from a configured root
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Namespaces {
    pub root: String,
    pub pipelines: String,
    pub killer: String,
}

impl Namespaces {
    /// Builds the namespace layout under `root`
    ///
    /// Trailing slashes on the root are ignored.
    pub fn new(root: &str) -> Self {
        let root = root.trim_end_matches('/').to_string();
        Self {
            pipelines: format!("{}/{}", root, PIPELINES_SEGMENT),
            killer: format!("{}/{}", root, KILLER_SEGMENT),
            root,
        }
    }

    /// Key holding the pipeline record
    pub fn pipeline_key(&self, pipeline_id: &str) -> String {
        format!("{}/{}", self.pipelines, pipeline_id)
    }

    /// Key holding the kill marker for a pipeline
    pub fn kill_key(&self, pipeline_id: &str) -> String {
        format!("{}/{}", self.killer, pipeline_id)
    }

    /// Prefix used when scanning or watching the pipelines namespace
    pub fn pipelines_prefix(&self) -> String {
        format!("{}/", self.pipelines)
    }

    /// Prefix used when scanning or watching the kill namespace
    pub fn killer_prefix(&self) -> String {
        format!("{}/", self.killer)
    }
}

impl Default for Namespaces {
    fn default() -> Self {
        Self::new("/keel")
    }
}

/// Extracts the identifier following `prefix` in `key`
///
/// Returns `None` when the key is outside the prefix or names the prefix
/// itself.
pub fn id_from_key<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(prefix)
        .map(|rest| rest.trim_start_matches('/'))
        .filter(|id| !id.is_empty())
}
