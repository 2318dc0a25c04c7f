//! The subset of the ACI image manifest the store needs to understand:
//! the image name, its labels, and its dependencies. Unknown manifest
//! fields are ignored on parse.

use serde::{Deserialize, Serialize};

/// A name/value pair attached to an image (`version`, `os`, `arch`, ...).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A dependency on another image, by name (optionally pinned to an exact
/// image id) plus label constraints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    #[serde(rename = "imageName")]
    pub image_name: String,
    #[serde(rename = "imageID", default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
}

/// An image manifest as stored in the manifest store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    /// Hierarchical app identifier, e.g. `example.com/worker`.
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
}

impl ImageManifest {
    /// The value of the named label, if present.
    #[must_use]
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }

    pub(crate) fn has_label(&self, name: &str, value: &str) -> bool {
        self.labels.iter().any(|l| l.name == name && l.value == value)
    }
}
