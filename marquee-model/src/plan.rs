use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Classification axis used to build one branch of the link hierarchy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LinkAxis {
    Genre,
    Year,
    Actor,
    Director,
    Runtime,
}

impl LinkAxis {
    /// Directory name of the axis branch under the link root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Genre => "genres",
            Self::Year => "years",
            Self::Actor => "actors",
            Self::Director => "directors",
            Self::Runtime => "runtime",
        }
    }

    /// Person axes get an extra first-letter directory level so a large
    /// collection does not produce thousands of siblings.
    pub fn groups_by_letter(&self) -> bool {
        matches!(self, Self::Actor | Self::Director)
    }

    /// The four axes from the core design, in stable order.
    pub const DEFAULT: &'static [LinkAxis] = &[
        LinkAxis::Genre,
        LinkAxis::Year,
        LinkAxis::Actor,
        LinkAxis::Director,
    ];
}

/// One desired symlink: where it lives (relative to the link root) and the
/// source file it must point at. Derived fresh on every planning pass and
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPlanEntry {
    pub link: PathBuf,
    pub target: PathBuf,
}

impl LinkPlanEntry {
    pub fn new(link: PathBuf, target: PathBuf) -> Self {
        Self { link, target }
    }
}
