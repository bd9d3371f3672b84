//! Link plan computation.
//!
//! Runs as a single-threaded pass once all resolutions are in, because
//! collision disambiguation needs a globally consistent view of the resolved
//! set. Emits the complete desired link set; the synchronizer turns it into
//! minimal filesystem mutations.

use std::collections::BTreeMap;
use std::path::PathBuf;

use marquee_model::{
    ExternalId, FileIdentity, LinkAxis, LinkPlanEntry, MetadataRecord,
    ResolutionEntry, record::sanitize_component,
};

use crate::settings::PlannerSettings;

/// Computes the desired symlink set for the resolved collection.
#[derive(Debug, Clone, Default)]
pub struct HierarchyPlanner {
    settings: PlannerSettings,
}

impl HierarchyPlanner {
    pub fn new(settings: PlannerSettings) -> Self {
        Self { settings }
    }

    /// Produce the full desired link set, one entry per (axis value, source
    /// file), with link paths relative to the link root.
    pub fn plan(
        &self,
        resolved: &[(ResolutionEntry, MetadataRecord)],
    ) -> Vec<LinkPlanEntry> {
        let grouped = group_by_record(resolved);
        let names = unique_display_names(&grouped);

        // BTreeMap keyed by link path: deterministic order and free dedup of
        // repeated axis values (e.g. a genre listed twice by the provider).
        let mut links: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();

        for (id, (record, files)) in &grouped {
            let name = &names[id];
            let multi_part = files.len() > 1;
            for axis in &self.settings.axes {
                for value in self.axis_values(*axis, record) {
                    let dir = value_dir(*axis, &value);
                    for file in files {
                        let leaf = leaf_name(name, file, multi_part);
                        links.insert(dir.join(leaf), file.path.clone());
                    }
                }
            }
        }

        links
            .into_iter()
            .map(|(link, target)| LinkPlanEntry::new(link, target))
            .collect()
    }

    fn axis_values(
        &self,
        axis: LinkAxis,
        record: &MetadataRecord,
    ) -> Vec<String> {
        let values: Vec<String> = match axis {
            LinkAxis::Genre => record.genres.clone(),
            LinkAxis::Year => vec![record.year.to_string()],
            LinkAxis::Actor => record
                .cast
                .iter()
                .take(self.settings.top_cast)
                .cloned()
                .collect(),
            LinkAxis::Director => record.directors.clone(),
            LinkAxis::Runtime => record
                .runtime_bucket(self.settings.runtime_interval)
                .into_iter()
                .collect(),
        };
        values
            .iter()
            .map(|v| sanitize_component(v.trim()))
            .filter(|v| !v.is_empty())
            .collect()
    }
}

fn group_by_record<'a>(
    resolved: &'a [(ResolutionEntry, MetadataRecord)],
) -> BTreeMap<ExternalId, (&'a MetadataRecord, Vec<&'a FileIdentity>)> {
    let mut grouped: BTreeMap<ExternalId, (&MetadataRecord, Vec<&FileIdentity>)> =
        BTreeMap::new();
    for (entry, record) in resolved {
        grouped
            .entry(record.id.clone())
            .or_insert((record, Vec::new()))
            .1
            .push(&entry.identity);
    }
    for (_, files) in grouped.values_mut() {
        files.sort_by(|a, b| a.path.cmp(&b.path));
    }
    grouped
}

/// Assign each record a display name unique across the whole plan.
///
/// Escalation: plain title; two distinct movies sharing a title get the year
/// appended; identical title and year fall back to a numeric suffix in
/// external-id order.
fn unique_display_names(
    grouped: &BTreeMap<ExternalId, (&MetadataRecord, Vec<&FileIdentity>)>,
) -> BTreeMap<ExternalId, String> {
    let mut by_title: BTreeMap<String, Vec<&MetadataRecord>> = BTreeMap::new();
    for (record, _) in grouped.values() {
        by_title
            .entry(sanitize_component(&record.title))
            .or_default()
            .push(record);
    }

    let mut names = BTreeMap::new();
    for (title, records) in by_title {
        if records.len() == 1 {
            names.insert(records[0].id.clone(), title);
            continue;
        }
        let mut by_year: BTreeMap<String, Vec<&MetadataRecord>> =
            BTreeMap::new();
        for record in records {
            by_year
                .entry(record.display_name())
                .or_default()
                .push(record);
        }
        for (with_year, mut records) in by_year {
            records.sort_by(|a, b| a.id.cmp(&b.id));
            for (idx, record) in records.iter().enumerate() {
                let name = if idx == 0 {
                    with_year.clone()
                } else {
                    format!("{} ({})", with_year, idx + 1)
                };
                names.insert(record.id.clone(), name);
            }
        }
    }
    names
}

fn value_dir(axis: LinkAxis, value: &str) -> PathBuf {
    let mut dir = PathBuf::from(axis.dir_name());
    if axis.groups_by_letter() {
        dir.push(letter_group(value));
    }
    dir.push(value);
    dir
}

/// First-letter bucket for person axes; names without a leading
/// alphanumeric land in `#`.
fn letter_group(value: &str) -> String {
    value
        .chars()
        .find(|c| c.is_alphanumeric())
        .map(|c| c.to_uppercase().to_string())
        .unwrap_or_else(|| "#".to_string())
}

/// Leaf filename for one link. Multi-part files sharing a record keep the
/// source file stem so each part gets a distinct link.
fn leaf_name(name: &str, file: &FileIdentity, multi_part: bool) -> String {
    let ext = file
        .path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    if multi_part {
        let stem = file
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("part");
        format!("{name} - {}{ext}", sanitize_component(stem))
    } else {
        format!("{name}{ext}")
    }
}
