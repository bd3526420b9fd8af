//! Merge of user overrides into operator defaults
//!
//! Lists of named items (containers, volumes, volume mounts, env vars) are
//! merged by name: defaults keep their order, a same-named override updates
//! the default in place, and unmatched overrides are appended in their given
//! order. The merge never fails and is idempotent.

use std::collections::{BTreeMap, HashMap};

use k8s_openapi::api::core::v1::{Container, EnvVar, Volume, VolumeMount};

/// An item uniquely identified by name within its list
pub trait NamedItem {
    fn name(&self) -> &str;
}

impl NamedItem for Container {
    fn name(&self) -> &str {
        &self.name
    }
}

impl NamedItem for Volume {
    fn name(&self) -> &str {
        &self.name
    }
}

impl NamedItem for VolumeMount {
    fn name(&self) -> &str {
        &self.name
    }
}

impl NamedItem for EnvVar {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Field-level merge: fields set on `other` win, unset fields are kept
pub trait FieldMerge {
    fn merge_from(&mut self, other: Self);
}

macro_rules! merge_fields {
    ($target:ident, $other:ident, $($field:ident),+ $(,)?) => {
        $(
            if $other.$field.is_some() {
                $target.$field = $other.$field;
            }
        )+
    };
}

impl FieldMerge for Container {
    fn merge_from(&mut self, other: Self) {
        let target = self;
        if let Some(env) = other.env {
            let merged = merge_by_name(target.env.take().unwrap_or_default(), env);
            target.env = Some(merged);
        }
        if let Some(mounts) = other.volume_mounts {
            let merged = merge_mounts(target.volume_mounts.take().unwrap_or_default(), mounts);
            target.volume_mounts = Some(merged);
        }
        merge_fields!(
            target,
            other,
            args,
            command,
            env_from,
            image,
            image_pull_policy,
            lifecycle,
            liveness_probe,
            ports,
            readiness_probe,
            resize_policy,
            resources,
            restart_policy,
            security_context,
            startup_probe,
            stdin,
            stdin_once,
            termination_message_path,
            termination_message_policy,
            tty,
            volume_devices,
            working_dir,
        );
    }
}

/// Merge two lists by name with `combine` resolving a matched pair.
///
/// A name repeated within `overrides` is combined again at its first position.
fn merge_with<T, F>(defaults: Vec<T>, overrides: Vec<T>, mut combine: F) -> Vec<T>
where
    T: NamedItem,
    F: FnMut(&mut T, T),
{
    let mut merged = defaults;
    let mut index: HashMap<String, usize> = HashMap::with_capacity(merged.len());
    for (position, item) in merged.iter().enumerate() {
        index.entry(item.name().to_string()).or_insert(position);
    }

    for item in overrides {
        match index.get(item.name()).copied() {
            Some(position) => combine(&mut merged[position], item),
            None => {
                index.insert(item.name().to_string(), merged.len());
                merged.push(item);
            }
        }
    }
    merged
}

/// Merge by name, a matched override replacing the default whole
pub fn merge_by_name<T: NamedItem>(defaults: Vec<T>, overrides: Vec<T>) -> Vec<T> {
    merge_with(defaults, overrides, |slot, item| *slot = item)
}

/// Merge containers by name, a matched override merged field by field
pub fn merge_containers<T: NamedItem + FieldMerge>(defaults: Vec<T>, overrides: Vec<T>) -> Vec<T> {
    merge_with(defaults, overrides, |slot, item| slot.merge_from(item))
}

/// Append the items of `extra` whose name is not yet present
pub fn merge_missing<T: NamedItem>(items: Vec<T>, extra: Vec<T>) -> Vec<T> {
    merge_with(items, extra, |_, _| {})
}

/// Merge mounts by name, dropping defaults whose path an override mounts under another name
pub fn merge_mounts(
    defaults: Vec<VolumeMount>,
    overrides: Vec<VolumeMount>,
) -> Vec<VolumeMount> {
    let defaults = defaults
        .into_iter()
        .filter(|default| {
            !overrides
                .iter()
                .any(|o| o.mount_path == default.mount_path && o.name != default.name)
        })
        .collect();
    merge_by_name(defaults, overrides)
}

/// Append the mounts of `extra` whose name and path are both unused
pub fn merge_missing_mounts(
    items: Vec<VolumeMount>,
    extra: Vec<VolumeMount>,
) -> Vec<VolumeMount> {
    let extra = extra
        .into_iter()
        .filter(|mount| !items.iter().any(|m| m.mount_path == mount.mount_path))
        .collect();
    merge_missing(items, extra)
}

/// Key-wise map merge, the override winning
pub fn merge_maps(
    defaults: BTreeMap<String, String>,
    overrides: Option<&BTreeMap<String, String>>,
) -> BTreeMap<String, String> {
    let mut merged = defaults;
    if let Some(overrides) = overrides {
        merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged
}
