//! Locating pod specs and containers inside workload objects.

use serde_json::Value;

use crate::patch::{Pointer, PointerBuf, PointerExt};

/// Container lists inside a pod spec, in the order rules visit them
pub const CONTAINER_LISTS: [&str; 2] = ["containers", "initContainers"];

/// Path of the pod spec for a workload kind, if the kind embeds one
pub fn pod_spec_path(kind: &str) -> Option<PointerBuf> {
    let segments: &[&str] = match kind {
        "Pod" => &["spec"],
        "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "Job" => {
            &["spec", "template", "spec"]
        }
        "CronJob" => &["spec", "jobTemplate", "spec", "template", "spec"],
        _ => return None,
    };
    Some(PointerBuf::from_tokens(segments.iter().copied()))
}

/// A container found in an object
#[derive(Debug, Clone, Copy)]
pub struct ContainerRef<'a> {
    /// Which list it lives in (`containers` or `initContainers`)
    pub list: &'static str,
    pub index: usize,
    pub value: &'a Value,
}

impl<'a> ContainerRef<'a> {
    pub fn name(&self) -> &'a str {
        self.value
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn image(&self) -> &'a str {
        self.value
            .get("image")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Path of this container given the pod spec path
    pub fn path(&self, pod_spec: &Pointer) -> PointerBuf {
        pod_spec.child(self.list).child(&self.index.to_string())
    }
}

/// Every container of the pod spec at `pod_spec`, regular containers first
pub fn containers<'a>(object: &'a Value, pod_spec: &Pointer) -> Vec<ContainerRef<'a>> {
    let Some(spec) = pod_spec.lookup(object) else {
        return Vec::new();
    };
    CONTAINER_LISTS
        .iter()
        .filter_map(|list| {
            spec.get(*list)
                .and_then(Value::as_array)
                .map(|items| (*list, items))
        })
        .flat_map(|(list, items)| {
            items
                .iter()
                .enumerate()
                .map(move |(index, value)| ContainerRef { list, index, value })
        })
        .collect()
}

/// Containers of a request object, located by kind
pub fn containers_of<'a>(object: &'a Value, kind: &str) -> Vec<ContainerRef<'a>> {
    match pod_spec_path(kind) {
        Some(path) => containers(object, &path),
        None => Vec::new(),
    }
}
