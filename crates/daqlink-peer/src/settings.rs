use std::collections::BTreeMap;

use serde::Serialize;

/// Server-side shadow of a client's settings tree.
///
/// XML is kept opaque: the whole-tree snapshot from `Infos`, the fragments
/// merged by `Info_xml` keyed by their path, and the loose key/value pairs
/// set by `Info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShadowSettings {
    snapshot: Option<String>,
    fragments: BTreeMap<String, String>,
    infos: BTreeMap<String, String>,
}

impl ShadowSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole tree. Fragments merged into the old tree are dropped.
    pub fn replace_snapshot(&mut self, xml: impl Into<String>) {
        self.snapshot = Some(xml.into());
        self.fragments.clear();
    }

    /// Merge a fragment at `path`.
    ///
    /// The first segment names the client's own root and is dropped; an
    /// empty remainder addresses the root, which replaces the snapshot.
    /// A fragment replaces any fragments stored below its own path.
    /// Returns the key the fragment was stored under.
    pub fn merge_fragment<S: AsRef<str>>(
        &mut self,
        path: &[S],
        xml: impl Into<String>,
    ) -> String {
        let key = path
            .iter()
            .skip(1)
            .map(|segment| segment.as_ref())
            .collect::<Vec<&str>>()
            .join("/");
        if key.is_empty() {
            self.replace_snapshot(xml);
        } else {
            let prefix = format!("{key}/");
            self.fragments
                .retain(|stored, _| stored != &key && !stored.starts_with(&prefix));
            self.fragments.insert(key.clone(), xml.into());
        }
        key
    }

    /// Add or overwrite an ad hoc info value.
    pub fn set_info(&mut self, label: impl Into<String>, value: impl Into<String>) {
        self.infos.insert(label.into(), value.into());
    }

    pub fn snapshot(&self) -> Option<&str> {
        self.snapshot.as_deref()
    }

    /// Fragment stored under `key` (path segments after the root, joined with `/`).
    pub fn fragment(&self, key: &str) -> Option<&str> {
        self.fragments.get(key).map(String::as_str)
    }

    pub fn fragments(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fragments.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn info(&self, label: &str) -> Option<&str> {
        self.infos.get(label).map(String::as_str)
    }

    pub fn infos(&self) -> impl Iterator<Item = (&str, &str)> {
        self.infos.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
