//! Datastore browsing with object-store (vSAN-style) dialect handling.
//!
//! Classic datastores are searched exactly as asked. Object-store
//! datastores expose top-level directories under an internal UUID, so the
//! caller-visible top level is translated via the namespace manager first;
//! the narrow single-folder search is known to fail on such stores, so the
//! search is forced recursive with a widened pattern and the UUID is
//! substituted back in the returned paths.

use crate::error::{VimError, VimErrorKind, VimResult};
use crate::property::{self, PropValue};
use crate::resolver::ResolvedRefs;
use crate::soap::{xml_blocks, xml_text};
use crate::tasks;
use crate::types::{DatastorePath, ManagedRef};
use crate::vim::VimClient;

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Mutex;

lazy_static! {
    /// Namespace-url → uuid-path memo; write-once per key, process-wide.
    static ref DSNS_MAP: Mutex<HashMap<String, String>> = Mutex::new(HashMap::new());
}

/// Widened pattern for forced-recursive object-store searches:
/// `*<extension>` of the requested file, or `*` when it has none.
fn widen_pattern(ds: &DatastorePath) -> String {
    let ext = ds.file_extension();
    if ext.is_empty() {
        "*".to_string()
    } else {
        format!("*{ext}")
    }
}

/// Pattern for classic datastores: the exact file, or `*` when absent.
fn exact_pattern(ds: &DatastorePath) -> String {
    if ds.file.is_empty() {
        "*".to_string()
    } else {
        ds.file.clone()
    }
}

/// Replace the UUID top level of a returned folder path with the
/// caller-visible name.
fn restore_top_level(folder: &str, uuid_dir: &str, top_level: &str) -> String {
    folder.replacen(uuid_dir, top_level, 1)
}

/// Flatten search results into `folderPath + '/' + file.path` entries.
fn parse_search_results(xml: &str) -> Vec<String> {
    let mut out = Vec::new();
    for block in xml_blocks(xml, "HostDatastoreBrowserSearchResults") {
        let folder = xml_text(&block, "folderPath")
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string();
        for file in xml_blocks(&block, "file") {
            if let Some(path) = xml_text(&file, "path") {
                out.push(format!("{folder}/{path}"));
            }
        }
    }
    out
}

struct DatastoreView {
    browser: ManagedRef,
    url: String,
    object_store: bool,
}

/// File and folder listing against the datastores of the resolved cluster.
pub struct DatastoreBrowser<'a> {
    vim: &'a VimClient,
    refs: &'a ResolvedRefs,
}

impl<'a> DatastoreBrowser<'a> {
    pub fn new(vim: &'a VimClient, refs: &'a ResolvedRefs) -> Self {
        Self { vim, refs }
    }

    async fn find_datastore(&self, name: &str) -> VimResult<DatastoreView> {
        let contents = self
            .vim
            .retrieve_properties(&property::cluster_datastores_filter(&self.refs.cluster))
            .await?;
        for oc in &contents {
            let summary = match oc.prop("summary") {
                Some(PropValue::DsSummary(s)) => s,
                _ => continue,
            };
            if summary.name != name {
                continue;
            }
            let browser = oc
                .reference("browser")
                .ok_or_else(|| VimError::storage(format!("datastore {name} has no browser")))?
                .clone();
            let object_store = match oc.prop("capability") {
                Some(PropValue::DsCapability(c)) => !c.top_level_directory_create,
                _ => false,
            };
            return Ok(DatastoreView { browser, url: summary.url.clone(), object_store });
        }
        Err(VimError::not_found(format!("datastore {name} not reachable from cluster")))
    }

    /// Translate the caller-visible top-level folder to its UUID directory,
    /// memoizing per namespace url.
    async fn uuid_dir_for(&self, view: &DatastoreView, top_level: &str) -> VimResult<String> {
        let namespace_url = format!("{}/{}", view.url.trim_end_matches('/'), top_level);
        if let Some(hit) = DSNS_MAP
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&namespace_url)
        {
            return Ok(hit.clone());
        }

        let uuid_path = self
            .vim
            .convert_namespace_path_to_uuid_path(&self.refs.datacenter, &namespace_url)
            .await?;
        let uuid_dir = uuid_path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&uuid_path)
            .to_string();
        log::debug!("namespace '{top_level}' -> '{uuid_dir}'");
        DSNS_MAP
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(namespace_url, uuid_dir.clone());
        Ok(uuid_dir)
    }

    /// List files under a datastore path.
    pub async fn get_files(&self, path: &str, recursive: bool) -> VimResult<Vec<String>> {
        let ds = DatastorePath::parse(path)
            .ok_or_else(|| VimError::invalid(format!("not a datastore path: {path}")))?;
        let view = self.find_datastore(&ds.datastore).await?;

        let (search_folder, pattern, recurse, uuid_sub) = if view.object_store
            && !ds.top_level_folder().is_empty()
        {
            let uuid_dir = self.uuid_dir_for(&view, ds.top_level_folder()).await?;
            let below = ds.below_top_level();
            let folder = if below.is_empty() {
                format!("[{}] {}", ds.datastore, uuid_dir)
            } else {
                format!("[{}] {}/{}", ds.datastore, uuid_dir, below)
            };
            (folder, widen_pattern(&ds), true, Some(uuid_dir))
        } else {
            (ds.folder(), exact_pattern(&ds), recursive, None)
        };

        let task = if recurse {
            self.vim
                .search_datastore_subfolders(&view.browser, &search_folder, &pattern)
                .await?
        } else {
            self.vim
                .search_datastore(&view.browser, &search_folder, &pattern)
                .await?
        };
        let info = tasks::task_result(tasks::wait_for_task(self.vim, &task).await?)
            .map_err(|e| {
                if e.kind == VimErrorKind::TaskError && e.message.contains("was not found") {
                    VimError::not_found(e.message)
                } else {
                    e
                }
            })?;

        let result_xml = info.result_xml.unwrap_or_default();
        let mut entries = parse_search_results(&result_xml);
        if let Some(uuid_dir) = uuid_sub {
            let top = ds.top_level_folder();
            entries = entries
                .into_iter()
                .map(|e| restore_top_level(&e, &uuid_dir, top))
                .collect();
        }
        Ok(entries)
    }

    /// Whether a datastore folder exists.
    pub async fn folder_exists(&self, folder: &str) -> VimResult<bool> {
        let probe = format!("{}/*", folder.trim_end_matches('/'));
        match self.get_files(&probe, false).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind == VimErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Whether a datastore file exists.
    pub async fn file_exists(&self, path: &str) -> VimResult<bool> {
        let ds = DatastorePath::parse(path)
            .ok_or_else(|| VimError::invalid(format!("not a datastore path: {path}")))?;
        match self.get_files(path, false).await {
            Ok(entries) => Ok(entries
                .iter()
                .any(|e| e.ends_with(&format!("/{}", ds.file)) || e == &ds.file)),
            Err(e) if e.kind == VimErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widened_pattern_uses_extension() {
        let ds = DatastorePath::parse("[vsan] ws1/box.vmdk").unwrap();
        assert_eq!(widen_pattern(&ds), "*.vmdk");
    }

    #[test]
    fn widened_pattern_without_extension_is_star() {
        let ds = DatastorePath::parse("[vsan] ws1/*").unwrap();
        assert_eq!(widen_pattern(&ds), "*");
    }

    #[test]
    fn exact_pattern_prefers_filename() {
        let ds = DatastorePath::parse("[ds1] isos/linux.iso").unwrap();
        assert_eq!(exact_pattern(&ds), "linux.iso");
        let folder_only = DatastorePath::parse("[ds1] isos/").unwrap();
        assert_eq!(exact_pattern(&folder_only), "*");
    }

    #[test]
    fn restores_uuid_top_level() {
        assert_eq!(
            restore_top_level("[vsan] 52ab-cdef/sub", "52ab-cdef", "ws1"),
            "[vsan] ws1/sub"
        );
        // only the first occurrence is the top level
        assert_eq!(
            restore_top_level("[vsan] 52ab/52ab", "52ab", "ws1"),
            "[vsan] ws1/52ab"
        );
    }

    #[test]
    fn parses_search_results() {
        let xml = r#"<returnval><info><result xsi:type="ArrayOfHostDatastoreBrowserSearchResults">
          <HostDatastoreBrowserSearchResults>
            <folderPath>[ds1] ws1/</folderPath>
            <file xsi:type="VmDiskFileInfo"><path>a.vmdk</path><fileSize>10</fileSize></file>
            <file xsi:type="FileInfo"><path>b.iso</path></file>
          </HostDatastoreBrowserSearchResults>
          <HostDatastoreBrowserSearchResults>
            <folderPath>[ds1] ws1/sub</folderPath>
            <file xsi:type="VmDiskFileInfo"><path>c.vmdk</path></file>
          </HostDatastoreBrowserSearchResults>
        </result></info></returnval>"#;
        let entries = parse_search_results(xml);
        assert_eq!(
            entries,
            vec!["[ds1] ws1/a.vmdk", "[ds1] ws1/b.iso", "[ds1] ws1/sub/c.vmdk"]
        );
    }

    #[test]
    fn parses_empty_results() {
        assert!(parse_search_results("<result/>").is_empty());
    }
}
