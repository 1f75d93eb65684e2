//! Connect-time resolution of managed references from the pool path.
//!
//! One traversal of the inventory tree yields every datacenter, compute
//! resource, pool, host, and distributed switch; the configured
//! `<datacenter>/<cluster>/<pool>` path is then matched case-insensitively
//! with first-observed fallbacks.

use crate::error::{VimError, VimResult};
use crate::property::{self, ObjectContent, PropValue};
use crate::types::{ClientConfig, ManagedRef};
use crate::vim::VimClient;

/// References recorded once per successful connect.
#[derive(Debug, Clone)]
pub struct ResolvedRefs {
    pub datacenter: ManagedRef,
    pub datacenter_name: String,
    pub vm_folder: ManagedRef,
    pub cluster: ManagedRef,
    pub cluster_name: String,
    pub pool: ManagedRef,
    pub dvs: Option<ManagedRef>,
    pub dvs_uuid: Option<String>,
    pub host: Option<ManagedRef>,
    pub network_system: Option<ManagedRef>,
}

/// Run the inventory traversal and resolve the configured pool path.
pub async fn resolve(
    vim: &VimClient,
    config: &ClientConfig,
    is_vcenter: bool,
) -> VimResult<ResolvedRefs> {
    let root = vim.content()?.root_folder.clone();
    let contents = vim
        .retrieve_properties(&property::inventory_filter(&root))
        .await?;
    resolve_from_contents(&contents, config, is_vcenter)
}

fn name_of(oc: &ObjectContent) -> &str {
    oc.text("name").unwrap_or("")
}

fn find_named<'a>(
    contents: &'a [ObjectContent],
    kind: impl Fn(&str) -> bool,
    name: &str,
) -> Option<&'a ObjectContent> {
    let mut candidates = contents.iter().filter(|oc| kind(&oc.obj.kind));
    if name.is_empty() {
        return candidates.next();
    }
    let mut first = None;
    for oc in candidates {
        if first.is_none() {
            first = Some(oc);
        }
        if name_of(oc).eq_ignore_ascii_case(name) {
            return Some(oc);
        }
    }
    first
}

/// Pure resolution over a traversal result; empty input aborts.
pub fn resolve_from_contents(
    contents: &[ObjectContent],
    config: &ClientConfig,
    is_vcenter: bool,
) -> VimResult<ResolvedRefs> {
    if contents.is_empty() {
        return Err(VimError::connection(
            "inventory traversal returned nothing; aborting initialization",
        ));
    }

    let mut parts = config.pool_path.split('/');
    let dc_name = parts.next().unwrap_or("");
    let cluster_name = parts.next().unwrap_or("");
    let pool_name = parts.next().unwrap_or("");

    let datacenter = find_named(contents, |k| k == "Datacenter", dc_name)
        .ok_or_else(|| VimError::not_found("no datacenter observed on endpoint"))?;
    let vm_folder = datacenter
        .reference("vmFolder")
        .ok_or_else(|| VimError::parse("datacenter has no vmFolder"))?
        .clone();

    let cluster = find_named(
        contents,
        |k| k == "ComputeResource" || k == "ClusterComputeResource",
        cluster_name,
    )
    .ok_or_else(|| VimError::not_found("no compute resource observed on endpoint"))?;

    let pool = select_pool(contents, cluster, pool_name, is_vcenter)
        .ok_or_else(|| VimError::not_found("no resource pool observed on endpoint"))?;

    let (dvs, dvs_uuid) = if !config.uplink.is_empty() && !config.uplink.starts_with("nsx.") {
        match find_named(contents, |k| k.ends_with("DistributedVirtualSwitch"), &config.uplink) {
            Some(oc) => (Some(oc.obj.clone()), oc.text("uuid").map(str::to_string)),
            None => (None, None),
        }
    } else {
        (None, None)
    };

    let (host, network_system) = if is_vcenter {
        (None, None)
    } else {
        let host = contents.iter().find(|oc| oc.obj.kind == "HostSystem");
        let ns = host.and_then(|oc| match oc.prop("configManager") {
            Some(PropValue::ConfigManager(cm)) => cm.network_system.clone(),
            _ => None,
        });
        (host.map(|oc| oc.obj.clone()), ns)
    };

    log::debug!(
        "resolved pool path '{}' -> dc={} cluster={} pool={}",
        config.pool_path,
        name_of(datacenter),
        name_of(cluster),
        pool,
    );

    Ok(ResolvedRefs {
        datacenter: datacenter.obj.clone(),
        datacenter_name: name_of(datacenter).to_string(),
        vm_folder,
        cluster: cluster.obj.clone(),
        cluster_name: name_of(cluster).to_string(),
        pool,
        dvs,
        dvs_uuid,
        host,
        network_system,
    })
}

fn select_pool(
    contents: &[ObjectContent],
    cluster: &ObjectContent,
    pool_name: &str,
    is_vcenter: bool,
) -> Option<ManagedRef> {
    if !pool_name.is_empty() {
        if let Some(named) = contents.iter().find(|oc| {
            oc.obj.kind == "ResourcePool" && name_of(oc).eq_ignore_ascii_case(pool_name)
        }) {
            return Some(named.obj.clone());
        }
    }

    // Descend into the cluster's root pool
    let root = cluster.reference("resourcePool")?.clone();
    if is_vcenter {
        // On a cluster endpoint, prefer the first child pool of the root
        if let Some(child) = contents.iter().find(|oc| {
            oc.obj.kind == "ResourcePool" && oc.reference("parent") == Some(&root)
        }) {
            return Some(child.obj.clone());
        }
    }
    Some(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{DynamicProperty, HostConfigManager};

    fn oc(kind: &str, value: &str, props: Vec<(&str, PropValue)>) -> ObjectContent {
        ObjectContent {
            obj: ManagedRef::new(kind, value),
            props: props
                .into_iter()
                .map(|(name, val)| DynamicProperty { name: name.into(), val })
                .collect(),
        }
    }

    fn text(s: &str) -> PropValue {
        PropValue::Text(s.into())
    }

    fn sample_inventory() -> Vec<ObjectContent> {
        vec![
            oc(
                "Datacenter",
                "dc-1",
                vec![
                    ("name", text("Lab")),
                    ("vmFolder", PropValue::Ref(ManagedRef::new("Folder", "group-v2"))),
                ],
            ),
            oc(
                "ClusterComputeResource",
                "domain-c7",
                vec![
                    ("name", text("Main")),
                    ("resourcePool", PropValue::Ref(ManagedRef::new("ResourcePool", "resgroup-root"))),
                ],
            ),
            oc(
                "ResourcePool",
                "resgroup-root",
                vec![("name", text("Resources"))],
            ),
            oc(
                "ResourcePool",
                "resgroup-9",
                vec![
                    ("name", text("labpool"))
                    ,("parent", PropValue::Ref(ManagedRef::new("ResourcePool", "resgroup-root"))),
                ],
            ),
            oc(
                "DistributedVirtualSwitch",
                "dvs-21",
                vec![("name", text("dvSwitch0")), ("uuid", text("50 2f ab"))],
            ),
            oc(
                "HostSystem",
                "host-4",
                vec![(
                    "configManager",
                    PropValue::ConfigManager(HostConfigManager {
                        network_system: Some(ManagedRef::new("HostNetworkSystem", "networkSystem-4")),
                    }),
                )],
            ),
        ]
    }

    fn config(pool_path: &str, uplink: &str) -> ClientConfig {
        ClientConfig {
            pool_path: pool_path.into(),
            uplink: uplink.into(),
            ..Default::default()
        }
    }

    #[test]
    fn empty_traversal_aborts() {
        let err = resolve_from_contents(&[], &config("a/b/c", ""), true).unwrap_err();
        assert!(err.message.contains("traversal"));
    }

    #[test]
    fn resolves_exact_path_case_insensitive() {
        let refs =
            resolve_from_contents(&sample_inventory(), &config("lab/main/LABPOOL", "dvSwitch0"), true)
                .unwrap();
        assert_eq!(refs.datacenter.value, "dc-1");
        assert_eq!(refs.cluster.value, "domain-c7");
        assert_eq!(refs.pool.value, "resgroup-9");
        assert_eq!(refs.vm_folder.value, "group-v2");
        assert_eq!(refs.dvs_uuid.as_deref(), Some("50 2f ab"));
    }

    #[test]
    fn falls_back_to_first_observed() {
        let refs =
            resolve_from_contents(&sample_inventory(), &config("nope/nada/missing", ""), true)
                .unwrap();
        assert_eq!(refs.datacenter_name, "Lab");
        assert_eq!(refs.cluster_name, "Main");
        // no pool of that name: first child of the cluster root pool
        assert_eq!(refs.pool.value, "resgroup-9");
    }

    #[test]
    fn standalone_host_uses_root_pool_and_network_system() {
        let refs =
            resolve_from_contents(&sample_inventory(), &config("Lab/Main", ""), false).unwrap();
        assert_eq!(refs.pool.value, "resgroup-root");
        assert_eq!(
            refs.network_system.as_ref().map(|r| r.value.as_str()),
            Some("networkSystem-4")
        );
        assert!(refs.dvs.is_none());
    }

    #[test]
    fn nsx_uplink_skips_dvs_resolution() {
        let refs = resolve_from_contents(
            &sample_inventory(),
            &config("Lab/Main/labpool", "nsx.overlay0"),
            true,
        )
        .unwrap();
        assert!(refs.dvs.is_none());
        assert!(refs.dvs_uuid.is_none());
    }
}
