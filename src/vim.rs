//! Transport-level client against the vim SOAP endpoint.
//!
//! One `VimClient` wraps one authenticated session: request/response,
//! session cookie, fault state. Long operations return the `ManagedRef` of
//! a Task object which callers poll via `retrieve_properties`.

use crate::error::{VimError, VimResult};
use crate::property::{self, ObjectContent};
use crate::soap;
use crate::types::{ClientConfig, ManagedRef};

use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

/// The root catalog object returned at session bootstrap.
#[derive(Debug, Clone)]
pub struct ServiceContent {
    pub root_folder: ManagedRef,
    pub property_collector: ManagedRef,
    pub session_manager: ManagedRef,
    pub file_manager: Option<ManagedRef>,
    pub virtual_disk_manager: Option<ManagedRef>,
    pub datastore_namespace_manager: Option<ManagedRef>,
    pub api_type: String,
    pub full_name: String,
}

impl ServiceContent {
    pub fn is_vcenter(&self) -> bool {
        self.api_type == "VirtualCenter"
    }

    fn parse(xml: &str) -> VimResult<Self> {
        let block = soap::xml_block(xml, "returnval")
            .ok_or_else(|| VimError::parse("service content missing returnval"))?;
        let require = |tag: &str| {
            property::parse_ref_block(&block, tag)
                .ok_or_else(|| VimError::parse(format!("service content missing {tag}")))
        };
        let about = soap::xml_block(&block, "about").unwrap_or_default();
        Ok(Self {
            root_folder: require("rootFolder")?,
            property_collector: require("propertyCollector")?,
            session_manager: require("sessionManager")?,
            file_manager: property::parse_ref_block(&block, "fileManager"),
            virtual_disk_manager: property::parse_ref_block(&block, "virtualDiskManager"),
            datastore_namespace_manager: property::parse_ref_block(&block, "datastoreNamespaceManager"),
            api_type: soap::xml_text(&about, "apiType").unwrap_or_default(),
            full_name: soap::xml_text(&about, "fullName").unwrap_or_default(),
        })
    }
}

/// Console ticket returned by `acquire_ticket`.
#[derive(Debug, Clone)]
pub struct TicketInfo {
    pub ticket: String,
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// SOAP session client for one endpoint.
pub struct VimClient {
    http: Client,
    endpoint: String,
    cookie: Mutex<Option<String>>,
    faulted: AtomicBool,
    content: OnceLock<ServiceContent>,
    debug_verbose: bool,
}

impl VimClient {
    /// Build a new client from config (does NOT open a session yet).
    pub fn new(config: &ClientConfig) -> VimResult<Self> {
        let http = Client::builder()
            .danger_accept_invalid_certs(config.ignore_certificate_errors)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VimError::connection(format!("Failed to build HTTP client: {e}")))?;

        let endpoint = if config.url.ends_with("/sdk") {
            config.url.clone()
        } else {
            format!("{}/sdk", config.url.trim_end_matches('/'))
        };

        Ok(Self {
            http,
            endpoint,
            cookie: Mutex::new(None),
            faulted: AtomicBool::new(false),
            content: OnceLock::new(),
            debug_verbose: config.debug_verbose,
        })
    }

    /// Whether a transport fault or busy fault has been observed.
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Relaxed)
    }

    /// Service content; only available after [`VimClient::connect`].
    pub fn content(&self) -> VimResult<&ServiceContent> {
        self.content
            .get()
            .ok_or_else(|| VimError::auth("Not connected — no service content"))
    }

    // ── Session ─────────────────────────────────────────────────────

    /// Bootstrap the session: retrieve service content, then log in.
    pub async fn connect(&self, user: &str, password: &str) -> VimResult<&ServiceContent> {
        let body = "<RetrieveServiceContent xmlns=\"urn:vim25\">\
                    <_this type=\"ServiceInstance\">ServiceInstance</_this>\
                    </RetrieveServiceContent>";
        let xml = self.call("RetrieveServiceContent", body.to_string()).await?;
        let content = ServiceContent::parse(&xml)?;
        log::info!("Connected to {} ({})", self.endpoint, content.full_name);

        let login = format!(
            "<Login xmlns=\"urn:vim25\">{}{}{}</Login>",
            content.session_manager.xml("_this"),
            soap::elem("userName", user),
            soap::elem("password", password),
        );
        let resp = self.post_envelope(&login).await?;
        let status = resp.status();
        if let Some(cookie) = resp
            .headers()
            .get(reqwest::header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
        {
            let pair = cookie.split(';').next().unwrap_or(cookie).to_string();
            *self.cookie.lock().unwrap_or_else(|p| p.into_inner()) = Some(pair);
        }
        let text = resp.text().await.map_err(VimError::from)?;
        if let Some(fault) = soap::fault_string(&text) {
            return Err(VimError::auth(format!("Login failed: {fault}")));
        }
        if !status.is_success() {
            return Err(VimError::auth(format!("Login failed with HTTP {status}")));
        }

        let _ = self.content.set(content);
        self.content()
    }

    /// Terminate the session server-side; errors are ignored.
    pub async fn logout(&self) {
        if let Ok(content) = self.content() {
            let body = format!(
                "<Logout xmlns=\"urn:vim25\">{}</Logout>",
                content.session_manager.xml("_this")
            );
            let _ = self.call("Logout", body).await;
        }
        *self.cookie.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    // ── Request plumbing ────────────────────────────────────────────

    async fn post_envelope(&self, body: &str) -> VimResult<reqwest::Response> {
        let mut req = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", "urn:vim25/6.7")
            .body(soap::envelope(body));
        let cookie = self.cookie.lock().unwrap_or_else(|p| p.into_inner()).clone();
        if let Some(c) = cookie {
            req = req.header(reqwest::header::COOKIE, c);
        }
        req.send().await.map_err(|e| {
            self.faulted.store(true, Ordering::Relaxed);
            VimError::from(e)
        })
    }

    /// Issue one operation; returns the response body or a classified fault.
    pub async fn call(&self, op: &str, body: String) -> VimResult<String> {
        if self.debug_verbose {
            log::trace!("vim call {op}: {body}");
        }
        let resp = self.post_envelope(&body).await?;
        let status = resp.status();
        let text = resp.text().await.map_err(VimError::from)?;

        if let Some(fault) = soap::fault_string(&text) {
            let err = classify_fault(&text, &fault);
            if err.kind == crate::error::VimErrorKind::Busy {
                self.faulted.store(true, Ordering::Relaxed);
            }
            log::debug!("vim {op} fault: {fault}");
            return Err(err);
        }
        if !status.is_success() {
            self.faulted.store(true, Ordering::Relaxed);
            return Err(VimError::connection(format!(
                "vim {op} failed with HTTP {status}"
            )));
        }
        Ok(text)
    }

    /// Issue an operation whose returnval is a Task reference.
    pub async fn call_task(&self, op: &str, body: String) -> VimResult<ManagedRef> {
        let xml = self.call(op, body).await?;
        property::parse_ref_block(&xml, "returnval")
            .ok_or_else(|| VimError::parse(format!("{op} returned no task reference")))
    }

    // ── Property collector ──────────────────────────────────────────

    /// `RetrieveProperties` with a prebuilt `<specSet>` filter.
    pub async fn retrieve_properties(&self, spec_set: &str) -> VimResult<Vec<ObjectContent>> {
        let pc = &self.content()?.property_collector;
        let body = format!(
            "<RetrieveProperties xmlns=\"urn:vim25\">{}{spec_set}</RetrieveProperties>",
            pc.xml("_this")
        );
        let xml = self.call("RetrieveProperties", body).await?;
        Ok(property::parse_object_contents(&xml))
    }

    // ── Power / snapshot / config ───────────────────────────────────

    pub async fn power_on_vm(&self, vm: &ManagedRef) -> VimResult<ManagedRef> {
        let body = format!(
            "<PowerOnVM_Task xmlns=\"urn:vim25\">{}</PowerOnVM_Task>",
            vm.xml("_this")
        );
        self.call_task("PowerOnVM_Task", body).await
    }

    pub async fn power_off_vm(&self, vm: &ManagedRef) -> VimResult<ManagedRef> {
        let body = format!(
            "<PowerOffVM_Task xmlns=\"urn:vim25\">{}</PowerOffVM_Task>",
            vm.xml("_this")
        );
        self.call_task("PowerOffVM_Task", body).await
    }

    pub async fn create_snapshot(
        &self,
        vm: &ManagedRef,
        name: &str,
        description: &str,
    ) -> VimResult<ManagedRef> {
        let body = format!(
            "<CreateSnapshot_Task xmlns=\"urn:vim25\">{}{}{}\
             <memory>false</memory><quiesce>false</quiesce></CreateSnapshot_Task>",
            vm.xml("_this"),
            soap::elem("name", name),
            soap::elem("description", description),
        );
        self.call_task("CreateSnapshot_Task", body).await
    }

    pub async fn remove_snapshot(
        &self,
        snapshot: &ManagedRef,
        remove_children: bool,
        consolidate: bool,
    ) -> VimResult<ManagedRef> {
        let body = format!(
            "<RemoveSnapshot_Task xmlns=\"urn:vim25\">{}\
             <removeChildren>{remove_children}</removeChildren>\
             <consolidate>{consolidate}</consolidate></RemoveSnapshot_Task>",
            snapshot.xml("_this"),
        );
        self.call_task("RemoveSnapshot_Task", body).await
    }

    pub async fn revert_to_current_snapshot(&self, vm: &ManagedRef) -> VimResult<ManagedRef> {
        let body = format!(
            "<RevertToCurrentSnapshot_Task xmlns=\"urn:vim25\">{}</RevertToCurrentSnapshot_Task>",
            vm.xml("_this")
        );
        self.call_task("RevertToCurrentSnapshot_Task", body).await
    }

    /// Reconfigure with a prebuilt `VirtualMachineConfigSpec` body.
    pub async fn reconfig_vm(&self, vm: &ManagedRef, spec_inner: &str) -> VimResult<ManagedRef> {
        let body = format!(
            "<ReconfigVM_Task xmlns=\"urn:vim25\">{}<spec>{spec_inner}</spec></ReconfigVM_Task>",
            vm.xml("_this"),
        );
        self.call_task("ReconfigVM_Task", body).await
    }

    pub async fn create_vm(
        &self,
        folder: &ManagedRef,
        config_inner: &str,
        pool: &ManagedRef,
    ) -> VimResult<ManagedRef> {
        let body = format!(
            "<CreateVM_Task xmlns=\"urn:vim25\">{}<config>{config_inner}</config>{}</CreateVM_Task>",
            folder.xml("_this"),
            pool.xml("pool"),
        );
        self.call_task("CreateVM_Task", body).await
    }

    pub async fn unregister_vm(&self, vm: &ManagedRef) -> VimResult<()> {
        let body = format!(
            "<UnregisterVM xmlns=\"urn:vim25\">{}</UnregisterVM>",
            vm.xml("_this")
        );
        self.call("UnregisterVM", body).await.map(|_| ())
    }

    /// Destroy a managed entity (used for orphaned dv port groups).
    pub async fn destroy(&self, obj: &ManagedRef) -> VimResult<ManagedRef> {
        let body = format!(
            "<Destroy_Task xmlns=\"urn:vim25\">{}</Destroy_Task>",
            obj.xml("_this")
        );
        self.call_task("Destroy_Task", body).await
    }

    pub async fn answer_vm(
        &self,
        vm: &ManagedRef,
        question_id: &str,
        answer: &str,
    ) -> VimResult<()> {
        let body = format!(
            "<AnswerVM xmlns=\"urn:vim25\">{}{}{}</AnswerVM>",
            vm.xml("_this"),
            soap::elem("questionId", question_id),
            soap::elem("answerChoice", answer),
        );
        self.call("AnswerVM", body).await.map(|_| ())
    }

    pub async fn acquire_ticket(&self, vm: &ManagedRef, kind: &str) -> VimResult<TicketInfo> {
        let body = format!(
            "<AcquireTicket xmlns=\"urn:vim25\">{}{}</AcquireTicket>",
            vm.xml("_this"),
            soap::elem("ticketType", kind),
        );
        let xml = self.call("AcquireTicket", body).await?;
        let block = soap::xml_block(&xml, "returnval")
            .ok_or_else(|| VimError::parse("AcquireTicket returned no ticket"))?;
        Ok(TicketInfo {
            ticket: soap::xml_text(&block, "ticket")
                .ok_or_else(|| VimError::parse("ticket missing in AcquireTicket response"))?,
            host: soap::xml_text(&block, "host"),
            port: soap::xml_text(&block, "port").and_then(|p| p.parse().ok()),
        })
    }

    pub async fn reconfigure_cluster(
        &self,
        cluster: &ManagedRef,
        spec_inner: &str,
    ) -> VimResult<ManagedRef> {
        let body = format!(
            "<ReconfigureComputeResource_Task xmlns=\"urn:vim25\">{}\
             <spec xsi:type=\"ClusterConfigSpecEx\">{spec_inner}</spec>\
             <modify>true</modify></ReconfigureComputeResource_Task>",
            cluster.xml("_this"),
        );
        self.call_task("ReconfigureComputeResource_Task", body).await
    }

    // ── Datastore files / virtual disks ─────────────────────────────

    fn file_manager(&self) -> VimResult<&ManagedRef> {
        self.content()?
            .file_manager
            .as_ref()
            .ok_or_else(|| VimError::storage("endpoint has no file manager"))
    }

    fn virtual_disk_manager(&self) -> VimResult<&ManagedRef> {
        self.content()?
            .virtual_disk_manager
            .as_ref()
            .ok_or_else(|| VimError::storage("endpoint has no virtual disk manager"))
    }

    pub async fn delete_datastore_file(
        &self,
        name: &str,
        datacenter: &ManagedRef,
    ) -> VimResult<ManagedRef> {
        let body = format!(
            "<DeleteDatastoreFile_Task xmlns=\"urn:vim25\">{}{}{}</DeleteDatastoreFile_Task>",
            self.file_manager()?.xml("_this"),
            soap::elem("name", name),
            datacenter.xml("datacenter"),
        );
        self.call_task("DeleteDatastoreFile_Task", body).await
    }

    pub async fn make_directory(
        &self,
        name: &str,
        datacenter: &ManagedRef,
        create_parents: bool,
    ) -> VimResult<()> {
        let body = format!(
            "<MakeDirectory xmlns=\"urn:vim25\">{}{}{}\
             <createParentDirectories>{create_parents}</createParentDirectories></MakeDirectory>",
            self.file_manager()?.xml("_this"),
            soap::elem("name", name),
            datacenter.xml("datacenter"),
        );
        self.call("MakeDirectory", body).await.map(|_| ())
    }

    pub async fn create_virtual_disk(
        &self,
        name: &str,
        datacenter: &ManagedRef,
        adapter: &str,
        capacity_kb: i64,
    ) -> VimResult<ManagedRef> {
        let body = format!(
            "<CreateVirtualDisk_Task xmlns=\"urn:vim25\">{}{}{}\
             <spec xsi:type=\"FileBackedVirtualDiskSpec\">\
             <diskType>thin</diskType>{}\
             <capacityKb>{capacity_kb}</capacityKb></spec></CreateVirtualDisk_Task>",
            self.virtual_disk_manager()?.xml("_this"),
            soap::elem("name", name),
            datacenter.xml("datacenter"),
            soap::elem("adapterType", adapter),
        );
        self.call_task("CreateVirtualDisk_Task", body).await
    }

    pub async fn copy_virtual_disk(
        &self,
        source: &str,
        dest: &str,
        datacenter: &ManagedRef,
    ) -> VimResult<ManagedRef> {
        let body = format!(
            "<CopyVirtualDisk_Task xmlns=\"urn:vim25\">{}{}{}{}{}\
             <force>false</force></CopyVirtualDisk_Task>",
            self.virtual_disk_manager()?.xml("_this"),
            soap::elem("sourceName", source),
            datacenter.xml("sourceDatacenter"),
            soap::elem("destName", dest),
            datacenter.xml("destDatacenter"),
        );
        self.call_task("CopyVirtualDisk_Task", body).await
    }

    pub async fn delete_virtual_disk(
        &self,
        name: &str,
        datacenter: &ManagedRef,
    ) -> VimResult<ManagedRef> {
        let body = format!(
            "<DeleteVirtualDisk_Task xmlns=\"urn:vim25\">{}{}{}</DeleteVirtualDisk_Task>",
            self.virtual_disk_manager()?.xml("_this"),
            soap::elem("name", name),
            datacenter.xml("datacenter"),
        );
        self.call_task("DeleteVirtualDisk_Task", body).await
    }

    // ── Datastore browsing ──────────────────────────────────────────

    fn search_spec(pattern: &str) -> String {
        format!(
            "<searchSpec xsi:type=\"HostDatastoreBrowserSearchSpec\">{}\
             <details><fileType>true</fileType><fileSize>true</fileSize>\
             <modification>false</modification><fileOwner>false</fileOwner></details>\
             </searchSpec>",
            soap::elem("matchPattern", pattern),
        )
    }

    pub async fn search_datastore(
        &self,
        browser: &ManagedRef,
        path: &str,
        pattern: &str,
    ) -> VimResult<ManagedRef> {
        let body = format!(
            "<SearchDatastore_Task xmlns=\"urn:vim25\">{}{}{}</SearchDatastore_Task>",
            browser.xml("_this"),
            soap::elem("datastorePath", path),
            Self::search_spec(pattern),
        );
        self.call_task("SearchDatastore_Task", body).await
    }

    pub async fn search_datastore_subfolders(
        &self,
        browser: &ManagedRef,
        path: &str,
        pattern: &str,
    ) -> VimResult<ManagedRef> {
        let body = format!(
            "<SearchDatastoreSubFolders_Task xmlns=\"urn:vim25\">{}{}{}</SearchDatastoreSubFolders_Task>",
            browser.xml("_this"),
            soap::elem("datastorePath", path),
            Self::search_spec(pattern),
        );
        self.call_task("SearchDatastoreSubFolders_Task", body).await
    }

    /// Translate an object-store namespace path to its on-disk UUID path.
    pub async fn convert_namespace_path_to_uuid_path(
        &self,
        datacenter: &ManagedRef,
        namespace_url: &str,
    ) -> VimResult<String> {
        let mgr = self
            .content()?
            .datastore_namespace_manager
            .as_ref()
            .ok_or_else(|| VimError::storage("endpoint has no datastore namespace manager"))?;
        let body = format!(
            "<ConvertNamespacePathToUuidPath xmlns=\"urn:vim25\">{}{}{}</ConvertNamespacePathToUuidPath>",
            mgr.xml("_this"),
            datacenter.xml("datacenter"),
            soap::elem("namespaceUrl", namespace_url),
        );
        let xml = self.call("ConvertNamespacePathToUuidPath", body).await?;
        soap::xml_text(&xml, "returnval")
            .ok_or_else(|| VimError::parse("namespace translation returned nothing"))
    }
}

/// Map a SOAP fault body to an error kind.
fn classify_fault(body: &str, fault: &str) -> VimError {
    let lower = fault.to_ascii_lowercase();
    if body.contains("ServerTooBusy") || lower.contains("too busy") {
        VimError::busy(fault)
    } else if lower.contains("not authenticated") || lower.contains("incorrect user name") {
        VimError::auth(fault)
    } else if body.contains("FileNotFound") || lower.contains("was not found") {
        VimError::not_found(fault)
    } else {
        VimError::fault(fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VimErrorKind;

    const CONTENT_XML: &str = r#"<RetrieveServiceContentResponse><returnval>
      <rootFolder type="Folder">group-d1</rootFolder>
      <propertyCollector type="PropertyCollector">propertyCollector</propertyCollector>
      <sessionManager type="SessionManager">SessionManager</sessionManager>
      <fileManager type="FileManager">FileManager</fileManager>
      <virtualDiskManager type="VirtualDiskManager">virtualDiskManager</virtualDiskManager>
      <datastoreNamespaceManager type="DatastoreNamespaceManager">DatastoreNamespaceManager</datastoreNamespaceManager>
      <about><fullName>VMware vCenter Server 8.0.2</fullName><apiType>VirtualCenter</apiType></about>
    </returnval></RetrieveServiceContentResponse>"#;

    #[test]
    fn parses_service_content() {
        let content = ServiceContent::parse(CONTENT_XML).unwrap();
        assert_eq!(content.root_folder, ManagedRef::new("Folder", "group-d1"));
        assert!(content.is_vcenter());
        assert!(content.datastore_namespace_manager.is_some());
    }

    #[test]
    fn host_endpoint_is_not_vcenter() {
        let xml = CONTENT_XML.replace("VirtualCenter", "HostAgent");
        let content = ServiceContent::parse(&xml).unwrap();
        assert!(!content.is_vcenter());
    }

    #[test]
    fn classify_busy_fault() {
        let e = classify_fault(
            "<detail><ServerTooBusyFault/></detail>",
            "The server is too busy to respond",
        );
        assert_eq!(e.kind, VimErrorKind::Busy);
        assert!(e.is_session_fatal());
    }

    #[test]
    fn classify_auth_fault() {
        let e = classify_fault("<detail/>", "The session is not authenticated.");
        assert_eq!(e.kind, VimErrorKind::AuthenticationError);
    }

    #[test]
    fn classify_missing_file_fault() {
        let e = classify_fault(
            "<detail><FileNotFoundFault/></detail>",
            "File [ds1] nope was not found",
        );
        assert_eq!(e.kind, VimErrorKind::NotFound);
    }

    #[test]
    fn classify_generic_fault() {
        let e = classify_fault("<detail/>", "A specified parameter was not correct");
        assert_eq!(e.kind, VimErrorKind::SoapFault);
        assert!(!e.is_session_fatal());
    }
}
