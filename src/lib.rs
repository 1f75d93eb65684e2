//! # vlab-vsphere – Hypervisor Client Core
//!
//! Long-lived vSphere / vCenter control-plane client for lab workspace
//! orchestration: deploy, mutate, observe, and tear down virtual machines
//! and their supporting disks and networks, with an eventually-consistent
//! in-memory inventory and a progress view of long-running tasks.
//!
//! ## Modules
//!
//! - **types** — Shared data structures (config, VMs, templates, managed refs, datastore paths)
//! - **error** — Crate-specific error types
//! - **soap** — SOAP envelope construction and lightweight XML scanning
//! - **vim** — Session-cookie SOAP client with one method per SDK operation
//! - **property** — Property-collector filters and tagged-union payload parsing
//! - **resolver** — Connect-time resolution of the configured pool path
//! - **browser** — Datastore listing with object-store UUID translation
//! - **network** — Host / distributed / overlay port-group managers
//! - **tasks** — Synchronous task await + asynchronous task monitor
//! - **inventory** — VM inventory store (explicit collaborator)
//! - **deploy** — Template → device-spec translation
//! - **service** — `VsphereService`: the public operations surface

pub mod types;
pub mod error;
pub mod soap;
pub mod vim;
pub mod property;
pub mod resolver;
pub mod browser;
pub mod network;
pub mod tasks;
pub mod inventory;
pub mod deploy;
pub mod service;

pub use error::{VimError, VimErrorKind, VimResult};
pub use service::VsphereService;
pub use types::{ClientConfig, Vm, VmKeyValue, VmTemplate};
