use std::collections::BTreeSet;

use log::{debug, error, info};
use serde::Serialize;

use grubstate_api::{
    config::{Ensure, Manifest, ResourceDeclaration, ResourceKind},
    error::{GrubStateError, GrubStateResultExt, InternalError, InvalidInputError},
};

mod conflicts;
mod context;
mod property;
pub mod registry;

pub use context::{MenuSnapshot, RunContext};
pub use property::{Property, PropertyKind, PropertyValue};

/// Manages one declared resource on the system.
///
/// The engine first asks whether the resource exists. A missing resource
/// that should be present is created, an existing one that should be absent
/// is destroyed, and otherwise every out-of-sync property is set. Changes
/// are staged in the provider and written by `flush`, which only runs when
/// something changed and the run is not a dry run.
pub trait Provider {
    fn name(&self) -> &'static str;

    fn exists(&mut self, ctx: &mut RunContext) -> Result<bool, GrubStateError>;

    fn create(&mut self, ctx: &mut RunContext) -> Result<(), GrubStateError>;

    fn destroy(&mut self, ctx: &mut RunContext) -> Result<(), GrubStateError>;

    /// The managed properties with their current and declared values.
    fn properties(&mut self, _ctx: &mut RunContext) -> Result<Vec<Property>, GrubStateError> {
        Ok(Vec::new())
    }

    fn set(&mut self, property: &Property, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        Err(GrubStateError::new(InternalError::UnknownProperty {
            property: property.name,
            provider: self.name(),
        }))
    }

    /// Persists the staged changes.
    fn flush(&mut self, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        Ok(())
    }
}

/// Outcome of applying one resource.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReport {
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<GrubStateError>,
}

impl ResourceReport {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Resources in the order they are applied: kernel parameters first since
/// grub configs and menu entries of the same file build on them.
fn ordered(manifest: &Manifest) -> Vec<&ResourceDeclaration> {
    let mut resources: Vec<&ResourceDeclaration> = manifest.resources.iter().collect();
    resources.sort_by_key(|r| r.kind());
    resources
}

/// Applies every resource of `manifest`, then regenerates the GRUB
/// configuration if any resource asked for it.
///
/// A failing resource does not stop the run; its error is recorded in its
/// report. Conflicting resources abort the run before anything is changed.
pub fn apply(
    manifest: &Manifest,
    ctx: &mut RunContext,
) -> Result<Vec<ResourceReport>, GrubStateError> {
    conflicts::check(&manifest.resources)?;

    ctx.set_declared_users(
        manifest
            .resources
            .iter()
            .filter_map(|r| match r {
                ResourceDeclaration::GrubUser(user) => Some(user.name.clone()),
                _ => None,
            })
            .collect::<BTreeSet<_>>(),
    );

    let mut reports = Vec::new();
    for resource in ordered(manifest) {
        let title = resource.title();
        let mut report = ResourceReport {
            resource: title.clone(),
            provider: None,
            changes: Vec::new(),
            error: None,
        };

        if let Err(e) = apply_resource(resource, ctx, &mut report) {
            error!("{title}: {e}");
            report.error = Some(e);
        }
        reports.push(report);
    }

    ctx.finish()
        .message("Failed to finalize the boot configuration")?;

    Ok(reports)
}

fn apply_resource(
    resource: &ResourceDeclaration,
    ctx: &mut RunContext,
    report: &mut ResourceReport,
) -> Result<(), GrubStateError> {
    resource
        .validate()
        .map_err(|e| GrubStateError::new(InvalidInputError::from(e)))?;

    let spec = registry::select(resource.kind(), resource.provider(), &ctx.facts)?;
    report.provider = Some(spec.name);
    let mut provider = (spec.build)(resource, ctx)?;

    let title = &report.resource;
    let exists = provider.exists(ctx)?;
    debug!("{title}: exists = {exists}");

    match (resource.ensure(), exists) {
        (Ensure::Present, false) => {
            report.changes.push("created".into());
            if !ctx.noop {
                provider.create(ctx)?;
            }
        }
        (Ensure::Absent, true) => {
            report.changes.push("removed".into());
            if !ctx.noop {
                provider.destroy(ctx)?;
            }
        }
        (Ensure::Absent, false) => {}
        (Ensure::Present, true) => {
            for property in provider.properties(ctx)? {
                if property.insync()? {
                    continue;
                }
                report.changes.push(property.change());
                if !ctx.noop {
                    provider.set(&property, ctx)?;
                }
            }
        }
    }

    for change in &report.changes {
        if ctx.noop {
            info!("{title}: {change} (noop)");
        } else {
            info!("{title}: {change}");
        }
    }

    if !report.changes.is_empty() && !ctx.noop {
        provider
            .flush(ctx)
            .message(format!("Failed to write changes of {title}"))?;
    }

    Ok(())
}

/// Checks every resource of `manifest` and the manifest as a whole without
/// touching the system.
pub fn validate(manifest: &Manifest) -> Result<(), GrubStateError> {
    for resource in &manifest.resources {
        resource
            .validate()
            .map_err(|e| GrubStateError::new(InvalidInputError::from(e)))
            .message(format!("Resource {} is invalid", resource.title()))?;
    }
    conflicts::check(&manifest.resources)
}

/// Discovers the resources of `kind` present on the system.
pub fn list(
    kind: ResourceKind,
    ctx: &mut RunContext,
) -> Result<Vec<ResourceDeclaration>, GrubStateError> {
    let spec = registry::select(kind, None, &ctx.facts)?;
    debug!("Listing {kind} resources with provider '{}'", spec.name);
    (spec.instances)(ctx)
}
