use grubstate_api::{
    config::{ResourceDeclaration, ResourceKind},
    error::{GrubStateError, ReportError, UnsupportedConfigurationError},
};
use log::debug;

use crate::{
    facts::{Confine, Facts},
    providers::{
        grub_config::{Grub2Config, LegacyGrubConfig},
        grub_user::Grub2User,
        kernel_parameter::{BlsKernelParameter, Grub2KernelParameter, GrubKernelParameter},
        menuentry_grub2::Grub2MenuEntry,
        menuentry_legacy::LegacyMenuEntry,
    },
};

use super::{Provider, RunContext};

pub type BuildFn =
    fn(&ResourceDeclaration, &mut RunContext) -> Result<Box<dyn Provider>, GrubStateError>;

pub type InstancesFn = fn(&mut RunContext) -> Result<Vec<ResourceDeclaration>, GrubStateError>;

/// A provider implementation registered for one resource kind.
#[derive(Debug)]
pub struct ProviderSpec {
    pub kind: ResourceKind,
    pub name: &'static str,
    /// Facts that must hold for the provider to be usable at all.
    pub confines: &'static [Confine],
    /// Facts that make the provider the preferred one.
    pub defaults: &'static [Confine],
    pub build: BuildFn,
    /// Discovers the resources of this kind present on the system.
    pub instances: InstancesFn,
}

impl ProviderSpec {
    pub fn suitable(&self, facts: &Facts) -> bool {
        self.confines.iter().all(|c| c.holds(facts))
    }

    /// Ranks suitable providers: more specific defaults first, then more
    /// confines.
    fn score(&self, facts: &Facts) -> (usize, usize) {
        let defaults = if self.defaults.iter().all(|c| c.holds(facts)) {
            self.defaults.len()
        } else {
            0
        };
        (defaults, self.confines.len())
    }
}

pub static PROVIDERS: [ProviderSpec; 8] = [
    ProviderSpec {
        kind: ResourceKind::KernelParameter,
        name: "grub2",
        confines: &[Confine::GrubVersion(2), Confine::Mkconfig],
        defaults: &[Confine::GrubVersion(2)],
        build: Grub2KernelParameter::build,
        instances: Grub2KernelParameter::instances,
    },
    ProviderSpec {
        kind: ResourceKind::KernelParameter,
        name: "grub2bls",
        confines: &[Confine::Blscfg],
        defaults: &[Confine::GrubVersion(2), Confine::Blscfg],
        build: BlsKernelParameter::build,
        instances: BlsKernelParameter::instances,
    },
    ProviderSpec {
        kind: ResourceKind::KernelParameter,
        name: "grub",
        confines: &[Confine::GrubVersion(1)],
        defaults: &[Confine::GrubVersion(1)],
        build: GrubKernelParameter::build,
        instances: GrubKernelParameter::instances,
    },
    ProviderSpec {
        kind: ResourceKind::GrubConfig,
        name: "grub2",
        confines: &[Confine::GrubVersion(2)],
        defaults: &[Confine::GrubVersion(2)],
        build: Grub2Config::build,
        instances: Grub2Config::instances,
    },
    ProviderSpec {
        kind: ResourceKind::GrubConfig,
        name: "grub",
        confines: &[Confine::GrubVersion(1)],
        defaults: &[Confine::GrubVersion(1)],
        build: LegacyGrubConfig::build,
        instances: LegacyGrubConfig::instances,
    },
    ProviderSpec {
        kind: ResourceKind::GrubMenuentry,
        name: "grub2",
        confines: &[Confine::GrubD],
        defaults: &[Confine::GrubVersion(2)],
        build: Grub2MenuEntry::build,
        instances: Grub2MenuEntry::instances,
    },
    ProviderSpec {
        kind: ResourceKind::GrubMenuentry,
        name: "grub",
        confines: &[Confine::GrubVersion(1)],
        defaults: &[Confine::GrubVersion(1)],
        build: LegacyMenuEntry::build,
        instances: LegacyMenuEntry::instances,
    },
    ProviderSpec {
        kind: ResourceKind::GrubUser,
        name: "grub2",
        confines: &[Confine::GrubD],
        defaults: &[Confine::GrubVersion(2)],
        build: Grub2User::build,
        instances: Grub2User::instances,
    },
];

/// Picks the provider for a resource of `kind`, honoring an explicitly
/// requested one.
pub fn select(
    kind: ResourceKind,
    requested: Option<&str>,
    facts: &Facts,
) -> Result<&'static ProviderSpec, GrubStateError> {
    let mut candidates = PROVIDERS.iter().filter(|p| p.kind == kind);

    if let Some(name) = requested {
        let spec = candidates.find(|p| p.name == name).structured(
            UnsupportedConfigurationError::UnknownProvider {
                provider: name.to_string(),
                kind: kind.name(),
            },
        )?;
        if !spec.suitable(facts) {
            return Err(GrubStateError::new(
                UnsupportedConfigurationError::NoSuitableProvider { kind: kind.name() },
            ));
        }
        return Ok(spec);
    }

    let mut best: Option<&'static ProviderSpec> = None;
    for spec in candidates.filter(|p| p.suitable(facts)) {
        if best.map_or(true, |b| spec.score(facts) > b.score(facts)) {
            best = Some(spec);
        }
    }

    let spec = best.structured(UnsupportedConfigurationError::NoSuitableProvider {
        kind: kind.name(),
    })?;
    debug!("Selected provider '{}' for {kind}", spec.name);
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use maplit::btreemap;

    use grubstate_api::error::ErrorKind;

    use super::*;

    fn grub2_facts() -> Facts {
        Facts {
            grub_version: Some(2),
            grub_d: true,
            commands: btreemap! { "grub2-mkconfig".into() => true },
            ..Default::default()
        }
    }

    #[test]
    fn test_select_by_defaults() {
        let mut facts = grub2_facts();
        assert_eq!(
            select(ResourceKind::KernelParameter, None, &facts).unwrap().name,
            "grub2"
        );

        facts.blscfg = true;
        assert_eq!(
            select(ResourceKind::KernelParameter, None, &facts).unwrap().name,
            "grub2bls"
        );
        assert_eq!(
            select(ResourceKind::GrubConfig, None, &facts).unwrap().name,
            "grub2"
        );
        assert_eq!(
            select(ResourceKind::GrubMenuentry, None, &facts).unwrap().name,
            "grub2"
        );

        let legacy = Facts {
            grub_version: Some(1),
            ..Default::default()
        };
        assert_eq!(
            select(ResourceKind::GrubMenuentry, None, &legacy).unwrap().name,
            "grub"
        );
        assert_eq!(
            select(ResourceKind::GrubConfig, None, &legacy).unwrap().name,
            "grub"
        );
        assert_eq!(
            select(ResourceKind::KernelParameter, None, &legacy)
                .unwrap()
                .name,
            "grub"
        );
    }

    #[test]
    fn test_select_requested() {
        let facts = grub2_facts();
        assert_eq!(
            select(ResourceKind::KernelParameter, Some("grub2"), &facts)
                .unwrap()
                .name,
            "grub2"
        );

        let error = select(ResourceKind::KernelParameter, Some("lilo"), &facts).unwrap_err();
        assert_eq!(
            error.kind(),
            &ErrorKind::UnsupportedConfiguration(UnsupportedConfigurationError::UnknownProvider {
                provider: "lilo".into(),
                kind: "kernel_parameter",
            })
        );

        let error = select(ResourceKind::KernelParameter, Some("grub2bls"), &facts).unwrap_err();
        assert!(matches!(
            error.kind(),
            ErrorKind::UnsupportedConfiguration(
                UnsupportedConfigurationError::NoSuitableProvider { .. }
            )
        ));
    }

    #[test]
    fn test_no_suitable_provider() {
        let error = select(ResourceKind::GrubUser, None, &Facts::default()).unwrap_err();
        assert_eq!(
            error.to_string(),
            "No suitable provider found for resource kind 'grub_user'"
        );
    }
}
