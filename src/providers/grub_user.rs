//! GRUB2 users, written to a managed /etc/grub.d script.
//!
//! The users found in the active grub.cfg are the current state. Every
//! change rewrites the whole script from the users it already defines, so
//! users declared by other resources of the run are kept.

use std::path::PathBuf;

use log::{debug, info, warn};

use grubstate_api::{
    config::{GrubUserDeclaration, ResourceDeclaration},
    constants::{GRUB_USERS_FILE, GRUB_USERS_LEGACY_FILE, SCRIPT_FILE_MODE},
    error::{GrubStateError, InternalError, InvalidInputError, ReportError, ServicingError},
};
use osutils::files;

use crate::{
    engine::{Property, PropertyKind, PropertyValue, Provider, RunContext},
    users::{extract_users, hashed, unmanaged_users, GrubUser, Roster},
};

use super::target_path;

fn declaration(resource: &ResourceDeclaration) -> Result<&GrubUserDeclaration, GrubStateError> {
    match resource {
        ResourceDeclaration::GrubUser(declaration) => Ok(declaration),
        _ => Err(GrubStateError::internal(
            "grub_user provider built for another resource kind",
        )),
    }
}

pub struct Grub2User {
    declaration: GrubUserDeclaration,

    /// The user as found in the active grub.cfg.
    current: Option<GrubUser>,

    /// Managed users script.
    target: PathBuf,

    /// Content of the managed script, if it exists.
    content: Option<String>,

    /// Users the managed script defines.
    existing: Vec<GrubUser>,

    destroying: bool,
}

impl Grub2User {
    pub fn build(
        resource: &ResourceDeclaration,
        ctx: &mut RunContext,
    ) -> Result<Box<dyn Provider>, GrubStateError> {
        let declaration = declaration(resource)?.clone();

        let active = extract_users(&ctx.grub_cfg()?);
        let current = active.iter().find(|u| u.name == declaration.name).cloned();

        if declaration.report_unmanaged && ctx.report_unmanaged_users_once() {
            let unmanaged = unmanaged_users(&active, ctx.declared_users());
            if !unmanaged.is_empty() {
                warn!(
                    "The following GRUB2 users are present but not managed: \"{}\"",
                    unmanaged.join("\", \"")
                );
            }
        }

        let target = target_path(ctx, declaration.target.as_deref(), GRUB_USERS_FILE);
        let content = files::read_file_if_exists(&target).structured(ServicingError::ReadFile {
            path: target.display().to_string(),
        })?;
        let existing = content.as_deref().map(extract_users).unwrap_or_default();
        debug!(
            "'{}' defines {} GRUB2 users",
            target.display(),
            existing.len()
        );

        Ok(Box::new(Grub2User {
            declaration,
            current,
            target,
            content,
            existing,
            destroying: false,
        }))
    }

    pub fn instances(ctx: &mut RunContext) -> Result<Vec<ResourceDeclaration>, GrubStateError> {
        Ok(extract_users(&ctx.grub_cfg()?)
            .into_iter()
            .map(|user| {
                ResourceDeclaration::GrubUser(GrubUserDeclaration {
                    name: user.name,
                    password: Some(user.password),
                    superuser: user.superuser,
                    ..Default::default()
                })
            })
            .collect())
    }

    /// The hash the user had so far, reused when the password did not
    /// change.
    fn previous_password(&self) -> Option<&str> {
        self.existing
            .iter()
            .find(|u| u.name == self.declaration.name)
            .or(self.current.as_ref())
            .map(|u| u.password.as_str())
    }

    fn roster(&self, ctx: &RunContext) -> Result<Roster, GrubStateError> {
        let declared = match self.destroying {
            true => None,
            false => {
                let password = self
                    .declaration
                    .password
                    .as_deref()
                    .or(self.previous_password())
                    .structured(InvalidInputError::MissingProperty {
                        resource: format!("grub_user[{}]", self.declaration.name),
                        property: "password",
                    })?;
                let user = GrubUser {
                    name: self.declaration.name.clone(),
                    password: password.to_string(),
                    superuser: self.declaration.superuser,
                };
                Some(
                    hashed(user, self.previous_password(), self.declaration.rounds).structured(
                        ServicingError::HashPassword {
                            user: self.declaration.name.clone(),
                        },
                    )?,
                )
            }
        };

        Ok(Roster::reconcile(
            self.existing.clone(),
            &self.declaration.name,
            declared,
            self.declaration.purge,
            ctx.declared_users(),
        ))
    }
}

impl Provider for Grub2User {
    fn name(&self) -> &'static str {
        "grub2"
    }

    fn exists(&mut self, _ctx: &mut RunContext) -> Result<bool, GrubStateError> {
        Ok(self.current.is_some())
    }

    fn create(&mut self, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        if self.declaration.password.is_none() {
            return Err(GrubStateError::new(InvalidInputError::MissingProperty {
                resource: format!("grub_user[{}]", self.declaration.name),
                property: "password",
            }));
        }
        Ok(())
    }

    fn destroy(&mut self, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        self.destroying = true;
        Ok(())
    }

    fn properties(&mut self, ctx: &mut RunContext) -> Result<Vec<Property>, GrubStateError> {
        let Some(ref current) = self.current else {
            return Ok(Vec::new());
        };
        let mut properties = Vec::new();

        if let Some(ref password) = self.declaration.password {
            properties.push(Property::new(
                "password",
                PropertyKind::Password {
                    user: current.name.clone(),
                },
                PropertyValue::scalar(current.password.clone()),
                PropertyValue::scalar(password.clone()),
            ));
        }

        properties.push(Property::exact(
            "superuser",
            PropertyValue::Flag(current.superuser),
            PropertyValue::Flag(self.declaration.superuser),
        ));

        if self.declaration.purge {
            let purged = self
                .existing
                .iter()
                .filter(|u| u.name != current.name && !ctx.declared_users().contains(&u.name))
                .map(|u| u.name.clone())
                .collect();
            properties.push(Property::exact(
                "purge",
                PropertyValue::List(purged),
                PropertyValue::List(Vec::new()),
            ));
        }

        Ok(properties)
    }

    /// Every property is written by rewriting the whole script.
    fn set(&mut self, property: &Property, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        match property.name {
            "password" | "superuser" | "purge" => Ok(()),
            name => Err(GrubStateError::new(InternalError::UnknownProperty {
                property: name,
                provider: "grub2",
            })),
        }
    }

    fn flush(&mut self, ctx: &mut RunContext) -> Result<(), GrubStateError> {
        let roster = self.roster(ctx)?;
        if let Some(summary) = roster.purge_summary() {
            info!("{summary}");
        }

        let legacy = ctx.path(GRUB_USERS_LEGACY_FILE);
        if legacy != self.target
            && files::remove_file_if_exists(&legacy).structured(ServicingError::RemoveFile {
                path: legacy.display().to_string(),
            })?
        {
            info!("Removed legacy users script '{}'", legacy.display());
            ctx.request_regeneration();
        }

        let rendered = roster.render().structured(ServicingError::WriteFile {
            path: self.target.display().to_string(),
        })?;
        if self.content.as_deref() == Some(rendered.as_str()) {
            warn!(
                "'{}' is up to date but the active GRUB2 configuration differs, make sure it is \
                 the one GRUB2 boots from",
                self.target.display()
            );
        } else {
            info!("Writing GRUB2 users to '{}'", self.target.display());
            files::write_file(&self.target, SCRIPT_FILE_MODE, rendered.as_bytes()).structured(
                ServicingError::WriteFile {
                    path: self.target.display().to_string(),
                },
            )?;
            self.content = Some(rendered);
        }

        ctx.request_regeneration();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use indoc::indoc;

    use grubstate_api::error::ErrorKind;
    use osutils::password::Pbkdf2Hash;

    use crate::{
        facts::Facts,
        providers::testutils::{context, read, resource, write},
        tools::fake::FakeBootTools,
    };

    use super::*;

    const USERS_SCRIPT: &str = "/etc/grub.d/02_puppet_managed_users";

    fn setup(grub_cfg: &str) -> (tempfile::TempDir, RunContext) {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "/boot/grub2/grub.cfg", grub_cfg);
        let tools = FakeBootTools {
            configs: vec![root.path().join("boot/grub2/grub.cfg")],
            ..Default::default()
        };
        let ctx = context(root.path(), Facts::default(), &tools);
        (root, ctx)
    }

    fn grub_cfg(script: &str) -> String {
        format!("### BEGIN /etc/grub.d/02_puppet_managed_users ###\n{script}### END ###\n")
    }

    fn changed(provider: &mut Box<dyn Provider>, ctx: &mut RunContext) -> Vec<&'static str> {
        let properties = provider.properties(ctx).unwrap();
        properties
            .iter()
            .filter(|p| !p.insync().unwrap())
            .map(|p| p.name)
            .collect()
    }

    #[test]
    fn test_create_superuser() {
        let (root, mut ctx) = setup("set timeout=5\n");
        write(
            root.path(),
            "/etc/grub.d/01_puppet_managed_users",
            "#!/bin/sh\n",
        );

        let mut provider = Grub2User::build(
            &resource(indoc! {r#"
                resources:
                  - kind: grub-user
                    name: root
                    password: secret
                    superuser: true
                    rounds: 100
            "#}),
            &mut ctx,
        )
        .unwrap();
        assert!(!provider.exists(&mut ctx).unwrap());
        provider.create(&mut ctx).unwrap();
        provider.flush(&mut ctx).unwrap();

        let script = read(root.path(), USERS_SCRIPT);
        let users = extract_users(&script);
        assert_eq!(users.len(), 1);
        assert!(users[0].superuser);
        assert!(users[0].password.starts_with("grub.pbkdf2.sha512.100."));
        let hash: Pbkdf2Hash = users[0].password.parse().unwrap();
        assert!(hash.verify("secret").unwrap());
        assert!(script.contains("set superusers=\"root\"\n"));

        let mode = std::fs::metadata(root.path().join(USERS_SCRIPT.trim_start_matches('/')))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
        assert!(!root
            .path()
            .join("etc/grub.d/01_puppet_managed_users")
            .exists());
        assert!(ctx.regeneration_requested());
    }

    #[test]
    fn test_create_requires_password() {
        let (_root, mut ctx) = setup("");
        let mut provider = Grub2User::build(
            &resource(indoc! {r#"
                resources:
                  - kind: grub-user
                    name: root
            "#}),
            &mut ctx,
        )
        .unwrap();
        let error = provider.create(&mut ctx).unwrap_err();
        assert_eq!(
            error.kind(),
            &ErrorKind::InvalidInput(InvalidInputError::MissingProperty {
                resource: "grub_user[root]".into(),
                property: "password",
            })
        );
    }

    #[test]
    fn test_plaintext_matches_hash() {
        let hash = Pbkdf2Hash::new("secret", 100).unwrap().to_string();
        let script = format!("set superusers=\"root\"\npassword_pbkdf2 root {hash}\n");
        let (_root, mut ctx) = setup(&grub_cfg(&script));

        let mut provider = Grub2User::build(
            &resource(indoc! {r#"
                resources:
                  - kind: grub-user
                    name: root
                    password: secret
                    superuser: true
            "#}),
            &mut ctx,
        )
        .unwrap();
        assert!(provider.exists(&mut ctx).unwrap());
        assert!(changed(&mut provider, &mut ctx).is_empty());
    }

    #[test]
    fn test_demote_keeps_hash_and_other_users() {
        let hash = Pbkdf2Hash::new("secret", 100).unwrap().to_string();
        let script = format!(
            "cat << USER_LIST\nset superusers=\"bob,root\"\npassword_pbkdf2 bob {hash}\npassword_pbkdf2 root {hash}\nUSER_LIST\n"
        );
        let (root, mut ctx) = setup(&grub_cfg(&script));
        write(root.path(), USERS_SCRIPT, &script);

        let mut provider = Grub2User::build(
            &resource(indoc! {r#"
                resources:
                  - kind: grub-user
                    name: bob
                    password: secret
                    rounds: 100
            "#}),
            &mut ctx,
        )
        .unwrap();
        assert_eq!(changed(&mut provider, &mut ctx), vec!["superuser"]);
        provider.flush(&mut ctx).unwrap();

        let users = extract_users(&read(root.path(), USERS_SCRIPT));
        assert_eq!(
            users,
            vec![
                GrubUser {
                    name: "bob".into(),
                    password: hash.clone(),
                    superuser: false,
                },
                GrubUser {
                    name: "root".into(),
                    password: hash,
                    superuser: true,
                },
            ]
        );
    }

    #[test]
    fn test_purge_and_destroy() {
        let script = indoc! {r#"
            cat << USER_LIST
            set superusers="root"
            password_pbkdf2 old grub.pbkdf2.sha512.1.CC.DD
            password_pbkdf2 root grub.pbkdf2.sha512.1.AA.BB
            USER_LIST
        "#};
        let (root, mut ctx) = setup(&grub_cfg(script));
        write(root.path(), USERS_SCRIPT, script);

        let mut provider = Grub2User::build(
            &resource(indoc! {r#"
                resources:
                  - kind: grub-user
                    name: root
                    password: grub.pbkdf2.sha512.1.AA.BB
                    superuser: true
                    purge: true
            "#}),
            &mut ctx,
        )
        .unwrap();
        assert_eq!(changed(&mut provider, &mut ctx), vec!["purge"]);
        provider.flush(&mut ctx).unwrap();
        assert_eq!(
            extract_users(&read(root.path(), USERS_SCRIPT))
                .into_iter()
                .map(|u| u.name)
                .collect::<Vec<_>>(),
            vec!["root"]
        );

        let mut provider = Grub2User::build(
            &resource(indoc! {r#"
                resources:
                  - kind: grub-user
                    name: root
                    ensure: absent
            "#}),
            &mut ctx,
        )
        .unwrap();
        provider.destroy(&mut ctx).unwrap();
        provider.flush(&mut ctx).unwrap();
        assert!(extract_users(&read(root.path(), USERS_SCRIPT)).is_empty());
    }

    #[test]
    fn test_instances() {
        let (_root, mut ctx) = setup(&grub_cfg(indoc! {r#"
            set superusers="root"
            password_pbkdf2 root grub.pbkdf2.sha512.1.AA.BB
            password bob plain
        "#}));
        let instances = Grub2User::instances(&mut ctx).unwrap();
        assert_eq!(
            instances,
            vec![
                ResourceDeclaration::GrubUser(GrubUserDeclaration {
                    name: "root".into(),
                    password: Some("grub.pbkdf2.sha512.1.AA.BB".into()),
                    superuser: true,
                    ..Default::default()
                }),
                ResourceDeclaration::GrubUser(GrubUserDeclaration {
                    name: "bob".into(),
                    password: Some("plain".into()),
                    superuser: false,
                    ..Default::default()
                }),
            ]
        );
    }
}
