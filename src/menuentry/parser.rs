use std::path::Path;

use lazy_static::lazy_static;
use log::{debug, trace};
use regex::{Captures, Regex};

use grubstate_api::{
    constants::MANAGED_MARKER,
    error::{GrubStateError, ParseError},
    options::tokenize,
};

use super::{bls, AuthorizedUsers, MenuEntry};

type Handler = fn(&mut MenuParser, &Captures) -> Result<(), GrubStateError>;

lazy_static! {
    static ref SUBMENU: Regex = Regex::new(r#"^\s*submenu\s+['"](.*?)['"]"#).unwrap();
    static ref MENUENTRY: Regex = Regex::new(r"^\s*menuentry\s+'(.+?)'(.*)$").unwrap();
    static ref MARKER: Regex =
        Regex::new(&format!(r"^\s*{}\s*$", regex::escape(MANAGED_MARKER))).unwrap();
    static ref LOAD_VIDEO: Regex = Regex::new(r"^\s*load_video\s*$").unwrap();
    static ref INSMOD: Regex = Regex::new(r"^\s*insmod\s+(\S+)\s*$").unwrap();
    static ref ROOT: Regex = Regex::new(r"^\s*(?:set\s+)?root='(.+)'\s*$").unwrap();
    static ref KERNEL: Regex =
        Regex::new(r"^\s*(linux16|linuxefi|linux|multiboot2|multiboot)\s+(.+)$").unwrap();
    static ref INITRD: Regex = Regex::new(r"^\s*(initrd16|initrdefi|initrd)\s+(.+)$").unwrap();
    static ref MODULE: Regex = Regex::new(r"^\s*module\s+(.+)$").unwrap();
    static ref CLOSE: Regex = Regex::new(r"^\s*\}\s*$").unwrap();
    static ref BLSCFG: Regex = Regex::new(r"(?m)^\s*(insmod\s+)?blscfg\s*$").unwrap();
    static ref USER_SEPARATORS: Regex = Regex::new(r"\s|,|;|\||&").unwrap();

    /// Lines recognized between menu entries, tried in order.
    static ref OUTSIDE: Vec<(&'static Regex, Handler)> = vec![
        (&*SUBMENU, on_submenu as Handler),
        (&*MENUENTRY, on_menuentry),
        (&*MARKER, on_marker_outside),
    ];

    /// Lines recognized inside a menu entry, tried in order.
    static ref INSIDE: Vec<(&'static Regex, Handler)> = vec![
        (&*MENUENTRY, on_nested_menuentry as Handler),
        (&*LOAD_VIDEO, on_load_video),
        (&*INSMOD, on_insmod),
        (&*ROOT, on_root),
        (&*MARKER, on_marker_inside),
        (&*KERNEL, on_kernel),
        (&*INITRD, on_initrd),
        (&*MODULE, on_module),
        (&*CLOSE, on_close),
    ];
}

enum State {
    Outside,
    Inside(MenuEntry),
}

struct MenuParser<'a> {
    state: State,
    submenus: Vec<String>,
    marker_seen: bool,
    current_default: Option<&'a str>,
    entries: Vec<MenuEntry>,
}

impl MenuParser<'_> {
    fn entry(&mut self) -> Result<&mut MenuEntry, GrubStateError> {
        match self.state {
            State::Inside(ref mut entry) => Ok(entry),
            State::Outside => Err(GrubStateError::internal(
                "Menu entry handler called outside of an entry",
            )),
        }
    }

    fn feed(&mut self, line: &str) -> Result<(), GrubStateError> {
        let rules: &[(&Regex, Handler)] = match self.state {
            State::Outside => OUTSIDE.as_slice(),
            State::Inside(_) => INSIDE.as_slice(),
        };

        for (pattern, handler) in rules {
            if let Some(captures) = pattern.captures(line) {
                return handler(self, &captures);
            }
        }
        Ok(())
    }
}

fn on_submenu(parser: &mut MenuParser, captures: &Captures) -> Result<(), GrubStateError> {
    parser.submenus.push(captures[1].to_string());
    Ok(())
}

/// Returns the value following `flag` among the menuentry arguments.
fn flag_value<'a>(arguments: &[&'a str], flag: &str) -> Vec<&'a str> {
    arguments
        .windows(2)
        .filter(|pair| pair[0] == flag)
        .map(|pair| pair[1].trim_matches(['\'', '"']))
        .collect()
}

fn on_menuentry(parser: &mut MenuParser, captures: &Captures) -> Result<(), GrubStateError> {
    let name = captures[1].to_string();
    let arguments: Vec<&str> = captures[2].split_whitespace().collect();

    let users = if arguments.contains(&"--unrestricted") {
        AuthorizedUsers::Unrestricted
    } else {
        AuthorizedUsers::Restricted(
            flag_value(&arguments, "--users")
                .last()
                .map(|users| {
                    USER_SEPARATORS
                        .split(users)
                        .filter(|u| !u.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        )
    };

    trace!("Found menu entry '{name}'");
    parser.state = State::Inside(MenuEntry {
        default_entry: parser.current_default == Some(name.as_str()),
        name,
        managed: std::mem::take(&mut parser.marker_seen),
        classes: flag_value(&arguments, "--class")
            .into_iter()
            .map(str::to_string)
            .collect(),
        users,
        ..Default::default()
    });
    Ok(())
}

fn on_marker_outside(parser: &mut MenuParser, _: &Captures) -> Result<(), GrubStateError> {
    parser.marker_seen = true;
    Ok(())
}

fn on_nested_menuentry(_: &mut MenuParser, _: &Captures) -> Result<(), GrubStateError> {
    Err(GrubStateError::new(ParseError::MalformedMenuConfig))
}

fn on_load_video(parser: &mut MenuParser, _: &Captures) -> Result<(), GrubStateError> {
    parser.entry()?.load_video = true;
    Ok(())
}

fn on_insmod(parser: &mut MenuParser, captures: &Captures) -> Result<(), GrubStateError> {
    parser.entry()?.plugins.push(captures[1].to_string());
    Ok(())
}

fn on_root(parser: &mut MenuParser, captures: &Captures) -> Result<(), GrubStateError> {
    parser.entry()?.root = Some(captures[1].trim().to_string());
    Ok(())
}

fn on_marker_inside(parser: &mut MenuParser, _: &Captures) -> Result<(), GrubStateError> {
    parser.entry()?.managed = true;
    Ok(())
}

fn on_kernel(parser: &mut MenuParser, captures: &Captures) -> Result<(), GrubStateError> {
    let entry = parser.entry()?;
    if &captures[1] == "linux16" {
        entry.load_16bit = true;
    }
    let mut words = tokenize(&captures[2]).into_iter();
    entry.kernel = words.next();
    entry.kernel_options = words.collect();
    Ok(())
}

fn on_initrd(parser: &mut MenuParser, captures: &Captures) -> Result<(), GrubStateError> {
    parser.entry()?.initrd = Some(captures[2].trim().to_string());
    Ok(())
}

fn on_module(parser: &mut MenuParser, captures: &Captures) -> Result<(), GrubStateError> {
    parser.entry()?.modules.push(tokenize(&captures[1]));
    Ok(())
}

fn on_close(parser: &mut MenuParser, _: &Captures) -> Result<(), GrubStateError> {
    if let State::Inside(mut entry) = std::mem::replace(&mut parser.state, State::Outside) {
        entry.submenus = std::mem::take(&mut parser.submenus);
        parser.entries.push(entry);
    }
    Ok(())
}

/// Parses the menu entries out of a rendered grub.cfg.
///
/// When the configuration loads `blscfg`, the BLS snippets under `root` are
/// read as well and listed after the entries of the configuration. Entries
/// whose title equals `current_default` are flagged as the default.
pub fn parse_menu(
    config: &str,
    root: &Path,
    current_default: Option<&str>,
) -> Result<Vec<MenuEntry>, GrubStateError> {
    let mut parser = MenuParser {
        state: State::Outside,
        submenus: Vec::new(),
        marker_seen: false,
        current_default,
        entries: Vec::new(),
    };

    for line in config.lines() {
        parser.feed(line)?;
    }

    if let State::Inside(ref entry) = parser.state {
        debug!("Menu entry '{}' is never closed, ignoring it", entry.name);
    }

    let mut entries = parser.entries;
    if BLSCFG.is_match(config) {
        match bls::read_entries(root) {
            Ok(bls_entries) => {
                entries.extend(bls_entries.into_iter().map(|mut entry| {
                    entry.default_entry = current_default == Some(entry.name.as_str());
                    entry
                }));
            }
            Err(e) => {
                let error = GrubStateError::with_source(ParseError::BlsEntries, e);
                debug!("Ignoring BLS entries: {error:?}");
            }
        }
    }

    Ok(entries)
}
