//! Structured, byte-preserving editing of bootloader configuration files.
//!
//! A file is parsed by a [`Lens`] into a tree of labelled [`Node`]s. Nodes
//! remember the exact text they were parsed from, so rendering a tree that
//! was not modified reproduces the file byte for byte, and only the lines
//! touched by an edit are regenerated. Nodes are addressed with the path
//! expressions described in [`path`].

use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Error};
use log::{debug, trace};

use crate::files;

mod menulst;
mod path;
mod shellvars;
mod simplevars;

/// Label of the node holding the padding of a GRUB environment block.
const PADDING: &str = "#padding";

/// Mode used when saving a file that did not exist before.
const DEFAULT_FILE_MODE: u32 = 0o644;

/// The grammar used to map a file to a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lens {
    /// Shell variable assignments, one node per variable holding the raw
    /// (possibly quoted) value, e.g. /etc/default/grub.
    Shellvars,
    /// Shell variable assignments whose quoted value is a whitespace
    /// separated list. Each variable node has a `quote` child followed by
    /// one `value` child per word.
    ShellvarsList,
    /// `key=value` lines padded to a fixed size, e.g. grubenv.
    Simplevars,
    /// GRUB legacy menu.lst: global settings followed by `title` sections.
    /// `kernel` and `module` lines hold the path as value and one child per
    /// option.
    GrubMenu,
}

impl Lens {
    fn parse(self, text: &str) -> Result<Vec<Node>, Error> {
        match self {
            Lens::Shellvars => shellvars::parse(text, false),
            Lens::ShellvarsList => shellvars::parse(text, true),
            Lens::Simplevars => simplevars::parse(text),
            Lens::GrubMenu => menulst::parse(text),
        }
    }

    fn render(self, nodes: &[Node]) -> Result<String, Error> {
        match self {
            Lens::Shellvars => shellvars::render(nodes, false),
            Lens::ShellvarsList => shellvars::render(nodes, true),
            Lens::Simplevars => simplevars::render(nodes),
            Lens::GrubMenu => menulst::render(nodes),
        }
    }

    /// Whether the text of a node at the given depth includes its children.
    fn renders_children_inline(self, label: &str, depth: usize) -> bool {
        match self {
            Lens::GrubMenu => !(depth == 1 && label == "title"),
            _ => true,
        }
    }
}

/// A labelled node of a configuration tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub label: String,
    pub value: Option<String>,
    pub children: Vec<Node>,
    raw: Option<String>,
}

impl Node {
    pub fn new(label: impl Into<String>, value: Option<String>) -> Self {
        Node {
            label: label.into(),
            value,
            children: Vec::new(),
            raw: None,
        }
    }

    fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }

    fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }

    /// Compares label, value and children, ignoring the source text.
    fn same_shape(&self, other: &Node) -> bool {
        self.label == other.label
            && self.value == other.value
            && same_shape(&self.children, &other.children)
    }
}

fn same_shape(a: &[Node], b: &[Node]) -> bool {
    let a = a.iter().filter(|n| n.label != PADDING);
    let b = b.iter().filter(|n| n.label != PADDING);
    a.clone().count() == b.clone().count() && a.zip(b).all(|(x, y)| x.same_shape(y))
}

/// Appends a rendered piece, making sure the previous piece ended its line.
fn push_piece(out: &mut String, piece: &str) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(piece);
}

type Address = Vec<usize>;

/// An editable tree loaded from a file.
pub struct Editor {
    path: PathBuf,
    lens: Lens,
    nodes: Vec<Node>,
    original: Option<String>,
    dirty: bool,
}

impl Editor {
    /// Loads a file. A missing file yields an empty tree.
    pub fn open(path: impl AsRef<Path>, lens: Lens) -> Result<Self, Error> {
        let path = path.as_ref();
        let original = files::read_file_if_exists(path)?;
        let nodes = match original {
            Some(ref text) => lens
                .parse(text)
                .with_context(|| format!("Failed to parse '{}'", path.display()))?,
            None => {
                trace!("'{}' does not exist, starting empty", path.display());
                Vec::new()
            }
        };

        Ok(Editor {
            path: path.to_owned(),
            lens,
            nodes,
            original,
            dirty: false,
        })
    }

    /// Builds a tree from text that will be saved to `path`.
    pub fn parse(path: impl AsRef<Path>, lens: Lens, text: &str) -> Result<Self, Error> {
        Ok(Editor {
            path: path.as_ref().to_owned(),
            lens,
            nodes: lens.parse(text)?,
            original: Some(text.to_string()),
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file existed when it was loaded.
    pub fn existed(&self) -> bool {
        self.original.is_some()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    fn children(&self, address: &[usize]) -> &Vec<Node> {
        let mut children = &self.nodes;
        for &i in address {
            children = &children[i].children;
        }
        children
    }

    fn children_mut(&mut self, address: &[usize]) -> &mut Vec<Node> {
        let mut children = &mut self.nodes;
        for &i in address {
            children = &mut children[i].children;
        }
        children
    }

    fn node(&self, address: &[usize]) -> Option<&Node> {
        let (last, parent) = address.split_last()?;
        self.children(parent).get(*last)
    }

    fn select_step(&self, address: &[usize], segment: &path::Segment) -> Vec<Address> {
        let siblings = self.children(address);
        let mut candidates: Vec<usize> = siblings
            .iter()
            .enumerate()
            .filter(|(_, node)| segment.label.matches(&node.label))
            .map(|(i, _)| i)
            .collect();

        for predicate in &segment.predicates {
            candidates = match predicate {
                path::Predicate::Index(n) => candidates.get(n - 1).copied().into_iter().collect(),
                path::Predicate::Last => candidates.last().copied().into_iter().collect(),
                path::Predicate::LastPlusOne => Vec::new(),
                path::Predicate::ValueEq(value) => candidates
                    .into_iter()
                    .filter(|&i| siblings[i].value.as_deref() == Some(value.as_str()))
                    .collect(),
                path::Predicate::ValueRegex(regex) => candidates
                    .into_iter()
                    .filter(|&i| siblings[i].value.as_deref().is_some_and(|v| regex.is_match(v)))
                    .collect(),
            };
        }

        candidates
            .into_iter()
            .map(|i| {
                let mut child = address.to_vec();
                child.push(i);
                child
            })
            .collect()
    }

    fn select(&self, path: &str) -> Result<Vec<Address>, Error> {
        let mut current = vec![Address::new()];
        for segment in path::parse(path)? {
            current = current
                .iter()
                .flat_map(|address| self.select_step(address, &segment))
                .collect();
        }
        Ok(current)
    }

    /// Renders the address of a node as a path, adding a position wherever
    /// siblings share the label.
    fn canonical_path(&self, address: &[usize]) -> String {
        let mut segments = Vec::with_capacity(address.len());
        for depth in 0..address.len() {
            let siblings = self.children(&address[..depth]);
            let label = &siblings[address[depth]].label;
            let same: Vec<usize> = siblings
                .iter()
                .enumerate()
                .filter(|(_, n)| &n.label == label)
                .map(|(i, _)| i)
                .collect();
            if same.len() > 1 {
                let position = same.iter().position(|&i| i == address[depth]).unwrap_or(0) + 1;
                segments.push(format!("{label}[{position}]"));
            } else {
                segments.push(label.clone());
            }
        }
        segments.join("/")
    }

    /// Returns the paths of all nodes matching `path`.
    pub fn match_paths(&self, path: &str) -> Result<Vec<String>, Error> {
        Ok(self
            .select(path)?
            .iter()
            .map(|address| self.canonical_path(address))
            .collect())
    }

    /// Returns the label and value of all nodes matching `path`.
    pub fn entries(&self, path: &str) -> Result<Vec<(String, Option<String>)>, Error> {
        Ok(self
            .select(path)?
            .iter()
            .filter_map(|address| self.node(address))
            .map(|node| (node.label.clone(), node.value.clone()))
            .collect())
    }

    pub fn count(&self, path: &str) -> Result<usize, Error> {
        Ok(self.select(path)?.len())
    }

    pub fn exists(&self, path: &str) -> Result<bool, Error> {
        Ok(self.count(path)? > 0)
    }

    /// Returns the value of the single node matching `path`.
    pub fn get(&self, path: &str) -> Result<Option<String>, Error> {
        let matches = self.select(path)?;
        match matches.as_slice() {
            [] => Ok(None),
            [address] => Ok(self.node(address).and_then(|node| node.value.clone())),
            _ => bail!("Path '{path}' matches {} nodes", matches.len()),
        }
    }

    /// Drops the cached source text of a changed node and of every ancestor
    /// whose text includes it.
    fn invalidate(&mut self, address: &[usize], node_changed: bool) {
        self.dirty = true;
        let lens = self.lens;

        let mut children = &mut self.nodes;
        for (depth, &i) in address.iter().enumerate() {
            let node = &mut children[i];
            let is_target = depth + 1 == address.len();
            if (is_target && node_changed) || lens.renders_children_inline(&node.label, depth + 1)
            {
                node.raw = None;
            }
            children = &mut node.children;
        }

        if lens == Lens::Simplevars {
            for node in self.nodes.iter_mut().filter(|n| n.label == PADDING) {
                node.raw = None;
            }
        }
    }

    /// Creates a node for the last step of a path that matched nothing.
    fn create(&mut self, parent: &[usize], segment: &path::Segment) -> Result<Address, Error> {
        let path::Label::Name(ref label) = segment.label else {
            bail!("Cannot create a node with a wildcard label");
        };

        let siblings = self.children(parent);
        let existing: Vec<usize> = siblings
            .iter()
            .enumerate()
            .filter(|(_, n)| &n.label == label)
            .map(|(i, _)| i)
            .collect();

        // Positions count the siblings left by the value filters before them
        let mut filtered: Vec<&Node> = existing.iter().map(|&i| &siblings[i]).collect();
        for predicate in &segment.predicates {
            ensure!(
                predicate.allows_creation(filtered.len()),
                "Cannot create node '{label}' satisfying the given predicates"
            );
            match predicate {
                path::Predicate::ValueEq(value) => {
                    filtered.retain(|n| n.value.as_deref() == Some(value.as_str()))
                }
                path::Predicate::ValueRegex(regex) => {
                    filtered.retain(|n| n.value.as_deref().is_some_and(|v| regex.is_match(v)))
                }
                _ => {}
            }
        }

        let index = match existing.last() {
            Some(&last) => last + 1,
            None => {
                // Keep environment block padding at the end
                let mut index = siblings.len();
                while index > 0 && siblings[index - 1].label == PADDING {
                    index -= 1;
                }
                index
            }
        };

        trace!("Creating node '{label}' in '{}'", self.path.display());
        self.children_mut(parent)
            .insert(index, Node::new(label.clone(), None));
        self.invalidate(parent, false);

        let mut address = parent.to_vec();
        address.push(index);
        Ok(address)
    }

    /// Sets the value of the single node matching `path`, creating it and
    /// any missing ancestors when nothing matches.
    pub fn set(&mut self, path: &str, value: Option<&str>) -> Result<(), Error> {
        let mut address = Address::new();
        for segment in path::parse(path)? {
            let mut matches = self.select_step(&address, &segment);
            address = match matches.len() {
                0 => self
                    .create(&address, &segment)
                    .with_context(|| format!("Failed to set '{path}'"))?,
                1 => matches.remove(0),
                n => bail!("Cannot set '{path}': path matches {n} nodes"),
            };
        }

        let (last, parent) = address
            .split_last()
            .context("Cannot set the root of the tree")?;
        let node = &mut self.children_mut(parent)[*last];
        if node.value.as_deref() != value {
            node.value = value.map(str::to_string);
            self.invalidate(&address, true);
        }

        Ok(())
    }

    /// Removes every node matching `path`, returning how many were removed.
    pub fn rm(&mut self, path: &str) -> Result<usize, Error> {
        let mut matches = self.select(path)?;
        // Later siblings first so earlier addresses stay valid
        matches.sort_unstable_by(|a, b| b.cmp(a));

        for address in &matches {
            if let Some((last, parent)) = address.split_last() {
                self.children_mut(parent).remove(*last);
                self.invalidate(parent, false);
            }
        }

        if !matches.is_empty() {
            trace!(
                "Removed {} node(s) matching '{path}' from '{}'",
                matches.len(),
                self.path.display()
            );
        }
        Ok(matches.len())
    }

    /// Inserts a new node labelled `label` next to the single node matching
    /// `path`.
    pub fn insert(&mut self, path: &str, label: &str, before: bool) -> Result<(), Error> {
        let matches = self.select(path)?;
        let [ref address] = matches[..] else {
            bail!(
                "Cannot insert next to '{path}': path matches {} nodes",
                matches.len()
            );
        };

        let (last, parent) = address
            .split_last()
            .context("Cannot insert next to the root of the tree")?;
        let index = if before { *last } else { last + 1 };
        self.children_mut(parent)
            .insert(index, Node::new(label, None));
        self.invalidate(parent, false);

        Ok(())
    }

    /// Renders the tree back to text.
    pub fn render(&self) -> Result<String, Error> {
        self.lens.render(&self.nodes)
    }

    /// Writes the tree back to its file if it changed. The rendered text is
    /// parsed again and must describe the same tree before anything is
    /// written. Returns whether the file was written.
    pub fn save(&mut self) -> Result<bool, Error> {
        if !self.dirty {
            return Ok(false);
        }

        let rendered = self
            .render()
            .with_context(|| format!("Failed to render '{}'", self.path.display()))?;
        let reparsed = self.lens.parse(&rendered).with_context(|| {
            format!(
                "Rendered content of '{}' does not parse:\n{rendered}",
                self.path.display()
            )
        })?;
        ensure!(
            same_shape(&reparsed, &self.nodes),
            "Rendered content of '{}' does not reproduce the edited tree:\n{rendered}",
            self.path.display()
        );

        self.dirty = false;
        if self.original.as_deref() == Some(rendered.as_str()) {
            trace!("'{}' unchanged", self.path.display());
            return Ok(false);
        }

        debug!("Saving '{}'", self.path.display());
        files::replace_file(&self.path, DEFAULT_FILE_MODE, rendered.as_bytes())?;
        self.nodes = reparsed;
        self.original = Some(rendered);

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    const DEFAULT_GRUB: &str = indoc! {r#"
        # Managed by hand
        GRUB_TIMEOUT=5
        GRUB_DISTRIBUTOR="$(sed 's, release .*$,,g' /etc/system-release)"
        GRUB_CMDLINE_LINUX="crashkernel=auto rhgb quiet"
        export GRUB_ENABLE_BLSCFG=true

        if [ -e /tmp/foo ]; then
    "#};

    #[test]
    fn test_unchanged_roundtrip() {
        for lens in [Lens::Shellvars, Lens::ShellvarsList] {
            let editor = Editor::parse("/tmp/grub", lens, DEFAULT_GRUB).unwrap();
            assert_eq!(editor.render().unwrap(), DEFAULT_GRUB);
        }
    }

    #[test]
    fn test_get_and_match() {
        let editor = Editor::parse("/tmp/grub", Lens::ShellvarsList, DEFAULT_GRUB).unwrap();
        assert_eq!(
            editor.match_paths("GRUB_CMDLINE_LINUX/value").unwrap(),
            vec![
                "GRUB_CMDLINE_LINUX/value[1]",
                "GRUB_CMDLINE_LINUX/value[2]",
                "GRUB_CMDLINE_LINUX/value[3]"
            ]
        );
        assert_eq!(
            editor
                .get("GRUB_CMDLINE_LINUX/value[.=~regexp('rhgb(=.*)?')]")
                .unwrap()
                .as_deref(),
            Some("rhgb")
        );
        assert_eq!(
            editor.get("GRUB_CMDLINE_LINUX/quote").unwrap().as_deref(),
            Some("\"")
        );
        assert_eq!(editor.get("GRUB_MISSING").unwrap(), None);
        assert!(editor.get("GRUB_CMDLINE_LINUX/value").is_err());
        assert!(editor.exists("GRUB_ENABLE_BLSCFG/export").unwrap());
        assert_eq!(editor.count("*").unwrap(), 4);
    }

    #[test]
    fn test_set_only_touches_changed_line() {
        let mut editor = Editor::parse("/tmp/grub", Lens::Shellvars, DEFAULT_GRUB).unwrap();
        editor.set("GRUB_TIMEOUT", Some("\"10\"")).unwrap();
        assert!(editor.is_dirty());
        assert_eq!(
            editor.render().unwrap(),
            DEFAULT_GRUB.replace("GRUB_TIMEOUT=5", "GRUB_TIMEOUT=\"10\"")
        );

        editor.set("GRUB_NEW", Some("\"x y\"")).unwrap();
        assert!(editor.render().unwrap().ends_with("then\nGRUB_NEW=\"x y\"\n"));
    }

    #[test]
    fn test_list_edits() {
        let mut editor = Editor::parse("/tmp/grub", Lens::ShellvarsList, DEFAULT_GRUB).unwrap();
        editor
            .set("GRUB_CMDLINE_LINUX/value[.=~regexp('quiet(=.*)?')]", Some("quiet=1"))
            .unwrap();
        editor
            .set("GRUB_CMDLINE_LINUX/value[last()+1]", Some("nomodeset"))
            .unwrap();
        assert_eq!(editor.rm("GRUB_CMDLINE_LINUX/value[1]").unwrap(), 1);

        let rendered = editor.render().unwrap();
        assert!(rendered.contains("GRUB_CMDLINE_LINUX=\"rhgb quiet=1 nomodeset\"\n"));
        assert!(rendered.contains("GRUB_TIMEOUT=5\n"));

        editor.set("GRUB_CMDLINE_LINUX_DEFAULT/quote", Some("\"")).unwrap();
        editor
            .set("GRUB_CMDLINE_LINUX_DEFAULT/value[1]", Some("splash"))
            .unwrap();
        assert!(editor
            .render()
            .unwrap()
            .ends_with("GRUB_CMDLINE_LINUX_DEFAULT=\"splash\"\n"));
    }

    #[test]
    fn test_set_rejects_ambiguous_and_impossible_paths() {
        let mut editor = Editor::parse("/tmp/grub", Lens::ShellvarsList, DEFAULT_GRUB).unwrap();
        assert!(editor.set("GRUB_CMDLINE_LINUX/value", Some("x")).is_err());
        assert!(editor.set("GRUB_CMDLINE_LINUX/value[9]", Some("x")).is_err());
        assert!(editor.set("*", Some("x")).is_err());
        assert!(!editor.is_dirty());
    }

    #[test]
    fn test_insert() {
        let mut editor = Editor::parse("/tmp/grub", Lens::Shellvars, DEFAULT_GRUB).unwrap();
        editor.insert("GRUB_TIMEOUT", "GRUB_DEFAULT", true).unwrap();
        editor.set("GRUB_DEFAULT", Some("saved")).unwrap();
        assert!(editor
            .render()
            .unwrap()
            .starts_with("# Managed by hand\nGRUB_DEFAULT=saved\nGRUB_TIMEOUT=5\n"));
        assert!(editor.insert("GRUB_NOPE", "X", true).is_err());
    }

    #[test]
    fn test_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grub");
        std::fs::write(&path, DEFAULT_GRUB).unwrap();

        let mut editor = Editor::open(&path, Lens::Shellvars).unwrap();
        assert!(editor.existed());
        assert!(!editor.save().unwrap());

        // Setting the current value is not a change
        editor.set("GRUB_TIMEOUT", Some("5")).unwrap();
        assert!(!editor.save().unwrap());

        editor.set("GRUB_TIMEOUT", Some("3")).unwrap();
        assert!(editor.save().unwrap());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            DEFAULT_GRUB.replace("GRUB_TIMEOUT=5", "GRUB_TIMEOUT=3")
        );

        // Unquoted values with whitespace cannot be rendered
        editor.set("GRUB_TIMEOUT", Some("3 4")).unwrap();
        assert!(editor.save().is_err());
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grubenv");

        let mut editor = Editor::open(&path, Lens::Simplevars).unwrap();
        assert!(!editor.existed());
        assert!(editor.nodes().is_empty());
        editor.set("kernelopts", Some("root=/dev/sda1 ro")).unwrap();
        assert!(editor.save().unwrap());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "kernelopts=root=/dev/sda1 ro\n"
        );
    }
}
