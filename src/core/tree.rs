//! Tree view of a store.
//!
//! Built from the flat secret lists of the root store and its mounts.
//! Mount nodes replace whatever was at their path, so adding mounts in
//! ascending alias length lets deeper mounts shadow shallower ones.

use std::fmt;

const BRANCH: &str = "├── ";
const LAST: &str = "└── ";
const PIPE: &str = "│   ";
const SPACE: &str = "    ";

/// One entry in the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    name: String,
    leaf: bool,
    template: bool,
    mount: Option<String>,
    children: Vec<Node>,
}

impl Node {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this node is a secret.
    pub fn is_leaf(&self) -> bool {
        self.leaf
    }

    /// Whether this node has (or can have) entries below it.
    pub fn is_dir(&self) -> bool {
        !self.children.is_empty() || self.mount.is_some()
    }

    pub fn has_template(&self) -> bool {
        self.template
    }

    /// Filesystem path of the mounted store, for mount points.
    pub fn mount(&self) -> Option<&str> {
        self.mount.as_deref()
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    fn child_mut(&mut self, name: &str) -> &mut Node {
        let idx = match self.children.binary_search_by(|c| c.name.as_str().cmp(name)) {
            Ok(idx) => idx,
            Err(idx) => {
                self.children.insert(idx, Node::new(name));
                idx
            }
        };
        &mut self.children[idx]
    }

    fn child(&self, name: &str) -> Option<&Node> {
        self.children
            .binary_search_by(|c| c.name.as_str().cmp(name))
            .ok()
            .map(|idx| &self.children[idx])
    }

    fn label(&self) -> String {
        let mut label = self.name.clone();
        if let Some(path) = &self.mount {
            label.push_str(&format!(" ({path})"));
        } else if self.is_dir() {
            label.push('/');
        }
        if self.template {
            label.push_str(" (template)");
        }
        label
    }

    fn count(&self) -> usize {
        usize::from(self.leaf) + self.children.iter().map(Node::count).sum::<usize>()
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// A store tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    root: Node,
}

impl Tree {
    pub fn new(name: &str) -> Self {
        Self {
            root: Node::new(name),
        }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    fn node_mut(&mut self, path: &str) -> Option<&mut Node> {
        let mut node = &mut self.root;
        let mut any = false;
        for seg in segments(path) {
            node = node.child_mut(seg);
            any = true;
        }
        any.then_some(node)
    }

    /// Add a secret.
    pub fn add_file(&mut self, path: &str) {
        if let Some(node) = self.node_mut(path) {
            node.leaf = true;
        }
    }

    /// Add a mount point, replacing any existing entry at `path`.
    pub fn add_mount(&mut self, path: &str, dest: &str) {
        if let Some(node) = self.node_mut(path) {
            let name = std::mem::take(&mut node.name);
            *node = Node::new(&name);
            node.mount = Some(dest.to_string());
        }
    }

    /// Mark the directory at `path` as carrying a template.
    pub fn add_template(&mut self, path: &str) {
        match self.node_mut(path) {
            Some(node) => node.template = true,
            None => self.root.template = true,
        }
    }

    /// Secret paths, sorted. Directories cut off by `max_depth` are listed
    /// with a trailing `/`; depth 0 means top level only.
    pub fn list(&self, max_depth: Option<usize>) -> Vec<String> {
        let mut out = Vec::new();
        walk(&self.root, "", 0, max_depth, &mut |path: &str, node: &Node, truncated: bool| {
            if node.leaf {
                out.push(path.to_string());
            }
            if truncated {
                out.push(format!("{path}/"));
            }
        });
        out
    }

    /// Directory paths, sorted, down to `max_depth`.
    pub fn list_folders(&self, max_depth: Option<usize>) -> Vec<String> {
        let mut out = Vec::new();
        walk(&self.root, "", 0, max_depth, &mut |path: &str, node: &Node, _: bool| {
            if node.is_dir() {
                out.push(path.to_string());
            }
        });
        out
    }

    /// Subtree rooted at the directory `path`.
    pub fn find_folder(&self, path: &str) -> Option<Tree> {
        let mut node = &self.root;
        for seg in segments(path) {
            node = node.child(seg)?;
        }
        node.is_dir().then(|| Tree { root: node.clone() })
    }

    /// Number of secrets.
    pub fn len(&self) -> usize {
        self.root.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render as an ASCII tree.
    pub fn format(&self, max_depth: Option<usize>) -> String {
        let mut out = self.root.label();
        out.push('\n');
        render(&self.root, "", 0, max_depth, &mut out);
        out
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format(None))
    }
}

/// Visit every node below `node`; the callback gets the path, the node and
/// whether its children were cut off by the depth limit.
fn walk<F>(node: &Node, prefix: &str, depth: usize, max: Option<usize>, f: &mut F)
where
    F: FnMut(&str, &Node, bool),
{
    for child in &node.children {
        let path = if prefix.is_empty() {
            child.name.clone()
        } else {
            format!("{prefix}/{}", child.name)
        };
        let descend = max.map_or(true, |m| depth < m);
        f(&path, child, child.is_dir() && !descend);
        if descend {
            walk(child, &path, depth + 1, max, f);
        }
    }
}

fn render(node: &Node, indent: &str, depth: usize, max: Option<usize>, out: &mut String) {
    let count = node.children.len();
    for (i, child) in node.children.iter().enumerate() {
        let last = i + 1 == count;
        out.push_str(indent);
        out.push_str(if last { LAST } else { BRANCH });
        out.push_str(&child.label());
        out.push('\n');
        if max.map_or(true, |m| depth < m) {
            let next = format!("{indent}{}", if last { SPACE } else { PIPE });
            render(child, &next, depth + 1, max, out);
        }
    }
}
