//! tree-sitter based Python parsing shared by the safety gate and the
//! dependency manifest update. CPython's own compile check lives in
//! [`super::interpreter`].

use tree_sitter::{Node, Parser, Tree};

/// Location of the first syntax problem in a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxIssue {
    /// 1-based
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl std::fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}:{}: {}", self.line, self.column, self.message)
    }
}

/// A parsed Python module together with its source text.
pub struct PythonModule<'a> {
    source: &'a str,
    tree: Tree,
}

impl<'a> PythonModule<'a> {
    pub fn parse(source: &'a str) -> Result<Self, SyntaxIssue> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| SyntaxIssue {
                line: 0,
                column: 0,
                message: format!("python grammar unavailable: {}", e),
            })?;
        let tree = parser.parse(source, None).ok_or_else(|| SyntaxIssue {
            line: 0,
            column: 0,
            message: "parser returned no tree".to_string(),
        })?;
        Ok(Self { source, tree })
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    /// First `ERROR` or `MISSING` node in document order, if any.
    pub fn first_syntax_issue(&self) -> Option<SyntaxIssue> {
        let root = self.root();
        if !root.has_error() {
            return None;
        }
        let node = find_error(root).unwrap_or(root);
        let pos = node.start_position();
        let message = if node.is_missing() {
            format!("missing {}", node.kind())
        } else {
            let snippet = self.text(node).lines().next().unwrap_or("").trim();
            format!("invalid syntax near '{}'", shorten(snippet, 40))
        };
        Some(SyntaxIssue {
            line: pos.row + 1,
            column: pos.column + 1,
            message,
        })
    }

    /// Direct children of the module node, comments included.
    pub fn top_level(&self) -> Vec<Node<'_>> {
        let root = self.root();
        let mut cursor = root.walk();
        root.named_children(&mut cursor).collect()
    }

    pub fn text(&self, node: Node<'_>) -> &'a str {
        &self.source[node.byte_range()]
    }

    /// Root package of every absolute import anywhere in the module, in
    /// first-seen order without duplicates. Relative and `__future__`
    /// imports are skipped.
    pub fn imported_roots(&self) -> Vec<String> {
        let mut roots = Vec::new();
        collect_imports(self.root(), self.source, &mut roots);
        roots
    }
}

fn find_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|c| c.has_error() || c.is_missing())
        .find_map(find_error)
}

fn collect_imports(node: Node<'_>, source: &str, roots: &mut Vec<String>) {
    match node.kind() {
        "import_statement" => {
            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                let dotted = match name.kind() {
                    "aliased_import" => name.child_by_field_name("name"),
                    _ => Some(name),
                };
                if let Some(dotted) = dotted {
                    push_root(&source[dotted.byte_range()], roots);
                }
            }
        }
        "import_from_statement" => {
            if let Some(module) = node.child_by_field_name("module_name")
                && module.kind() == "dotted_name"
            {
                push_root(&source[module.byte_range()], roots);
            }
        }
        _ => {
            let mut cursor = node.walk();
            let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
            for child in children {
                collect_imports(child, source, roots);
            }
        }
    }
}

fn push_root(dotted: &str, roots: &mut Vec<String>) {
    let root = dotted.split('.').next().unwrap_or("").trim();
    if !root.is_empty() && root != "__future__" && !roots.iter().any(|r| r == root) {
        roots.push(root.to_string());
    }
}

fn shorten(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{}...", head)
    }
}
