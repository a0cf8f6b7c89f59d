//! C# source parsing: walks a tree-sitter parse tree into a flat list of
//! [`CodeNode`]s, tracking namespace, parent container, and doc-comments.

use tree_sitter::{Node, Parser};

use crate::error::{CoreError, Result};
use crate::types::{CodeNode, NodeKind};

/// Parses C# source text into [`CodeNode`]s.
pub struct CSharpParser {
    parser: Parser,
}

impl CSharpParser {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_c_sharp::LANGUAGE.into())
            .map_err(|e| CoreError::Parse {
                file: String::new(),
                reason: format!("failed to load C# grammar: {e}"),
            })?;
        Ok(CSharpParser { parser })
    }

    /// Parse the contents of `file` (given as a display path for node
    /// provenance and error messages).
    pub fn parse_file(&mut self, file: &str, content: &str) -> Result<Vec<CodeNode>> {
        self.parse_code(file, content)
    }

    pub fn parse_code(&mut self, file: &str, content: &str) -> Result<Vec<CodeNode>> {
        let tree = self.parser.parse(content, None).ok_or_else(|| CoreError::Parse {
            file: file.to_string(),
            reason: "tree-sitter failed to produce a parse tree".into(),
        })?;

        let root = tree.root_node();
        let namespace = extract_namespace(root, content.as_bytes());

        let mut nodes = Vec::new();
        for child in root.children(&mut root.walk()) {
            traverse(child, content.as_bytes(), file, namespace.as_deref(), None, &mut nodes);
        }
        Ok(nodes)
    }
}

fn node_text<'a>(node: Node, source: &'a [u8]) -> std::borrow::Cow<'a, str> {
    String::from_utf8_lossy(&source[node.byte_range()])
}

fn find_first_child_of_type<'a>(node: Node<'a>, kind: &str) -> Option<Node<'a>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).find(|c| c.kind() == kind)
}

fn get_node_name(node: Node, source: &[u8]) -> Option<String> {
    find_first_child_of_type(node, "identifier").map(|n| node_text(n, source).to_string())
}

/// Find the first `namespace_declaration` in the file and return its
/// dotted name, preferring `qualified_name` over a bare `identifier`.
fn extract_namespace(root: Node, source: &[u8]) -> Option<String> {
    fn search(node: Node, source: &[u8]) -> Option<String> {
        if node.kind() == "namespace_declaration" || node.kind() == "file_scoped_namespace_declaration" {
            if let Some(qn) = find_first_child_of_type(node, "qualified_name") {
                return Some(node_text(qn, source).to_string());
            }
            if let Some(id) = find_first_child_of_type(node, "identifier") {
                return Some(node_text(id, source).to_string());
            }
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if let Some(found) = search(child, source) {
                return Some(found);
            }
        }
        None
    }
    search(root, source)
}

/// Walk backwards through `node`'s preceding siblings, collecting the
/// longest contiguous run of `///` doc-comments, transparently skipping
/// attribute lists and modifier siblings.
fn extract_docstring(node: Node, source: &[u8]) -> Option<String> {
    let mut lines = Vec::new();
    let mut current = node.prev_sibling();
    while let Some(sibling) = current {
        match sibling.kind() {
            "comment" => {
                let text = node_text(sibling, source);
                let trimmed = text.trim();
                if trimmed.starts_with("///") {
                    lines.push(trimmed.to_string());
                    current = sibling.prev_sibling();
                    continue;
                }
                break;
            }
            "attribute_list" | "modifier" => {
                current = sibling.prev_sibling();
                continue;
            }
            _ => break,
        }
    }
    if lines.is_empty() {
        return None;
    }
    lines.reverse();
    Some(lines.join("\n"))
}

fn make_node(
    kind: NodeKind,
    name: String,
    node: Node,
    source: &[u8],
    file: &str,
    namespace: Option<&str>,
    parent: Option<&str>,
) -> CodeNode {
    CodeNode {
        kind,
        name,
        start_line: node.start_position().row + 1,
        end_line: node.end_position().row + 1,
        code: node_text(node, source).to_string(),
        docstring: extract_docstring(node, source),
        parent: parent.map(|s| s.to_string()),
        namespace: namespace.map(|s| s.to_string()),
        file: file.to_string(),
    }
}

fn traverse(
    node: Node,
    source: &[u8],
    file: &str,
    namespace: Option<&str>,
    parent: Option<&str>,
    out: &mut Vec<CodeNode>,
) {
    match node.kind() {
        "namespace_declaration" | "file_scoped_namespace_declaration" => {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                traverse(child, source, file, namespace, parent, out);
            }
        }
        "class_declaration" | "interface_declaration" | "struct_declaration" => {
            let kind = match node.kind() {
                "class_declaration" => NodeKind::Class,
                "interface_declaration" => NodeKind::Interface,
                _ => NodeKind::Struct,
            };
            let Some(name) = get_node_name(node, source) else {
                return;
            };
            out.push(make_node(kind, name.clone(), node, source, file, namespace, parent));

            if let Some(body) = find_first_child_of_type(node, "declaration_list") {
                let mut cursor = body.walk();
                for child in body.children(&mut cursor) {
                    traverse(child, source, file, namespace, Some(&name), out);
                }
            }
        }
        "method_declaration" | "constructor_declaration" => {
            if let Some(name) = get_node_name(node, source) {
                out.push(make_node(
                    NodeKind::Method,
                    name,
                    node,
                    source,
                    file,
                    namespace,
                    parent,
                ));
            }
        }
        "property_declaration" => {
            if let Some(name) = get_node_name(node, source) {
                out.push(make_node(
                    NodeKind::Property,
                    name,
                    node,
                    source,
                    file,
                    namespace,
                    parent,
                ));
            }
        }
        "field_declaration" => {
            extract_fields(node, source, file, namespace, parent, out);
        }
        _ => {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                traverse(child, source, file, namespace, parent, out);
            }
        }
    }
}

/// A `field_declaration` may declare several variables at once
/// (`int a, b, c;`); emit one [`CodeNode`] per declarator, all sharing the
/// enclosing declaration's code, lines, and docstring.
fn extract_fields(
    node: Node,
    source: &[u8],
    file: &str,
    namespace: Option<&str>,
    parent: Option<&str>,
    out: &mut Vec<CodeNode>,
) {
    let Some(var_decl) = find_first_child_of_type(node, "variable_declaration") else {
        return;
    };
    let mut cursor = var_decl.walk();
    for declarator in var_decl.children(&mut cursor) {
        if declarator.kind() != "variable_declarator" {
            continue;
        }
        let Some(name_node) = find_first_child_of_type(declarator, "identifier") else {
            continue;
        };
        let name = node_text(name_node, source).to_string();
        out.push(make_node(
            NodeKind::Field,
            name,
            node,
            source,
            file,
            namespace,
            parent,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENTITY_MANAGER: &str = r#"
namespace Game.Core
{
    /// <summary>
    /// Owns the lifecycle of every entity in the scene.
    /// </summary>
    public class EntityManager
    {
        private int _count;

        /// <summary>
        /// Creates a new entity and returns its id.
        /// </summary>
        public int CreateEntity()
        {
            _count++;
            return _count;
        }

        public void DestroyEntity(int id)
        {
            _count--;
        }
    }
}
"#;

    #[test]
    fn extracts_class_methods_and_fields() {
        let mut parser = CSharpParser::new().unwrap();
        let nodes = parser.parse_code("EntityManager.cs", ENTITY_MANAGER).unwrap();

        let class = nodes.iter().find(|n| n.kind == NodeKind::Class).unwrap();
        assert_eq!(class.name, "EntityManager");
        assert_eq!(class.namespace.as_deref(), Some("Game.Core"));
        assert!(class.docstring.as_deref().unwrap().contains("lifecycle"));

        let methods: Vec<_> = nodes.iter().filter(|n| n.kind == NodeKind::Method).collect();
        assert_eq!(methods.len(), 2);
        let create = methods.iter().find(|m| m.name == "CreateEntity").unwrap();
        assert_eq!(create.parent.as_deref(), Some("EntityManager"));
        assert!(create.docstring.as_deref().unwrap().contains("Creates a new entity"));

        let field = nodes.iter().find(|n| n.kind == NodeKind::Field).unwrap();
        assert_eq!(field.name, "_count");
        assert_eq!(field.parent.as_deref(), Some("EntityManager"));
    }

    #[test]
    fn empty_file_has_no_nodes() {
        let mut parser = CSharpParser::new().unwrap();
        let nodes = parser.parse_code("Empty.cs", "").unwrap();
        assert!(nodes.is_empty());
    }

    #[test]
    fn multi_variable_field_emits_one_node_per_declarator() {
        let src = r#"
public class Point
{
    public int X, Y;
}
"#;
        let mut parser = CSharpParser::new().unwrap();
        let nodes = parser.parse_code("Point.cs", src).unwrap();
        let fields: Vec<_> = nodes.iter().filter(|n| n.kind == NodeKind::Field).collect();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "X");
        assert_eq!(fields[1].name, "Y");
    }
}
