use std::path::Path;

use ducky_core::{DuckyError, EntityKind, Language, Result, Span};
use tracing::debug;
use tree_sitter::Node;

use crate::language::LanguageRegistry;
use crate::normalize::{hash_str, normalize_source, strip_whitespace, NormalizeMode};

/// One candidate entity produced by extraction, in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEntity {
    pub kind: EntityKind,
    pub qualified_name: String,
    pub span: Span,
    pub raw_text: String,
    /// Hex SHA-256 of the normalized entity text.
    pub digest: String,
    pub depends_on: Vec<String>,
    pub parsed: bool,
}

impl ExtractedEntity {
    /// Whole-file fallback for sources the grammar rejects. The single entity
    /// spans the entire file and is flagged unparsed so downstream consumers
    /// can skip feedback for it.
    pub fn whole_file(source: &str, stem: &str) -> Self {
        let normalized = strip_whitespace(source);
        Self {
            kind: EntityKind::File,
            qualified_name: stem.to_string(),
            span: Span {
                start_byte: 0,
                end_byte: source.len(),
                start_line: 1,
                end_line: source.lines().count().max(1) as u32,
            },
            raw_text: source.to_string(),
            digest: hash_str(&normalized),
            depends_on: Vec::new(),
            parsed: false,
        }
    }
}

/// Parses source text into structural entities with stable identities and
/// deterministic digests. Same text and language always yield the same
/// entity set, which is what hash-based change detection relies on.
pub struct EntityExtractor {
    registry: LanguageRegistry,
    mode: NormalizeMode,
}

impl EntityExtractor {
    pub fn new(mode: NormalizeMode) -> Self {
        Self {
            registry: LanguageRegistry::new(),
            mode,
        }
    }

    pub fn from_config(comments_matter: bool) -> Self {
        let mode = if comments_matter {
            NormalizeMode::CommentsMatter
        } else {
            NormalizeMode::StripComments
        };
        Self::new(mode)
    }

    pub fn detect_language(&self, path: &Path) -> Option<Language> {
        self.registry.detect_language(path)
    }

    pub fn extract(&self, source: &str, language: &Language) -> Result<Vec<ExtractedEntity>> {
        let mut parser = self.registry.create_parser(language).ok_or_else(|| {
            DuckyError::UnparsableSource(format!("unsupported language: {}", language))
        })?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| DuckyError::UnparsableSource("parser produced no tree".to_string()))?;
        let root = tree.root_node();

        let mut entities = Vec::new();
        let mut import_names = Vec::new();
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            self.visit_top_level(child, source, language, &mut entities, &mut import_names);
        }

        if entities.is_empty() && root.has_error() {
            return Err(DuckyError::UnparsableSource(
                "syntax errors and no extractable entities".to_string(),
            ));
        }

        self.attach_imports(&mut entities, &import_names);
        Ok(entities)
    }

    fn visit_top_level(
        &self,
        node: Node<'_>,
        source: &str,
        language: &Language,
        entities: &mut Vec<ExtractedEntity>,
        import_names: &mut Vec<String>,
    ) {
        let kind = node.kind();

        // Unwrap declaration wrappers so the outer span is kept but the
        // inner node drives classification.
        match (language, kind) {
            (Language::Python, "decorated_definition") => {
                if let Some(inner) = node.child_by_field_name("definition") {
                    self.push_named(node, inner, source, language, entities);
                }
                return;
            }
            (Language::JavaScript | Language::TypeScript, "export_statement") => {
                if let Some(inner) = node.child_by_field_name("declaration") {
                    self.visit_top_level(inner, source, language, entities, import_names);
                }
                return;
            }
            _ => {}
        }

        if is_import_node(language, kind) {
            collect_identifier_texts(node, source, import_names);
            return;
        }

        match (language, kind) {
            (Language::Rust, "impl_item") => {
                let type_name = node
                    .child_by_field_name("type")
                    .and_then(|n| n.utf8_text(source.as_bytes()).ok())
                    .map(|t| t.split('<').next().unwrap_or(t).trim().to_string())
                    .unwrap_or_default();
                if let Some(body) = node.child_by_field_name("body") {
                    let mut cursor = body.walk();
                    for item in body.named_children(&mut cursor) {
                        if item.kind() == "function_item" {
                            if let Some(name) = field_text(item, "name", source) {
                                let qualified = if type_name.is_empty() {
                                    name
                                } else {
                                    format!("{}::{}", type_name, name)
                                };
                                entities.push(self.build_entity(
                                    EntityKind::Method,
                                    qualified,
                                    item,
                                    item,
                                    source,
                                    language,
                                ));
                            }
                        }
                    }
                }
            }
            (Language::Go, "type_declaration") => {
                let mut cursor = node.walk();
                for spec in node.named_children(&mut cursor) {
                    if spec.kind() == "type_spec" {
                        if let Some(name) = field_text(spec, "name", source) {
                            entities.push(self.build_entity(
                                EntityKind::Class,
                                name,
                                spec,
                                spec,
                                source,
                                language,
                            ));
                        }
                    }
                }
            }
            _ => self.push_named(node, node, source, language, entities),
        }
    }

    /// Emit an entity for `inner` (which carries the name) using the span and
    /// text of `outer` (which may include decorators).
    fn push_named(
        &self,
        outer: Node<'_>,
        inner: Node<'_>,
        source: &str,
        language: &Language,
        entities: &mut Vec<ExtractedEntity>,
    ) {
        let Some(kind) = map_entity_kind(language, inner.kind()) else {
            return;
        };
        let Some(mut qualified) = field_text(inner, "name", source) else {
            return;
        };
        if *language == Language::Go && inner.kind() == "method_declaration" {
            if let Some(receiver) = go_receiver_type(inner, source) {
                qualified = format!("{}.{}", receiver, qualified);
            }
        }
        entities.push(self.build_entity(kind, qualified, outer, inner, source, language));
    }

    fn build_entity(
        &self,
        kind: EntityKind,
        qualified_name: String,
        span_node: Node<'_>,
        body_node: Node<'_>,
        source: &str,
        language: &Language,
    ) -> ExtractedEntity {
        let raw_text = span_node
            .utf8_text(source.as_bytes())
            .unwrap_or_default()
            .to_string();
        let normalized = normalize_source(&raw_text, language, self.mode);
        let mut depends_on = Vec::new();
        collect_calls(body_node, source, language, &mut depends_on);
        let own = ducky_core::short_name(&qualified_name).to_string();
        depends_on.retain(|d| *d != own);
        depends_on.sort();
        depends_on.dedup();

        ExtractedEntity {
            kind,
            qualified_name,
            span: Span {
                start_byte: span_node.start_byte(),
                end_byte: span_node.end_byte(),
                start_line: span_node.start_position().row as u32 + 1,
                end_line: span_node.end_position().row as u32 + 1,
            },
            digest: hash_str(&normalized),
            raw_text,
            depends_on,
            parsed: true,
        }
    }

    /// File-level imports become dependencies of the entities that actually
    /// reference the imported name.
    fn attach_imports(&self, entities: &mut [ExtractedEntity], import_names: &[String]) {
        if import_names.is_empty() {
            return;
        }
        for entity in entities.iter_mut() {
            for name in import_names {
                if name.len() > 1
                    && contains_word(&entity.raw_text, name)
                    && !entity.depends_on.contains(name)
                    && entity.qualified_name != *name
                {
                    entity.depends_on.push(name.clone());
                }
            }
            entity.depends_on.sort();
            entity.depends_on.dedup();
        }
        debug!(imports = import_names.len(), "attached import dependencies");
    }
}

fn map_entity_kind(language: &Language, kind: &str) -> Option<EntityKind> {
    match (language, kind) {
        (Language::Rust, "function_item") => Some(EntityKind::Function),
        (Language::Rust, "struct_item" | "enum_item" | "trait_item") => Some(EntityKind::Class),
        (Language::Rust, "mod_item") => Some(EntityKind::Module),

        (Language::Python, "function_definition") => Some(EntityKind::Function),
        (Language::Python, "class_definition") => Some(EntityKind::Class),

        (Language::JavaScript | Language::TypeScript, "function_declaration") => {
            Some(EntityKind::Function)
        }
        (Language::JavaScript | Language::TypeScript, "class_declaration") => {
            Some(EntityKind::Class)
        }
        (Language::TypeScript, "interface_declaration") => Some(EntityKind::Class),

        (Language::Go, "function_declaration") => Some(EntityKind::Function),
        (Language::Go, "method_declaration") => Some(EntityKind::Method),

        _ => None,
    }
}

fn is_import_node(language: &Language, kind: &str) -> bool {
    matches!(
        (language, kind),
        (Language::Rust, "use_declaration")
            | (Language::Python, "import_statement" | "import_from_statement")
            | (Language::JavaScript | Language::TypeScript, "import_statement")
            | (Language::Go, "import_declaration")
    )
}

fn field_text(node: Node<'_>, field: &str, source: &str) -> Option<String> {
    node.child_by_field_name(field)?
        .utf8_text(source.as_bytes())
        .ok()
        .map(String::from)
}

fn go_receiver_type(node: Node<'_>, source: &str) -> Option<String> {
    let receiver = node.child_by_field_name("receiver")?;
    let mut cursor = receiver.walk();
    for param in receiver.named_children(&mut cursor) {
        if let Some(ty) = param.child_by_field_name("type") {
            let text = ty.utf8_text(source.as_bytes()).ok()?;
            return Some(text.trim_start_matches('*').to_string());
        }
    }
    None
}

/// Collect callee names from every call expression under `node`.
fn collect_calls(node: Node<'_>, source: &str, language: &Language, out: &mut Vec<String>) {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        let is_call = match language {
            Language::Python => current.kind() == "call",
            _ => current.kind() == "call_expression",
        };
        if is_call {
            if let Some(callee) = current.child_by_field_name("function") {
                if let Some(name) = callee_name(callee, source) {
                    out.push(name);
                }
            }
        }
        for i in 0..current.named_child_count() {
            if let Some(child) = current.named_child(i) {
                stack.push(child);
            }
        }
    }
}

fn callee_name(node: Node<'_>, source: &str) -> Option<String> {
    match node.kind() {
        "identifier" => node.utf8_text(source.as_bytes()).ok().map(String::from),
        "scoped_identifier" => field_text(node, "name", source),
        "field_expression" => field_text(node, "field", source),
        "attribute" => field_text(node, "attribute", source),
        "member_expression" => field_text(node, "property", source),
        "selector_expression" => field_text(node, "field", source),
        "generic_function" => node
            .child_by_field_name("function")
            .and_then(|inner| callee_name(inner, source)),
        _ => None,
    }
}

fn collect_identifier_texts(node: Node<'_>, source: &str, out: &mut Vec<String>) {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if matches!(current.kind(), "identifier" | "type_identifier") {
            if let Ok(text) = current.utf8_text(source.as_bytes()) {
                out.push(text.to_string());
            }
        }
        for i in 0..current.named_child_count() {
            if let Some(child) = current.named_child(i) {
                stack.push(child);
            }
        }
    }
}

/// Whole-word containment check without a regex dependency.
fn contains_word(text: &str, word: &str) -> bool {
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(pos) = text[start..].find(word) {
        let begin = start + pos;
        let end = begin + word.len();
        let left_ok = begin == 0 || !is_ident_byte(bytes[begin - 1]);
        let right_ok = end == bytes.len() || !is_ident_byte(bytes[end]);
        if left_ok && right_ok {
            return true;
        }
        start = begin + 1;
    }
    false
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
