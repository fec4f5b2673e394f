use std::collections::HashMap;
use std::path::Path;

use ducky_core::Language;
use tree_sitter::Parser;

pub struct LanguageConfig {
    pub language: tree_sitter::Language,
    pub file_extensions: Vec<&'static str>,
}

/// Maps file extensions to tree-sitter grammars and builds configured parsers.
pub struct LanguageRegistry {
    configs: HashMap<Language, LanguageConfig>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        let mut configs = HashMap::new();

        configs.insert(
            Language::Rust,
            LanguageConfig {
                language: tree_sitter_rust::LANGUAGE.into(),
                file_extensions: vec!["rs"],
            },
        );

        configs.insert(
            Language::Python,
            LanguageConfig {
                language: tree_sitter_python::LANGUAGE.into(),
                file_extensions: vec!["py", "pyi"],
            },
        );

        configs.insert(
            Language::JavaScript,
            LanguageConfig {
                language: tree_sitter_javascript::LANGUAGE.into(),
                file_extensions: vec!["js", "jsx"],
            },
        );

        configs.insert(
            Language::TypeScript,
            LanguageConfig {
                language: tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
                file_extensions: vec!["ts", "tsx"],
            },
        );

        configs.insert(
            Language::Go,
            LanguageConfig {
                language: tree_sitter_go::LANGUAGE.into(),
                file_extensions: vec!["go"],
            },
        );

        Self { configs }
    }

    pub fn detect_language(&self, path: &Path) -> Option<Language> {
        let extension = path.extension()?.to_str()?;
        for (lang, config) in &self.configs {
            if config.file_extensions.contains(&extension) {
                return Some(lang.clone());
            }
        }
        None
    }

    pub fn create_parser(&self, language: &Language) -> Option<Parser> {
        let config = self.configs.get(language)?;
        let mut parser = Parser::new();
        parser.set_language(&config.language).ok()?;
        Some(parser)
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tree_sitter::{LANGUAGE_VERSION, MIN_COMPATIBLE_LANGUAGE_VERSION};

    #[test]
    fn registered_grammars_use_supported_versions() {
        let registry = LanguageRegistry::new();
        for (language, config) in &registry.configs {
            let version = config.language.version();
            assert!(
                (MIN_COMPATIBLE_LANGUAGE_VERSION..=LANGUAGE_VERSION).contains(&version),
                "grammar for {:?} uses incompatible tree-sitter version {}",
                language,
                version
            );
        }
    }

    #[test]
    fn detects_language_from_extension() {
        let registry = LanguageRegistry::new();
        assert_eq!(
            registry.detect_language(Path::new("src/main.rs")),
            Some(Language::Rust)
        );
        assert_eq!(
            registry.detect_language(Path::new("app/views.py")),
            Some(Language::Python)
        );
        assert_eq!(registry.detect_language(Path::new("notes.txt")), None);
    }
}
