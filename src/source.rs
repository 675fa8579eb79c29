use std::path::Path;

use crate::ast::Ast;

/// Reads source text for `include` expansion.
pub trait SourceLoader {
    fn load(&self, path: &Path) -> std::io::Result<String>;
}

/// Turns source text into an AST. The real parser lives outside this crate.
pub trait Frontend {
    fn parse(&self, source: &str) -> Result<Ast, String>;
}

/// Loads from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsLoader;

impl SourceLoader for FsLoader {
    fn load(&self, path: &Path) -> std::io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// Reads an AST serialized as JSON, the interchange format the parser emits.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFrontend;

impl Frontend for JsonFrontend {
    fn parse(&self, source: &str) -> Result<Ast, String> {
        serde_json::from_str(source).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Item;

    #[test]
    fn json_frontend_parses_text_item() {
        let ast = JsonFrontend.parse(r#"{"items":[{"Text":"hi"}]}"#).unwrap();
        assert_eq!(ast.items, vec![Item::Text("hi".to_string())]);
    }

    #[test]
    fn json_frontend_reports_bad_input() {
        let err = JsonFrontend.parse("{not json").unwrap_err();
        assert!(!err.is_empty());
    }

    #[test]
    fn fs_loader_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        std::fs::write(&path, "{}").unwrap();
        assert_eq!(FsLoader.load(&path).unwrap(), "{}");
        assert!(FsLoader.load(&dir.path().join("missing.json")).is_err());
    }
}
