use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use crate::ast::{Module, NodeIdGen, SourceSpan};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::source::{SourceFile, SourceId};

/// Ordered search configuration for L0 modules.
///
/// System roots are searched before project roots; the dotted module name
/// `a.b` resolves to `a/b.l0` relative to some root.
#[derive(Debug, Clone, Default)]
pub struct SearchPaths {
    pub system_roots: Vec<PathBuf>,
    pub project_roots: Vec<PathBuf>,
}

impl SearchPaths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_system_root(&mut self, root: impl Into<PathBuf>) {
        self.system_roots.push(root.into());
    }

    pub fn add_project_root(&mut self, root: impl Into<PathBuf>) {
        self.project_roots.push(root.into());
    }

    /// Convert a dotted module name like `std.io` to `std/io.l0`.
    pub fn module_relpath(module_name: &str) -> PathBuf {
        let mut path = PathBuf::new();
        for part in module_name.split('.') {
            path.push(part);
        }
        path.set_extension("l0");
        path
    }

    pub fn resolve(&self, module_name: &str) -> Option<PathBuf> {
        let rel = Self::module_relpath(module_name);
        for root in self.system_roots.iter().chain(self.project_roots.iter()) {
            let candidate = root.join(&rel);
            if candidate.exists() {
                return Some(candidate);
            }
        }
        None
    }
}

/// A closed set of modules starting from an entry module, ordered leaves
/// first (imports precede their importers).
#[derive(Debug, Default)]
pub struct CompilationUnit {
    pub entry_name: String,
    modules: Vec<Module>,
    index: HashMap<String, usize>,
}

impl CompilationUnit {
    fn push(&mut self, module: Module) {
        self.index.insert(module.name.clone(), self.modules.len());
        self.modules.push(module);
    }

    pub fn get(&self, module_name: &str) -> Option<&Module> {
        self.index.get(module_name).map(|&i| &self.modules[i])
    }

    pub fn contains(&self, module_name: &str) -> bool {
        self.index.contains_key(module_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Loads modules by dotted name, caching parses and detecting import
/// cycles via the in-flight `loading` stack.
pub struct Loader {
    search: SearchPaths,
    /// Source text overrides keyed by module name; consulted before the
    /// filesystem (used by tests and in-memory drivers).
    overrides: HashMap<String, String>,
    cache: HashMap<String, Module>,
    loading: Vec<String>,
    ids: NodeIdGen,
    next_source_id: u32,
    pub diagnostics: Diagnostics,
}

impl Loader {
    pub fn new(search: SearchPaths, overrides: HashMap<String, String>) -> Self {
        Self {
            search,
            overrides,
            cache: HashMap::new(),
            loading: Vec::new(),
            ids: NodeIdGen::new(),
            next_source_id: 0,
            diagnostics: Diagnostics::new(),
        }
    }

    /// Load the entry module and the transitive closure of its imports.
    ///
    /// Fatal load problems (missing file, import cycle, module name
    /// mismatch, lexical error) are recorded as diagnostics and reported
    /// through `Err`; recovered parse errors leave their diagnostics in
    /// place and let analysis continue over the partial AST.
    pub fn build_compilation_unit(&mut self, entry_name: &str) -> Result<CompilationUnit> {
        self.load_module(entry_name)?;

        let mut cu = CompilationUnit {
            entry_name: entry_name.to_string(),
            ..CompilationUnit::default()
        };
        let mut visiting = Vec::new();
        self.collect(entry_name, &mut cu, &mut visiting);
        Ok(cu)
    }

    /// Post-order walk of the import graph: leaves land first.
    fn collect(&self, module_name: &str, cu: &mut CompilationUnit, visiting: &mut Vec<String>) {
        if cu.contains(module_name) || visiting.iter().any(|name| name == module_name) {
            return;
        }
        visiting.push(module_name.to_string());
        let Some(module) = self.cache.get(module_name) else {
            visiting.pop();
            return;
        };
        let imports: Vec<String> = module.imports.iter().map(|imp| imp.name.clone()).collect();
        for import in imports {
            self.collect(&import, cu, visiting);
        }
        visiting.pop();
        cu.push(self.cache[module_name].clone());
    }

    fn load_module(&mut self, module_name: &str) -> Result<()> {
        // Cycle check must precede the cache check so that re-entry while
        // a module is still loading is caught.
        if self.loading.iter().any(|name| name == module_name) {
            let position = self
                .loading
                .iter()
                .position(|name| name == module_name)
                .unwrap_or(0);
            let mut path: Vec<&str> = self.loading[position..]
                .iter()
                .map(String::as_str)
                .collect();
            path.push(module_name);
            let message = format!("cyclic import detected: {}", path.join(" -> "));
            self.diagnostics
                .push(Diagnostic::error("DRV-0030", message.clone()));
            bail!(message);
        }
        if self.cache.contains_key(module_name) {
            return Ok(());
        }

        let source = match self.overrides.get(module_name) {
            Some(text) => {
                let path = SearchPaths::module_relpath(module_name);
                self.new_source(path, text.clone())
            }
            None => {
                let Some(path) = self.search.resolve(module_name) else {
                    let message = format!(
                        "module '{module_name}' not found in system or project roots"
                    );
                    self.diagnostics
                        .push(Diagnostic::error("DRV-0010", message.clone()));
                    bail!(message);
                };
                let text = match fs::read_to_string(&path) {
                    Ok(text) => text,
                    Err(error) => {
                        let message =
                            format!("failed to read '{}': {error}", path.display());
                        self.diagnostics
                            .push(Diagnostic::error("DRV-0010", message.clone()));
                        bail!(message);
                    }
                };
                self.new_source(path, text)
            }
        };

        self.loading.push(module_name.to_string());
        let result = self.load_from_source(module_name, &source);
        self.loading.pop();
        result
    }

    fn new_source(&mut self, path: PathBuf, text: String) -> SourceFile {
        let id = SourceId(self.next_source_id);
        self.next_source_id += 1;
        SourceFile::new(id, path, text)
    }

    fn load_from_source(&mut self, module_name: &str, source: &SourceFile) -> Result<()> {
        let mut lexer = Lexer::new(source);
        let tokens = match lexer.tokenize() {
            Ok(tokens) => tokens,
            Err(error) => {
                let message = error.to_string();
                self.diagnostics.push(
                    Diagnostic::error(error.code(), message.clone())
                        .with_file(source.path.clone())
                        .with_span(SourceSpan::single_point(error.line(), error.column())),
                );
                bail!(message);
            }
        };

        let mut parser = Parser::new(tokens, Some(source.path.clone()), &mut self.ids);
        let module = parser.parse_module();
        let parse_diagnostics = parser.into_diagnostics();
        let parse_failed = parse_diagnostics.has_errors();
        self.diagnostics.extend(parse_diagnostics);

        if module.name.is_empty() {
            // No module header: nothing to register the parse under.
            bail!("failed to parse module '{module_name}'");
        }

        if module.name != module_name {
            let message = format!(
                "module name mismatch: file {} declares 'module {};' but was loaded as '{}'",
                source.path.display(),
                module.name,
                module_name
            );
            self.diagnostics.push(
                Diagnostic::error("DRV-0020", message.clone()).with_file(source.path.clone()),
            );
            bail!(message);
        }

        let imports: Vec<String> = module.imports.iter().map(|imp| imp.name.clone()).collect();
        self.cache.insert(module_name.to_string(), module);

        // A file with recovered parse errors still has its import list;
        // keep loading so later passes see the whole unit.
        let _ = parse_failed;
        for import in imports {
            self.load_module(&import)?;
        }
        Ok(())
    }
}
