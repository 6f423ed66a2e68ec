use std::collections::HashMap;
use std::path::PathBuf;

use crate::analysis::AnalysisResult;
use crate::backend::Backend;
use crate::diagnostics::Diagnostic;
use crate::loader::{Loader, SearchPaths};
use crate::locals::LocalScopeResolver;
use crate::resolver::NameResolver;
use crate::signatures::SignatureResolver;
use crate::typecheck::TypeChecker;

/// Cross-cutting compiler options.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub system_roots: Vec<PathBuf>,
    pub project_roots: Vec<PathBuf>,
    /// Source text overrides keyed by module name, consulted before the
    /// filesystem. Used by tests and in-memory drivers.
    pub module_overrides: HashMap<String, String>,
    /// Emit `#line` directives mapping generated C back to L0 source.
    pub emit_line_directives: bool,
    /// Define `L0_TRACE_ARC` before the runtime include.
    pub trace_arc: bool,
    /// Define `L0_TRACE_MEMORY` before the runtime include.
    pub trace_memory: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            system_roots: Vec::new(),
            project_roots: Vec::new(),
            module_overrides: HashMap::new(),
            emit_line_directives: true,
            trace_arc: false,
            trace_memory: false,
        }
    }
}

/// Result of a full compilation: the emitted C99 translation unit (empty
/// when errors blocked lowering), the analysis products, and the error
/// flag of the driver contract.
pub struct Compilation {
    pub c_source: String,
    pub analysis: AnalysisResult,
    pub had_errors: bool,
}

pub struct Compiler {
    options: CompileOptions,
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    /// Run the front-end pipeline for an entry module: load the unit,
    /// resolve names, signatures, local scopes, and types. Diagnostics
    /// accumulate across passes; a pass does not abort the pipeline on a
    /// user error.
    pub fn analyze(&self, entry_module: &str) -> AnalysisResult {
        let mut result = AnalysisResult::default();

        let mut search = SearchPaths::new();
        for root in &self.options.system_roots {
            search.add_system_root(root.clone());
        }
        for root in &self.options.project_roots {
            search.add_project_root(root.clone());
        }

        let mut loader = Loader::new(search, self.options.module_overrides.clone());
        let loaded = loader.build_compilation_unit(entry_module);
        let mark = result.diagnostics.len();
        result.diagnostics.extend(loader.diagnostics);
        result.diagnostics.sort_tail(mark);
        let cu = match loaded {
            Ok(cu) => cu,
            Err(_) => return result,
        };

        let resolver_output = NameResolver::new().resolve(&cu);
        result.module_envs = resolver_output.module_envs;
        result.symbols = resolver_output.symbols;
        let mark = result.diagnostics.len();
        result.diagnostics.extend(resolver_output.diagnostics);
        result.diagnostics.sort_tail(mark);

        {
            let mut signatures =
                SignatureResolver::new(&cu, &result.module_envs, &mut result.symbols);
            signatures.resolve();
            result.func_types = std::mem::take(&mut signatures.func_types);
            result.struct_infos = std::mem::take(&mut signatures.struct_infos);
            result.enum_infos = std::mem::take(&mut signatures.enum_infos);
            result.let_types = std::mem::take(&mut signatures.let_types);
            let mark = result.diagnostics.len();
            result.diagnostics.extend(signatures.into_diagnostics());
            result.diagnostics.sort_tail(mark);
        }

        let (func_envs, local_diagnostics) = LocalScopeResolver::new().resolve(&cu);
        result.func_envs = func_envs;
        let mark = result.diagnostics.len();
        result.diagnostics.extend(local_diagnostics);
        result.diagnostics.sort_tail(mark);

        result.cu = Some(cu);

        let mut checked = None;
        if let Some(mut checker) = TypeChecker::new(&result) {
            checker.check(&result.func_envs.functions);
            checked = Some((
                checker.expr_types,
                checker.var_ref_resolution,
                checker.intrinsic_targets,
                checker.diagnostics,
            ));
        }
        if let Some((expr_types, var_refs, intrinsics, diagnostics)) = checked {
            result.expr_types = expr_types;
            result.var_ref_resolution = var_refs;
            result.intrinsic_targets = intrinsics;
            let mark = result.diagnostics.len();
            result.diagnostics.extend(diagnostics);
            result.diagnostics.sort_tail(mark);
        }

        result
    }

    /// Analyze and lower. Lowering requires zero error diagnostics; an
    /// internal consistency failure surfaces as an `ICE-NNNN` diagnostic
    /// and blocks emission without killing the process.
    pub fn compile(&self, entry_module: &str) -> Compilation {
        let mut analysis = self.analyze(entry_module);

        if analysis.has_errors() {
            return Compilation {
                c_source: String::new(),
                analysis,
                had_errors: true,
            };
        }

        let backend = Backend::new(
            &analysis,
            self.options.emit_line_directives,
            self.options.trace_arc,
            self.options.trace_memory,
        );
        match backend.generate() {
            Ok(c_source) => Compilation {
                c_source,
                analysis,
                had_errors: false,
            },
            Err(ice) => {
                let mut diagnostic = Diagnostic::error(ice.code.clone(), ice.message.clone());
                if let Some(span) = ice.span {
                    diagnostic = diagnostic.with_span(span);
                }
                analysis.diagnostics.push(diagnostic);
                Compilation {
                    c_source: String::new(),
                    analysis,
                    had_errors: true,
                }
            }
        }
    }
}
