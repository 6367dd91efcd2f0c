//! Compilation of generated access layers into a loadable unit.
//!
//! [`BuildPipeline::build`] lays the source units out as a Cargo package in a
//! scratch directory, hands it to a [`Compiler`] and reports every diagnostic
//! to the caller's sink.

mod compiler;
mod symbols;

pub use compiler::{CargoCompiler, CompileJob, CompileOutput, Compiler};
pub use symbols::{Symbol, SymbolIndex, SymbolKind};

use crate::type_utils::{crate_ident_name, normalize_type_path, parse_ident};
use crate::{GeneratedSource, SourceUnit};
use docpad::{CrateReference, Diagnostic, DriverError, Result};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Directory of the unit files, relative to the package root.
const UNITS_DIR: &str = "src/units";

pub struct BuildPipeline<C: Compiler> {
    compiler: C,
    /// The runtime crate every generated unit links against.
    runtime: CrateReference,
    scratch_root: Option<PathBuf>,
}

impl<C: Compiler> BuildPipeline<C> {
    pub fn new(compiler: C) -> Self {
        Self {
            compiler,
            runtime: CrateReference::registry("docpad", env!("CARGO_PKG_VERSION")),
            scratch_root: None,
        }
    }

    /// Link against a different runtime, e.g. a local checkout.
    pub fn with_runtime(mut self, runtime: CrateReference) -> Self {
        self.runtime = runtime;
        self
    }

    /// Create build directories under `root` instead of the system temp dir.
    pub fn in_directory(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    /// Compile the generated units followed by `static_sources`.
    ///
    /// Every diagnostic is passed to `sink`. Any error-level diagnostic ends
    /// the build with [`DriverError::BuildFailed`] carrying all of them.
    pub fn build(
        &self,
        generated: &GeneratedSource,
        static_sources: &[SourceUnit],
        references: &[CrateReference],
        output_identity: &str,
        sink: &mut dyn FnMut(&str),
    ) -> Result<BuiltUnit> {
        let package = crate_ident_name(output_identity.trim());
        parse_ident(&package, "output identity")?;

        let units: Vec<&SourceUnit> = generated.units.iter().chain(static_sources).collect();
        let mut names = HashSet::new();
        for unit in &units {
            parse_ident(&unit.name, "source unit name")?;
            if !names.insert(unit.name.as_str()) {
                return Err(DriverError::InvalidMapping(format!(
                    "source unit '{}' is supplied more than once",
                    unit.name
                )));
            }
        }

        // Syntax errors are reported without invoking the compiler.
        let mut symbols = SymbolIndex::new();
        let mut syntax_errors = Vec::new();
        for unit in &units {
            match syn::parse_file(&unit.text) {
                Ok(file) => symbols.add_unit(&unit.name, &file),
                Err(e) => {
                    let start = e.span().start();
                    syntax_errors.push(
                        Diagnostic::error(e.to_string()).at(unit.name.as_str(), start.line, start.column + 1),
                    );
                }
            }
        }
        if !syntax_errors.is_empty() {
            return Err(fail(syntax_errors, sink));
        }

        let dependencies = self.dependencies(generated, references)?;
        let scratch = match &self.scratch_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                tempfile::Builder::new().prefix("docpad-build-").tempdir_in(root)?
            }
            None => tempfile::Builder::new().prefix("docpad-build-").tempdir()?,
        };
        write_package(scratch.path(), &package, &units, &dependencies)?;

        let job = CompileJob {
            manifest_path: scratch.path().join("Cargo.toml"),
            target_dir: scratch.path().join("target"),
            package: package.clone(),
        };
        log::debug!(
            "Compiling {} unit(s) as '{package}' in {}",
            units.len(),
            scratch.path().display()
        );
        let output = self.compiler.compile(&job)?;

        let mut diagnostics: Vec<Diagnostic> = output.diagnostics.into_iter().map(remap_unit_path).collect();
        if !output.success && !diagnostics.iter().any(Diagnostic::is_error) {
            diagnostics.push(Diagnostic::error("compiler reported failure without an error message"));
        }
        if diagnostics.iter().any(Diagnostic::is_error) {
            return Err(fail(diagnostics, sink));
        }
        for diagnostic in &diagnostics {
            sink(&diagnostic.to_string());
        }

        let directory = scratch.keep();
        log::debug!("Built '{package}' with {} artifact(s)", output.artifacts.len());

        Ok(BuiltUnit {
            identity: package,
            directory,
            artifacts: output.artifacts,
            symbols,
            entity_types: generated.entity_types.clone(),
            context_path: generated.context_path.clone(),
        })
    }

    /// Runtime, generated references and caller references, keyed by crate
    /// name. Relative paths are made absolute since the package is built
    /// elsewhere.
    fn dependencies(
        &self,
        generated: &GeneratedSource,
        references: &[CrateReference],
    ) -> Result<BTreeMap<String, CrateReference>> {
        let mut dependencies: BTreeMap<String, CrateReference> = BTreeMap::new();
        let all = std::iter::once(&self.runtime)
            .chain(&generated.references)
            .chain(references);

        for reference in all {
            let mut reference = reference.clone();
            if let Some(path) = &reference.path {
                reference.path = Some(std::path::absolute(path)?);
            }
            match dependencies.get(&reference.name) {
                Some(existing) if *existing != reference => {
                    return Err(DriverError::InvalidMapping(format!(
                        "crate '{}' is referenced from two different locations",
                        reference.name
                    )));
                }
                Some(_) => {}
                None => {
                    dependencies.insert(reference.name.clone(), reference);
                }
            }
        }
        Ok(dependencies)
    }
}

fn fail(diagnostics: Vec<Diagnostic>, sink: &mut dyn FnMut(&str)) -> DriverError {
    for diagnostic in &diagnostics {
        sink(&diagnostic.to_string());
    }
    DriverError::BuildFailed { diagnostics }
}

/// Point diagnostics at unit names instead of scratch file paths.
fn remap_unit_path(mut diagnostic: Diagnostic) -> Diagnostic {
    if let Some(file) = &diagnostic.file {
        let unit = file
            .replace('\\', "/")
            .strip_prefix(&format!("{UNITS_DIR}/"))
            .and_then(|rest| rest.strip_suffix(".rs"))
            .map(str::to_string);
        if unit.is_some() {
            diagnostic.file = unit;
        }
    }
    diagnostic
}

fn write_package(
    root: &Path,
    package: &str,
    units: &[&SourceUnit],
    dependencies: &BTreeMap<String, CrateReference>,
) -> Result<()> {
    let units_dir = root.join(UNITS_DIR);
    std::fs::create_dir_all(&units_dir)?;

    let mut lib = String::from("// Generated by docpad-codegen. Do not edit.\n");
    for unit in units {
        std::fs::write(units_dir.join(format!("{}.rs", unit.name)), &unit.text)?;
        lib.push_str(&format!(
            "\n#[path = \"units/{name}.rs\"]\nmod unit_{name};\n#[allow(unused_imports)]\npub use unit_{name}::*;\n",
            name = unit.name
        ));
    }
    std::fs::write(root.join("src").join("lib.rs"), lib)?;
    std::fs::write(root.join("Cargo.toml"), manifest(package, dependencies)?)?;
    Ok(())
}

fn manifest(package: &str, dependencies: &BTreeMap<String, CrateReference>) -> Result<String> {
    let mut out = format!(
        "[package]\nname = {}\nversion = \"0.0.0\"\nedition = \"2021\"\npublish = false\n\n[lib]\npath = \"src/lib.rs\"\n\n[dependencies]\n",
        toml_string(package)?
    );
    for (name, reference) in dependencies {
        let location = match (&reference.path, &reference.version) {
            (Some(path), _) => format!("path = {}", toml_string(&path.to_string_lossy())?),
            (None, Some(version)) => format!("version = {}", toml_string(version)?),
            (None, None) => {
                return Err(DriverError::InvalidMapping(format!(
                    "crate reference '{name}' has neither a path nor a version"
                )));
            }
        };
        out.push_str(&format!("{name} = {{ {location} }}\n"));
    }
    // Keep the scratch package out of any enclosing workspace.
    out.push_str("\n[workspace]\n");
    Ok(out)
}

/// A TOML basic string. JSON string escapes are valid TOML escapes.
fn toml_string(value: &str) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// A successfully compiled access layer.
#[derive(Debug, Clone)]
pub struct BuiltUnit {
    /// Crate name the unit was built as.
    pub identity: String,
    /// Package directory, left in place for the host to load from.
    pub directory: PathBuf,
    pub artifacts: Vec<PathBuf>,
    pub symbols: SymbolIndex,
    pub entity_types: Vec<String>,
    pub context_path: String,
}

impl BuiltUnit {
    /// Find a public type by its path from the crate root.
    pub fn locate(&self, path: &str) -> Option<&Symbol> {
        self.symbols.get(&normalize_type_path(path))
    }

    /// The generated context type.
    pub fn context(&self) -> Result<&Symbol> {
        self.require(&self.context_path)
    }

    /// The generic change-tracking interceptor.
    pub fn interceptor(&self) -> Result<&Symbol> {
        self.require("Interceptor")
    }

    /// Instantiate the generic type at `path` with `type_args`, which have to
    /// be element types of the context. Returns the fully qualified
    /// instantiated path, e.g. `out::Interceptor<::models::StringEntity>`.
    pub fn instantiate(&self, path: &str, type_args: &[&str]) -> Result<String> {
        let path = normalize_type_path(path);
        let symbol = self.require(&path)?;
        if symbol.generics != type_args.len() {
            return Err(DriverError::InvalidMapping(format!(
                "`{path}` takes {} type argument(s), {} given",
                symbol.generics,
                type_args.len()
            )));
        }

        let mut args = Vec::with_capacity(type_args.len());
        for arg in type_args {
            let arg = normalize_type_path(arg);
            if !self.entity_types.contains(&arg) {
                return Err(DriverError::UnresolvedType {
                    type_name: arg,
                    context: format!("instantiation of `{path}`"),
                });
            }
            args.push(format!("::{arg}"));
        }

        if args.is_empty() {
            Ok(format!("{}::{path}", self.identity))
        } else {
            Ok(format!("{}::{path}<{}>", self.identity, args.join(", ")))
        }
    }

    fn require(&self, path: &str) -> Result<&Symbol> {
        self.locate(path).ok_or_else(|| DriverError::UnresolvedType {
            type_name: path.to_string(),
            context: format!("built unit '{}'", self.identity),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{generate_access_layer, TypeRegistry};
    use docpad::{CollectionTypeMapping, ConnectionProperties, Severity};
    use std::cell::RefCell;

    /// Records the job and returns a canned result.
    struct FakeCompiler {
        output: CompileOutput,
        manifest: RefCell<Option<String>>,
        lib: RefCell<Option<String>>,
        calls: RefCell<usize>,
    }

    impl FakeCompiler {
        fn returning(output: CompileOutput) -> Self {
            Self {
                output,
                manifest: RefCell::new(None),
                lib: RefCell::new(None),
                calls: RefCell::new(0),
            }
        }

        fn succeeding() -> Self {
            Self::returning(CompileOutput {
                success: true,
                diagnostics: Vec::new(),
                artifacts: vec![PathBuf::from("target/debug/libout.rlib")],
            })
        }
    }

    impl Compiler for FakeCompiler {
        fn compile(&self, job: &CompileJob) -> Result<CompileOutput> {
            *self.calls.borrow_mut() += 1;
            *self.manifest.borrow_mut() = Some(std::fs::read_to_string(&job.manifest_path)?);
            let lib = job.manifest_path.with_file_name("src").join("lib.rs");
            *self.lib.borrow_mut() = Some(std::fs::read_to_string(lib)?);
            Ok(self.output.clone())
        }
    }

    fn generated() -> GeneratedSource {
        let models = CrateReference::local("models", "/work/models");
        let registry = TypeRegistry::new()
            .with_type("models::StringEntity", &models)
            .unwrap();
        let mut props = ConnectionProperties {
            connection_string: "mongodb://localhost".into(),
            selected_database: "db".into(),
            ..Default::default()
        };
        props.collection_type_mappings.insert(
            "db".into(),
            vec![
                CollectionTypeMapping::typed("collection", "models::StringEntity"),
                CollectionTypeMapping::untyped("untyped"),
            ],
        );
        generate_access_layer(&props, &registry, "driver", "testns").unwrap()
    }

    #[test]
    fn test_build_lays_out_package() {
        let scratch = tempfile::tempdir().unwrap();
        let pipeline = BuildPipeline::new(FakeCompiler::succeeding())
            .with_runtime(CrateReference::local("docpad", "/work/docpad"))
            .in_directory(scratch.path());

        let extra = SourceUnit::static_unit("extras", "pub struct Marker;\n");
        let mut messages = Vec::new();
        let built = pipeline
            .build(
                &generated(),
                &[extra],
                &[CrateReference::registry("chrono", "0.4")],
                "out",
                &mut |m| messages.push(m.to_string()),
            )
            .unwrap();

        assert!(messages.is_empty());
        assert_eq!(built.identity, "out");
        assert!(built.directory.starts_with(scratch.path()));
        assert!(built.directory.join("src/units/testns_driver.rs").exists());
        assert!(built.directory.join("src/units/extras.rs").exists());

        let manifest = pipeline.compiler.manifest.borrow().clone().unwrap();
        assert!(manifest.contains("name = \"out\""));
        assert!(manifest.contains("chrono = { version = \"0.4\" }"));
        assert!(manifest.contains("docpad = { path = \"/work/docpad\" }"));
        assert!(manifest.contains("models = { path = \"/work/models\" }"));
        assert!(manifest.trim_end().ends_with("[workspace]"));

        let lib = pipeline.compiler.lib.borrow().clone().unwrap();
        let order: Vec<usize> = ["unit_testns_driver", "unit_prelude", "unit_context_base", "unit_extras"]
            .iter()
            .map(|m| lib.find(&format!("mod {m};")).unwrap())
            .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]));

        assert!(built.locate("testns::driver").is_some());
        assert!(built.locate("Marker").is_some());
        assert_eq!(built.interceptor().unwrap().generics, 1);
    }

    #[test]
    fn test_syntax_error_skips_compiler() {
        let pipeline = BuildPipeline::new(FakeCompiler::succeeding());
        let broken = SourceUnit::static_unit("broken", "pub struct {}\n");
        let mut messages = Vec::new();

        let err = pipeline
            .build(&generated(), &[broken], &[], "out", &mut |m| messages.push(m.to_string()))
            .unwrap_err();

        assert_eq!(*pipeline.compiler.calls.borrow(), 0);
        let DriverError::BuildFailed { diagnostics } = err else {
            panic!("expected BuildFailed");
        };
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].file.as_deref(), Some("broken"));
        assert_eq!(diagnostics[0].line, Some(1));
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("error: "));
    }

    #[test]
    fn test_compile_errors_fail_with_all_diagnostics() {
        let scratch = tempfile::tempdir().unwrap();
        let output = CompileOutput {
            success: false,
            diagnostics: vec![
                Diagnostic::warning("unused import").at("src/units/prelude.rs", 3, 5),
                Diagnostic::error("mismatched types").at("src/units/testns_driver.rs", 20, 9),
            ],
            artifacts: Vec::new(),
        };
        let pipeline = BuildPipeline::new(FakeCompiler::returning(output)).in_directory(scratch.path());
        let mut messages = Vec::new();

        let err = pipeline
            .build(&generated(), &[], &[], "out", &mut |m| messages.push(m.to_string()))
            .unwrap_err();

        let DriverError::BuildFailed { diagnostics } = err else {
            panic!("expected BuildFailed");
        };
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(
            messages,
            vec![
                "warning: unused import --> prelude:3:5".to_string(),
                "error: mismatched types --> testns_driver:20:9".to_string(),
            ]
        );
        // Failed builds leave nothing behind.
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_warnings_do_not_block() {
        let scratch = tempfile::tempdir().unwrap();
        let output = CompileOutput {
            success: true,
            diagnostics: vec![Diagnostic::warning("unused variable").at("src/units/context_base.rs", 1, 1)],
            artifacts: Vec::new(),
        };
        let pipeline = BuildPipeline::new(FakeCompiler::returning(output)).in_directory(scratch.path());
        let mut messages = Vec::new();

        let built = pipeline.build(&generated(), &[], &[], "out", &mut |m| messages.push(m.to_string()));
        assert!(built.is_ok());
        assert_eq!(messages, vec!["warning: unused variable --> context_base:1:1".to_string()]);
    }

    #[test]
    fn test_silent_failure_still_reports_an_error() {
        let output = CompileOutput {
            success: false,
            ..Default::default()
        };
        let pipeline = BuildPipeline::new(FakeCompiler::returning(output));
        let err = pipeline
            .build(&generated(), &[], &[], "out", &mut |_| {})
            .unwrap_err();
        let DriverError::BuildFailed { diagnostics } = err else {
            panic!("expected BuildFailed");
        };
        assert_eq!(diagnostics[0].severity, Severity::Error);
    }

    #[test]
    fn test_duplicate_unit_names_rejected() {
        let pipeline = BuildPipeline::new(FakeCompiler::succeeding());
        let clash = SourceUnit::static_unit("prelude", "pub struct Other;\n");
        let err = pipeline
            .build(&generated(), &[clash], &[], "out", &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidMapping(_)));
        assert_eq!(*pipeline.compiler.calls.borrow(), 0);
    }

    #[test]
    fn test_conflicting_references_rejected() {
        let pipeline = BuildPipeline::new(FakeCompiler::succeeding());
        let err = pipeline
            .build(
                &generated(),
                &[],
                &[CrateReference::local("models", "/elsewhere/models")],
                "out",
                &mut |_| {},
            )
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidMapping(_)));
    }

    #[test]
    fn test_instantiate_checks_arity_and_arguments() {
        let scratch = tempfile::tempdir().unwrap();
        let pipeline = BuildPipeline::new(FakeCompiler::succeeding()).in_directory(scratch.path());
        let built = pipeline.build(&generated(), &[], &[], "out", &mut |_| {}).unwrap();

        assert_eq!(
            built.instantiate("Interceptor", &["models.StringEntity"]).unwrap(),
            "out::Interceptor<::models::StringEntity>"
        );
        assert_eq!(
            built.instantiate("Interceptor", &["docpad::Document"]).unwrap(),
            "out::Interceptor<::docpad::Document>"
        );
        assert_eq!(built.instantiate("testns::driver", &[]).unwrap(), "out::testns::driver");
        assert!(matches!(
            built.instantiate("Interceptor", &[]),
            Err(DriverError::InvalidMapping(_))
        ));
        assert!(matches!(
            built.instantiate("Interceptor", &["models::Other"]),
            Err(DriverError::UnresolvedType { .. })
        ));
        assert!(matches!(
            built.instantiate("Missing", &[]),
            Err(DriverError::UnresolvedType { .. })
        ));
    }

    #[test]
    fn test_invalid_identity_rejected() {
        let pipeline = BuildPipeline::new(FakeCompiler::succeeding());
        let err = pipeline
            .build(&generated(), &[], &[], "not valid", &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidMapping(_)));
    }
}
