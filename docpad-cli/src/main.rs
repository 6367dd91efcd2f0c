use clap::{Args, Parser, Subcommand, ValueEnum};
use docpad::CrateReference;
use docpad_codegen::build::{BuildPipeline, CargoCompiler};
use docpad_codegen::{AccessLayerGenerator, GeneratedSource, TypeRegistry, UnresolvedTypePolicy};
use std::path::PathBuf;
use std::process;

/// docpad CLI - generate and build typed access layers for document stores
#[derive(Parser)]
#[command(name = "docpad", version, about)]
struct Cli {
    /// Path to the connection properties file
    #[arg(long, default_value = "docpad.yaml")]
    properties: PathBuf,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Args)]
struct GenerateArgs {
    /// Name of the generated context type
    #[arg(long, default_value = "Context")]
    context: String,
    /// Module path the context is placed in (e.g. app.data)
    #[arg(long, default_value = "")]
    namespace: String,
    /// Fall back to untyped documents for declared types that cannot be resolved
    #[arg(long)]
    demote_unresolved: bool,
}

#[derive(Subcommand)]
enum Command {
    /// List the declared types found in the referenced crates
    Types,

    /// Print the generated access layer
    Generate {
        #[command(flatten)]
        args: GenerateArgs,
        /// Write one file per source unit into this directory instead
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Generate and compile the access layer
    Build {
        #[command(flatten)]
        args: GenerateArgs,
        /// Crate name of the built unit
        #[arg(long, default_value = "docpad_access")]
        identity: String,
        /// Link against a local docpad checkout instead of the registry release
        #[arg(long)]
        runtime_path: Option<PathBuf>,
        /// Create the build directory here instead of the system temp dir
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let props = docpad::mapping::parse_properties(&cli.properties)?;
    log::debug!(
        "Loaded properties from {} (database '{}')",
        cli.properties.display(),
        props.selected_database
    );
    let registry = TypeRegistry::from_references(&props.references)?;
    log::debug!(
        "Found {} declared type(s) in {} reference(s)",
        registry.iter().count(),
        props.references.len()
    );

    match cli.command {
        Command::Types => {
            let types: Vec<_> = registry
                .iter()
                .map(|t| serde_json::json!({ "path": t.path, "crate": t.source.name }))
                .collect();
            print_output(&serde_json::Value::Array(types), &cli.format)?;
        }

        Command::Generate { args, out_dir } => {
            let generated = generate(&props, &registry, &args)?;
            match out_dir {
                Some(dir) => {
                    std::fs::create_dir_all(&dir)?;
                    let mut written = Vec::new();
                    for unit in &generated.units {
                        let path = dir.join(format!("{}.rs", unit.name));
                        std::fs::write(&path, &unit.text)?;
                        log::info!("Wrote {}", path.display());
                        written.push(path.display().to_string());
                    }
                    print_output(&summary(&generated, serde_json::json!({ "written": written })), &cli.format)?;
                }
                None => print!("{}", generated.render()),
            }
        }

        Command::Build {
            args,
            identity,
            runtime_path,
            out_dir,
        } => {
            let generated = generate(&props, &registry, &args)?;

            let mut pipeline = BuildPipeline::new(CargoCompiler::new());
            if let Some(path) = runtime_path {
                pipeline = pipeline.with_runtime(CrateReference::local("docpad", path));
            }
            if let Some(dir) = out_dir {
                pipeline = pipeline.in_directory(dir);
            }

            log::info!("Building `{identity}` for context {}", generated.context_path);
            let built = pipeline.build(&generated, &[], &props.references, &identity, &mut |m| {
                eprintln!("{m}")
            })?;
            log::info!("Built `{}` in {}", built.identity, built.directory.display());
            let interceptor = built.interceptor()?.generics;
            print_output(
                &summary(
                    &generated,
                    serde_json::json!({
                        "identity": built.identity,
                        "directory": built.directory.display().to_string(),
                        "artifacts": built.artifacts.iter().map(|a| a.display().to_string()).collect::<Vec<_>>(),
                        "interceptor_type_params": interceptor,
                    }),
                ),
                &cli.format,
            )?;
        }
    }

    Ok(())
}

fn generate(
    props: &docpad::ConnectionProperties,
    registry: &TypeRegistry,
    args: &GenerateArgs,
) -> docpad::Result<GeneratedSource> {
    let policy = if args.demote_unresolved {
        UnresolvedTypePolicy::Demote
    } else {
        UnresolvedTypePolicy::Fail
    };
    AccessLayerGenerator::new()
        .unresolved_types(policy)
        .generate(props, registry, &args.context, &args.namespace)
}

/// Common report fields plus whatever the subcommand adds.
fn summary(generated: &GeneratedSource, extra: serde_json::Value) -> serde_json::Value {
    let demoted: Vec<_> = generated
        .demoted
        .iter()
        .map(|d| serde_json::json!({ "collection": d.collection, "declared_type": d.declared_type }))
        .collect();
    let mut report = serde_json::json!({
        "context": generated.context_path,
        "entity_types": generated.entity_types,
        "demoted": demoted,
    });
    if let (Some(report), serde_json::Value::Object(extra)) = (report.as_object_mut(), extra) {
        report.extend(extra);
    }
    report
}

fn print_output(value: &serde_json::Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}
