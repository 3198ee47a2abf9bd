//! APB Packager CLI
//!
//! Command-line interface for packaging CloudFormation templates as
//! Ansible Playbook Bundles for the AWS Service Broker.

use anyhow::{bail, Context, Result};
use apb_packager_common::{MappingTables, ServiceBrokerSpec};
use apb_packager_generator::collaborators::{
    DirectoryHelperCatalog, LocalBlobStore, MemoryBlobStore, StaticAccountIdentity, ZipPackager,
};
use apb_packager_generator::{
    ApbGenerator, ArtifactBundle, Collaborators, PackagerConfig, SpecAssembler, DEFAULT_ACL,
};
use apb_packager_parser::{load_service_spec, load_template, CloudFormationTemplate};
use clap::{Args, Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Account id used when a dry run has no real account to derive a bucket from
const DRY_RUN_ACCOUNT: &str = "000000000000";

#[derive(Parser)]
#[command(name = "apb-packager")]
#[command(version, about = "Package CloudFormation templates as Ansible Playbook Bundles", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Transform a template in memory and print the resulting APB spec
    #[command(after_help = "EXAMPLES:\n  \
        # Show the APB spec generated from a template\n  \
        apb-packager inspect --template templates/sqs/template.yaml\n\n  \
        # Use a standalone service spec\n  \
        apb-packager inspect --template template.yaml --service-spec spec.yaml")]
    Inspect {
        #[command(flatten)]
        input: InputArgs,

        /// Print the rewritten template as well
        #[arg(long)]
        show_template: bool,
    },

    /// Transform a template, upload staged objects and write the APB artifacts
    #[command(after_help = "EXAMPLES:\n  \
        # Package into ./build/sqs, staging objects under ./staging\n  \
        apb-packager package \\\n    \
        --template templates/sqs/template.yaml \\\n    \
        --account-id 123456789012 \\\n    \
        --output ./build\n\n  \
        # Use an explicit bucket and key prefix\n  \
        apb-packager package \\\n    \
        --template template.yaml \\\n    \
        --bucket my-assets \\\n    \
        --key-prefix dev/ \\\n    \
        --store-root ./staging")]
    Package {
        #[command(flatten)]
        input: InputArgs,

        /// Build directory; artifacts are written to <output>/<service name>
        #[arg(short, long, default_value = "./build")]
        output: PathBuf,

        /// Directory standing in for the blob store; each bucket is a subdirectory
        #[arg(long, default_value = "./staging")]
        store_root: PathBuf,

        /// Staging bucket (derived from --account-id when not set)
        #[arg(long, env = "APB_PACKAGER_BUCKET")]
        bucket: Option<String>,

        /// Account id used to derive the staging bucket name
        #[arg(long, env = "APB_PACKAGER_ACCOUNT_ID")]
        account_id: Option<String>,

        /// Prefix for every staged key
        #[arg(long, env = "APB_PACKAGER_KEY_PREFIX", default_value = "")]
        key_prefix: String,

        /// ACL applied to staged objects
        #[arg(long, default_value = DEFAULT_ACL)]
        acl: String,

        /// Remove staged objects again after writing the artifacts
        #[arg(long)]
        cleanup: bool,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Path to the CloudFormation template
    #[arg(short, long)]
    template: PathBuf,

    /// Standalone service broker spec (defaults to the template metadata)
    #[arg(short, long)]
    service_spec: Option<PathBuf>,

    /// Directory overriding the built-in mapping tables
    #[arg(long)]
    mappings_dir: Option<PathBuf>,

    /// Directory holding helper functions, one subdirectory per helper
    #[arg(long, default_value = "./helpers")]
    helpers_dir: PathBuf,
}

impl InputArgs {
    fn load(&self) -> Result<(CloudFormationTemplate, ServiceBrokerSpec, MappingTables)> {
        let template = load_template(&self.template)
            .with_context(|| format!("Failed to load template {}", self.template.display()))?;
        let spec = load_service_spec(&template, self.service_spec.as_deref())
            .context("Failed to load service broker spec")?;
        let tables = match &self.mappings_dir {
            Some(dir) => MappingTables::from_dir(dir)
                .with_context(|| format!("Failed to load mapping tables from {}", dir.display()))?,
            None => MappingTables::builtin().context("Failed to load built-in mapping tables")?,
        };
        Ok((template, spec, tables))
    }

    fn template_dir(&self) -> &Path {
        self.template.parent().unwrap_or_else(|| Path::new("."))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Inspect {
            input,
            show_template,
        } => {
            inspect_command(&input, show_template, cli.verbose)?;
        }
        Commands::Package {
            input,
            output,
            store_root,
            bucket,
            account_id,
            key_prefix,
            acl,
            cleanup,
        } => {
            package_command(PackageOptions {
                input: &input,
                output: &output,
                store_root: &store_root,
                bucket,
                account_id,
                key_prefix: &key_prefix,
                acl: &acl,
                cleanup,
                verbose: cli.verbose,
            })?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn inspect_command(input: &InputArgs, show_template: bool, verbose: bool) -> Result<()> {
    println!("{} Inspecting template: {}", "→".cyan(), input.template.display());

    let (template, spec, tables) = input.load()?;
    let config = PackagerConfig::new(service_name(&spec)?);
    let assembler = SpecAssembler::new(
        tables,
        config,
        Collaborators {
            store: Box::new(MemoryBlobStore::new()),
            identity: Box::new(StaticAccountIdentity::new(DRY_RUN_ACCOUNT)),
            packager: Box::new(ZipPackager::new()),
            helpers: Box::new(DirectoryHelperCatalog::new(&input.helpers_dir)),
        },
    );
    let bundle = assembler
        .assemble(&spec, template, input.template_dir())
        .context("Failed to transform template")?;

    println!("\n{}", "✓ Transformation successful!".green().bold());
    print_summary(&bundle, verbose);

    println!("\n{}", "APB spec:".bold());
    print!(
        "{}",
        serde_yaml::to_string(&bundle.apb_spec).context("Failed to render APB spec")?
    );

    if show_template {
        println!("\n{}", "Template:".bold());
        print!(
            "{}",
            bundle
                .template
                .to_yaml_string()
                .context("Failed to render template")?
        );
    }

    Ok(())
}

/// Options of the package command
struct PackageOptions<'a> {
    input: &'a InputArgs,
    output: &'a Path,
    store_root: &'a Path,
    bucket: Option<String>,
    account_id: Option<String>,
    key_prefix: &'a str,
    acl: &'a str,
    cleanup: bool,
    verbose: bool,
}

fn package_command(options: PackageOptions) -> Result<()> {
    let input = options.input;
    println!("{} Packaging template: {}", "→".cyan(), input.template.display());

    if options.bucket.is_none() && options.account_id.is_none() {
        bail!("Either --bucket or --account-id is required to name the staging bucket");
    }

    let (template, spec, tables) = input.load()?;
    let generic = tables.injected_parameters.clone();

    let mut config = PackagerConfig::new(service_name(&spec)?)
        .with_key_prefix(options.key_prefix)
        .with_acl(options.acl)
        .with_build_path(options.output);
    if let Some(bucket) = options.bucket {
        config = config.with_bucket(bucket);
    }
    let output_dir = config
        .output_dir()
        .context("Build path is not configured")?;

    if options.verbose {
        println!("  Service: {}", config.service_name);
        println!("  Key prefix: {}", config.key_prefix());
        println!("  ACL: {}", config.acl);
        println!("  Store: {}", options.store_root.display());
        println!("  Output: {}", output_dir.display());
    }

    let assembler = SpecAssembler::new(
        tables,
        config,
        Collaborators {
            store: Box::new(LocalBlobStore::new(options.store_root)),
            identity: Box::new(StaticAccountIdentity::new(
                options.account_id.unwrap_or_default(),
            )),
            packager: Box::new(ZipPackager::new()),
            helpers: Box::new(DirectoryHelperCatalog::new(&input.helpers_dir)),
        },
    );

    println!("{} Transforming template...", "→".cyan());
    let bundle = assembler
        .assemble(&spec, template, input.template_dir())
        .context("Failed to package template")?;
    print_summary(&bundle, options.verbose);

    println!("{} Writing APB artifacts...", "→".cyan());
    let generator =
        ApbGenerator::new(bundle.clone(), &generic).context("Failed to create generator")?;
    generator
        .generate_to_directory(&output_dir)
        .context("Failed to write APB artifacts")?;

    if options.cleanup {
        println!("{} Removing staged objects...", "→".cyan());
        assembler
            .cleanup_staging(&bundle)
            .context("Failed to remove staged objects")?;
    }

    println!("\n{}", "✓ Packaging complete!".green().bold());
    println!("\n{}", "Generated files:".bold());
    println!("  📄 {}/apb.yml", output_dir.display());
    println!("  📄 {}/template.yaml", output_dir.display());
    for (plan, _) in &bundle.prescribed_parameters {
        println!("  📄 {}/vars/{}.yml", output_dir.display(), plan);
    }
    println!("  📄 {}/bindings.yml", output_dir.display());
    println!("  📄 {}/README.md", output_dir.display());

    if !options.cleanup && !bundle.uploaded_keys.is_empty() {
        println!("\n{}", "Staged objects:".bold());
        for key in &bundle.uploaded_keys {
            println!("  • s3://{}/{}", bundle.staging_bucket, key);
        }
    }

    Ok(())
}

fn print_summary(bundle: &ArtifactBundle, verbose: bool) {
    let spec = &bundle.apb_spec;
    println!("\n{}", "Service:".bold());
    println!("  Name: {}", spec.name.yellow());
    println!("  Display name: {}", spec.display_name().yellow());
    println!("  Plans: {}", spec.plans.len());
    println!("  Bindings: {}", bundle.binding_entries.len());
    println!("  Staging bucket: {}", bundle.staging_bucket);

    if verbose {
        println!("\n{}", "Plans:".bold());
        for plan in &spec.plans {
            let prescribed = bundle
                .prescribed_for(&plan.name)
                .map_or(0, |values| values.len());
            println!(
                "  • {} ({} parameters, {} prescribed)",
                plan.name.cyan(),
                plan.parameters.len(),
                prescribed
            );
        }
        if !bundle.functions.is_empty() {
            println!("\n{}", "Functions:".bold());
            for function in &bundle.functions {
                println!("  • {} → {}", function.name.cyan(), function.key);
            }
        }
    }
}

/// The spec's `Name`, used for staged keys and the output directory
fn service_name(spec: &ServiceBrokerSpec) -> Result<String> {
    match spec.get("Name").and_then(serde_yaml::Value::as_str) {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => bail!("Service broker spec has no Name"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_package_args() {
        let cli = Cli::try_parse_from([
            "apb-packager",
            "package",
            "--template",
            "template.yaml",
            "--bucket",
            "assets",
            "--key-prefix",
            "dev",
            "--cleanup",
        ])
        .unwrap();
        match cli.command {
            Commands::Package {
                input,
                bucket,
                key_prefix,
                acl,
                cleanup,
                ..
            } => {
                assert_eq!(input.template, PathBuf::from("template.yaml"));
                assert_eq!(bucket.as_deref(), Some("assets"));
                assert_eq!(key_prefix, "dev");
                assert_eq!(acl, DEFAULT_ACL);
                assert!(cleanup);
            }
            Commands::Inspect { .. } => panic!("expected package"),
        }
    }

    #[test]
    fn test_service_name() {
        let spec = ServiceBrokerSpec::from_yaml_str("Name: sqs\n").unwrap();
        assert_eq!(service_name(&spec).unwrap(), "sqs");
        let spec = ServiceBrokerSpec::from_yaml_str("DisplayName: SQS\n").unwrap();
        assert!(service_name(&spec).is_err());
    }
}
