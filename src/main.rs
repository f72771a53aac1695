use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ember_gate::config::{AppConfig, EventSinkKind};
use ember_gate::embedding::{Embedding, Modality};
use ember_gate::enrollment::EnrollmentManager;
use ember_gate::events::{EventSink, JsonlEventSink, LogEventSink, NullEventSink};
use ember_gate::paths::AppPaths;
use ember_gate::preflight::{run_preflight, CheckStatus};
use ember_gate::store::{EncryptedFileStore, TemplateRepository, TemplateStore};
use ember_gate::validation::{validate_input_file, validate_subject_id};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// Ember Gate - local face + voice multi-factor access control
#[derive(Parser)]
#[command(name = "ember-gate")]
#[command(about = "Manage Ember Gate configuration and enrolled templates")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check configuration and enrollment readiness
    Preflight,
    /// Print the active configuration
    Config,
    /// List enrolled subjects
    List {
        #[arg(value_enum)]
        modality: ModalityArg,
    },
    /// Build and store a template from embeddings
    Enroll {
        subject: String,
        #[arg(value_enum)]
        modality: ModalityArg,
        /// JSON list of vectors or embeddings
        samples: String,
    },
    /// Remove a template
    Delete {
        subject: String,
        #[arg(value_enum)]
        modality: ModalityArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModalityArg {
    Face,
    Voice,
}

impl From<ModalityArg> for Modality {
    fn from(arg: ModalityArg) -> Self {
        match arg {
            ModalityArg::Face => Modality::Face,
            ModalityArg::Voice => Modality::Voice,
        }
    }
}

/// Embeddings as produced by the external provider
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum SampleFile {
    Vectors(Vec<Vec<f32>>),
    Embeddings(Vec<Embedding>),
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli.command) {
        log::error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<()> {
    let paths = AppPaths::new()?;
    paths.ensure_directories()?;
    let config = AppConfig::load_or_create(&paths.config_file())?;

    match command {
        Commands::Config => {
            println!("# {}", paths.config_file().display());
            print!("{}", toml::to_string_pretty(&config).context("Failed to render config")?);
            Ok(())
        }
        Commands::Preflight => {
            let (repository, templates_dir) = open_repository(&paths, &config)?;
            let report = run_preflight(&config, &repository, Some(&templates_dir));
            for item in &report.items {
                let tag = match item.status {
                    CheckStatus::Pass => "PASS",
                    CheckStatus::Warn => "WARN",
                    CheckStatus::Fail => "FAIL",
                };
                println!("[{}] {:<16} {}", tag, item.name, item.message);
                if let Some(hint) = &item.fix_hint {
                    println!("       -> {}", hint);
                }
            }
            if !report.can_proceed {
                bail!("Preflight failed");
            }
            Ok(())
        }
        Commands::List { modality } => {
            let (repository, _) = open_repository(&paths, &config)?;
            let set = repository.templates(modality.into(), true)?;
            for template in set.iter() {
                println!(
                    "{}\t{} samples\t{}\t{}",
                    template.subject_id,
                    template.sample_count,
                    template.created_at.to_rfc3339(),
                    template.fingerprint()
                );
            }
            Ok(())
        }
        Commands::Enroll {
            subject,
            modality,
            samples,
        } => {
            config.validate()?;
            let subject = validate_subject_id(&subject)?;
            let modality = Modality::from(modality);
            let samples = load_samples(&validate_input_file(&samples)?, modality)?;

            let (repository, _) = open_repository(&paths, &config)?;
            let manager = EnrollmentManager::new(
                config.enrollment.clone(),
                Arc::new(repository),
                open_event_sink(&paths, &config)?,
            );
            let template = manager.enroll(subject, modality, &samples)?;
            println!(
                "Enrolled {} template for '{}' from {} samples (fingerprint {})",
                modality,
                template.subject_id,
                template.sample_count,
                template.fingerprint()
            );
            Ok(())
        }
        Commands::Delete { subject, modality } => {
            let subject = validate_subject_id(&subject)?;
            let modality = Modality::from(modality);
            let (repository, _) = open_repository(&paths, &config)?;
            if repository.delete(subject, modality)? {
                println!("Deleted {} template for '{}'", modality, subject);
                Ok(())
            } else {
                bail!("No {} template for '{}'", modality, subject)
            }
        }
    }
}

fn open_repository(paths: &AppPaths, config: &AppConfig) -> Result<(TemplateRepository, PathBuf)> {
    let dir = config
        .storage
        .templates_dir
        .clone()
        .unwrap_or_else(|| paths.templates_dir());
    let store: Arc<dyn TemplateStore> = Arc::new(EncryptedFileStore::open(dir.clone())?);
    Ok((TemplateRepository::new(store), dir))
}

fn open_event_sink(paths: &AppPaths, config: &AppConfig) -> Result<Arc<dyn EventSink>> {
    let sink: Arc<dyn EventSink> = match config.storage.event_sink {
        EventSinkKind::Log => Arc::new(LogEventSink),
        EventSinkKind::Null => Arc::new(NullEventSink),
        EventSinkKind::Jsonl => {
            let path = config
                .storage
                .events_log
                .clone()
                .unwrap_or_else(|| paths.events_log());
            Arc::new(JsonlEventSink::open(&path)?)
        }
    };
    Ok(sink)
}

fn load_samples(path: &std::path::Path, modality: Modality) -> Result<Vec<Embedding>> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read samples: {}", path.display()))?;
    let parsed: SampleFile =
        serde_json::from_str(&json).context("Samples must be a list of vectors or embeddings")?;

    let samples = match parsed {
        SampleFile::Vectors(vectors) => vectors
            .into_iter()
            .map(|v| Embedding::new(modality, v))
            .collect(),
        SampleFile::Embeddings(embeddings) => embeddings,
    };
    log::info!("Loaded {} {} samples from {}", samples.len(), modality, path.display());
    Ok(samples)
}
