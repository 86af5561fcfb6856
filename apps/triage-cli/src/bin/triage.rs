use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use triage_core::config::{expand_path, Config, Settings};
use triage_core::corpus::SKIN_CONDITION_CLASSES;
use triage_pipeline::{PrecomputedClassifier, TaskManager};
use triage_retrieval::RetrievalContext;
use triage_store::open_store;

#[derive(Parser)]
#[command(name = "triage")]
#[command(about = "Skin-condition triage over a local knowledge base")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank knowledge-base entries for a free-text query
    Retrieve {
        query: String,
        /// Number of hits to return
        #[arg(long)]
        k: Option<usize>,
        /// Cosine floor for first-stage candidates
        #[arg(long)]
        min_score: Option<f32>,
    },
    /// Run the triage pipeline for an assessment and print the result
    Assess {
        /// Assessment UUID
        assessment_id: Uuid,
        symptoms: String,
        /// Skin-condition label supplied by an upstream classifier
        #[arg(long, conflicts_with = "image")]
        image_label: Option<String>,
        /// Image reference looked up in `classifier.labels_path`
        #[arg(long)]
        image: Option<String>,
    },
    /// List the skin-condition classes the classifier may emit
    Classes,
    /// Print knowledge-base and store status
    Health,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    if let Commands::Classes = cli.command {
        for class in SKIN_CONDITION_CLASSES {
            println!("{class}");
        }
        return Ok(());
    }

    let settings = Config::load()?.settings()?;
    let retrieval = Arc::new(RetrievalContext::init(&settings)?);

    match cli.command {
        Commands::Retrieve { query, k, min_score } => {
            let mut params = *retrieval.params();
            if let Some(k) = k {
                params.k = k;
            }
            if let Some(min_score) = min_score {
                params.min_score = min_score;
            }
            let hits = retrieval.retrieve_with(&query, &params)?;
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }
        Commands::Assess { assessment_id, symptoms, image_label, image } => {
            let manager = build_manager(&settings, Arc::clone(&retrieval))?;
            info!(%assessment_id, "running triage");
            let result = match image {
                Some(image_ref) => manager.run_image_triage(assessment_id, &symptoms, &image_ref)?,
                None => manager.run_triage_pipeline(assessment_id, &symptoms, image_label.as_deref())?,
            };
            let out = serde_json::json!({ "assessment_id": assessment_id, "result": result });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Health => {
            let manager = build_manager(&settings, Arc::clone(&retrieval))?;
            println!("{}", serde_json::to_string_pretty(&manager.health())?);
        }
        Commands::Classes => {}
    }

    retrieval.close();
    Ok(())
}

fn build_manager(settings: &Settings, retrieval: Arc<RetrievalContext>) -> Result<TaskManager> {
    let store = open_store(&settings.store)?;
    let mut manager = TaskManager::new(retrieval, store);
    if let Some(path) = &settings.classifier.labels_path {
        let classifier = PrecomputedClassifier::load(&expand_path(path))
            .with_context(|| format!("loading classifier labels from {path}"))?;
        manager = manager.with_classifier(Arc::new(classifier));
    }
    Ok(manager)
}
