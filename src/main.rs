use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use plaquelab::core::db::{CorpusDb, RecordRepository, TrainingRepository};
use plaquelab::{AnnotationSession, DetectionParameters, PlaqueOrigin, TrainError, detect};

#[derive(Parser)]
#[command(name = "plaquelab")]
#[command(about = "Detect and count plaques in dish images")]
struct Cli {
    /// Path to the corpus archive (created on first save)
    #[arg(long, value_name = "FILE", default_value = "corpus.plaquelab")]
    corpus: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect plaques in a dish image, optionally saving the corrected result
    Detect {
        /// Path to input image file
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        #[arg(long, default_value_t = 5.0)]
        min_radius: f32,

        #[arg(long, default_value_t = 50.0)]
        max_radius: f32,

        /// Higher values admit weaker candidates
        #[arg(long, default_value_t = 30.0)]
        sensitivity: f32,

        /// Minimum center spacing between reported plaques
        #[arg(long, default_value_t = 20.0)]
        min_distance: f32,

        /// Manually add a plaque at x,y (repeatable; applied after removals)
        #[arg(long = "add", value_name = "X,Y")]
        add: Vec<String>,

        /// Remove the plaque nearest to x,y (repeatable; applied first)
        #[arg(long = "remove", value_name = "X,Y")]
        remove: Vec<String>,

        /// Save the reconciled result into the corpus
        #[arg(long)]
        save: bool,

        #[arg(long, default_value = "Untitled")]
        sample_name: String,

        #[arg(long, default_value = "")]
        notes: String,
    },
    /// List saved annotation records, most recent first
    History,
    /// Retrain the detector from the accumulated corpus
    Retrain,
    /// Show corpus size and model version
    Stats,
}

fn parse_point(s: &str) -> anyhow::Result<(f32, f32)> {
    let (x, y) = s
        .split_once(',')
        .with_context(|| format!("Expected x,y but got {:?}", s))?;
    Ok((
        x.trim().parse().with_context(|| format!("Bad x in {:?}", s))?,
        y.trim().parse().with_context(|| format!("Bad y in {:?}", s))?,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Detect {
            image,
            min_radius,
            max_radius,
            sensitivity,
            min_distance,
            add,
            remove,
            save,
            sample_name,
            notes,
        } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("Failed to read image {:?}", image))?;
            let params = DetectionParameters {
                min_radius,
                max_radius,
                sensitivity,
                min_distance,
            };

            // When saving, the image moves into the corpus first so the
            // record can reference it by its stored id.
            let db = if save {
                Some(CorpusDb::new(&cli.corpus).await?)
            } else {
                None
            };
            let image_id = match &db {
                Some(db) => db.store_image(&image).await?,
                None => image
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("unnamed")
                    .to_string(),
            };

            let result = detect(&image_id, &bytes, &params)?;
            println!("Detected {} plaques in {:?}", result.count(), image);

            let mut session = AnnotationSession::new(&result);
            for raw in &remove {
                let (x, y) = parse_point(raw)?;
                match session.remove(x, y) {
                    Ok(removed) => println!("Removed plaque at ({:.1}, {:.1})", removed.x, removed.y),
                    Err(e) => println!("{}", e),
                }
            }
            for raw in &add {
                let (x, y) = parse_point(raw)?;
                match session.add(x, y) {
                    Ok(added) => println!("Added plaque at ({:.1}, {:.1})", added.x, added.y),
                    Err(e) => println!("{}", e),
                }
            }

            for (i, plaque) in session.plaques().iter().enumerate() {
                let origin = match plaque.origin {
                    PlaqueOrigin::Auto => "auto",
                    PlaqueOrigin::Manual => "manual",
                };
                println!(
                    "  {}. ({:.1}, {:.1}) r={:.1} confidence={:.2} [{}]",
                    i + 1,
                    plaque.x,
                    plaque.y,
                    plaque.radius,
                    plaque.confidence,
                    origin
                );
            }
            println!("Final count: {}", session.plaques().len());

            if let Some(db) = db {
                let record = session.finalize(&sample_name, &notes);
                let stored = db.append_record(&record).await?;
                db.save_corpus().await?;
                println!(
                    "Saved record {} ({} auto, {} manual)",
                    stored.id, stored.auto_count, stored.manual_count
                );
            }
        }
        Command::History => {
            let db = CorpusDb::new(&cli.corpus).await?;
            let records = db.list_records().await?;
            if records.is_empty() {
                println!("No saved records.");
            }
            for record in records {
                println!(
                    "#{} {} [{}] total={} (auto {}, manual {}) image={}",
                    record.id,
                    record.sample_name,
                    record.created_at,
                    record.total_count,
                    record.auto_count,
                    record.manual_count,
                    record.image_id
                );
            }
        }
        Command::Retrain => {
            let db = CorpusDb::new(&cli.corpus).await?;
            match db.retrain().await {
                Ok(outcome) => {
                    db.save_corpus().await?;
                    println!(
                        "Model retrained to version {} with {} samples",
                        outcome.version, outcome.trained_on
                    );
                }
                Err(e @ (TrainError::InsufficientCorpus { .. } | TrainError::RetrainInProgress)) => {
                    println!("{}", e);
                }
                Err(TrainError::Storage(e)) => return Err(e),
            }
        }
        Command::Stats => {
            let db = CorpusDb::new(&cli.corpus).await?;
            let stats = db.stats().await?;
            println!("Corpus size:   {}", stats.corpus_size);
            println!("Model version: {}", stats.model_version);
        }
    }

    Ok(())
}
