//! DocChat CLI - Command-line interface
//!
//! Usage:
//!   docchat ingest <path>
//!   docchat cache-put --question <q> --answer <a>
//!   docchat ask <message>
//!   docchat render <template> --var key=value

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use docchat_core::{AppConfig, EnvelopeKind, LlmClient, RagConfig, CACHE_MISS_RESPONSE};
use docchat_rag::{GeminiClient, PromptLibrary, PromptVars, ResponseOrchestrator};
use docchat_vector::{OpenAiEmbedding, PineconeClient, VectorIndexClient};
use futures::StreamExt;
use serde_json::{json, Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docchat")]
#[command(about = "Chat over personal documents")]
#[command(version)]
struct Cli {
    /// TOML config file (defaults to $DOCCHAT_CONFIG, then environment only)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upsert a file, or every file in a directory, into the document index
    Ingest {
        /// File or directory
        path: PathBuf,
        /// Target index (defaults to the document index)
        #[arg(long)]
        index: Option<String>,
        /// Target namespace (defaults to DOC_NAMESPACE, then the default namespace)
        #[arg(long)]
        namespace: Option<String>,
    },
    /// Store an answer in the chat cache
    CachePut {
        #[arg(long)]
        question: String,
        #[arg(long)]
        answer: String,
    },
    /// Answer a message the way the chat server would
    Ask {
        message: String,
        /// Wait for the full answer instead of streaming
        #[arg(long)]
        no_stream: bool,
    },
    /// Render a prompt template locally
    Render {
        template: String,
        /// Substitution as key=value, repeatable
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,
    },
}

/// Clients needed by the remote commands
struct Pipeline {
    index: Arc<VectorIndexClient>,
    orchestrator: ResponseOrchestrator,
    llm: GeminiClient,
}

impl Pipeline {
    fn build(config: &AppConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let embedder = Arc::new(OpenAiEmbedding::from_config(&config.embedding)?);
        let pinecone = Arc::new(PineconeClient::from_config(&config.pinecone)?);
        let prompts = Arc::new(PromptLibrary::load(&config.rag.prompt_library_path)?);
        let index = Arc::new(VectorIndexClient::new(embedder, pinecone, &config.rag));

        Ok(Self {
            orchestrator: ResponseOrchestrator::new(index.clone(), prompts, config.rag.clone()),
            index,
            llm: GeminiClient::from_config(&config.gemini)?,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ingest {
            path,
            index,
            namespace,
        } => {
            let pipeline = Pipeline::build(&config)?;
            let index = index.unwrap_or_else(|| config.rag.doc_index.clone());
            let namespace = ingest_namespace(namespace, &config.rag);

            let mut documents = Vec::new();
            for file in collect_files(&path)? {
                let text = std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                if text.trim().is_empty() {
                    eprintln!("Skipped empty file {}", file.display());
                    continue;
                }

                let mut metadata = Map::new();
                metadata.insert("source".into(), json!(file.display().to_string()));
                documents.push((text, metadata));
            }

            let stored = pipeline
                .index
                .upsert_batch(&index, documents, &namespace)
                .await?;
            println!("Ingested {stored} files into {index} namespace '{namespace}'");
        }
        Commands::CachePut { question, answer } => {
            let pipeline = Pipeline::build(&config)?;

            let mut metadata = Map::new();
            metadata.insert("response".into(), Value::String(answer));

            let cache = &config.rag.cache_index;
            if !pipeline
                .index
                .upsert(cache, &question, "", Some(metadata))
                .await?
            {
                bail!("Could not store answer in {cache}");
            }
            println!("Cached answer in {cache}");
        }
        Commands::Ask { message, no_stream } => {
            let pipeline = Pipeline::build(&config)?;
            let envelope = pipeline.orchestrator.get_response(&message).await;

            match (envelope.result, envelope.kind) {
                (false, _) => println!("{CACHE_MISS_RESPONSE}"),
                (true, Some(EnvelopeKind::Response)) => println!("{}", envelope.response),
                (true, Some(EnvelopeKind::Prompt)) if no_stream => {
                    println!("{}", pipeline.llm.generate(&envelope.response).await?);
                }
                (true, Some(EnvelopeKind::Prompt)) => {
                    let mut stream = pipeline.llm.generate_stream(&envelope.response).await?;
                    let mut stdout = std::io::stdout();
                    while let Some(chunk) = stream.next().await {
                        write!(stdout, "{}", chunk?)?;
                        stdout.flush()?;
                    }
                    writeln!(stdout)?;
                }
                (true, _) => bail!("Unexpected response envelope"),
            }
        }
        Commands::Render { template, vars } => {
            let library = PromptLibrary::load(&config.rag.prompt_library_path)?;
            let vars: PromptVars = vars.into_iter().collect();
            println!("{}", library.render(&template, &vars)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("DOCCHAT_CONFIG").map(PathBuf::from));

    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

/// Namespace ingest writes to; must match what the orchestrator searches
fn ingest_namespace(requested: Option<String>, rag: &RagConfig) -> String {
    requested
        .or_else(|| rag.doc_namespace.clone())
        .unwrap_or_default()
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

/// The file itself, or the regular files directly inside a directory, sorted
fn collect_files(path: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(path)
        .with_context(|| format!("Failed to read directory {}", path.display()))?
    {
        let entry_path = entry?.path();
        if entry_path.is_file() {
            files.push(entry_path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var() {
        assert_eq!(
            parse_var("docs=a=b").unwrap(),
            ("docs".to_string(), "a=b".to_string())
        );
        assert_eq!(parse_var("empty=").unwrap().1, "");
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=x").is_err());
    }

    #[test]
    fn test_ingest_namespace_follows_search_namespace() {
        let rag = RagConfig {
            doc_namespace: Some("notes".to_string()),
            ..Default::default()
        };

        assert_eq!(ingest_namespace(None, &rag), "notes");
        assert_eq!(ingest_namespace(Some("other".into()), &rag), "other");
        assert_eq!(ingest_namespace(None, &RagConfig::default()), "");
    }

    #[test]
    fn test_cli_ingest_namespace_is_optional() {
        let cli = Cli::try_parse_from(["docchat", "ingest", "notes/"]).unwrap();
        match cli.command {
            Commands::Ingest { namespace, .. } => assert_eq!(namespace, None),
            _ => panic!("expected ingest"),
        }
    }

    #[test]
    fn test_collect_files_lists_directory_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.md"), "b").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let files = collect_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.md"]);
    }

    #[test]
    fn test_collect_files_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("note.txt");
        std::fs::write(&file, "hello").unwrap();

        assert_eq!(collect_files(&file).unwrap(), vec![file]);
    }

    #[test]
    fn test_collect_files_missing_path_errors() {
        assert!(collect_files(Path::new("/nonexistent/docchat")).is_err());
    }

    #[test]
    fn test_cli_parses_render_vars() {
        let cli = Cli::try_parse_from([
            "docchat",
            "render",
            "master_response",
            "--var",
            "incoming_msg=hi",
            "--var",
            "docs=none",
        ])
        .unwrap();

        match cli.command {
            Commands::Render { template, vars } => {
                assert_eq!(template, "master_response");
                assert_eq!(vars.len(), 2);
            }
            _ => panic!("expected render"),
        }
    }
}
