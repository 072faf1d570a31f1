use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facereg", about = "Face registration and verification CLI")]
struct Cli {
    /// Base URL of the faceregd server
    #[arg(long, env = "FACEREG_SERVER", default_value = "http://127.0.0.1:5000", global = true)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the face in an image under a name and orientation
    Enroll {
        /// Image file containing one face
        image: PathBuf,
        /// Identity label
        #[arg(short, long)]
        name: String,
        /// Pose tag (e.g., "front", "left")
        #[arg(short, long, default_value = "front")]
        orientation: String,
    },
    /// Identify the face in an image
    Match {
        image: PathBuf,
    },
    /// List enrolled identities
    List,
    /// Remove every enrolled orientation for a name
    Remove {
        name: String,
    },
    /// Show server status and trigger model warm-up
    Status,
}

struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    fn new(base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let url = format!("{}{path}", self.base);
        tracing::debug!(%url, "GET");
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("cannot reach {}", self.base))?;
        Self::read(resp).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}{path}", self.base);
        tracing::debug!(%url, "POST");
        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("cannot reach {}", self.base))?;
        Self::read(resp).await
    }

    /// Parse the JSON body, turning non-2xx answers into errors.
    async fn read(resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        tracing::debug!(status = status.as_u16(), "response");
        let body: Value = resp.json().await.context("server returned a non-JSON body")?;
        if !status.is_success() {
            let message = body["error"].as_str().unwrap_or("unknown error");
            bail!("{message} (HTTP {})", status.as_u16());
        }
        Ok(body)
    }
}

fn encode_image(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    if bytes.is_empty() {
        bail!("{} is empty", path.display());
    }
    Ok(STANDARD.encode(bytes))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = Client::new(&cli.server);

    match cli.command {
        Commands::Enroll {
            image,
            name,
            orientation,
        } => {
            let body = json!({
                "image": encode_image(&image)?,
                "name": name,
                "orientation": orientation,
            });
            print_json(&client.post("/upload", body).await?)?;
        }
        Commands::Match { image } => {
            let result = client.post("/match", json!({ "image": encode_image(&image)? })).await?;
            print_json(&result)?;
        }
        Commands::List => {
            let faces = client.get("/faces").await?;
            match faces.as_array() {
                Some(faces) if !faces.is_empty() => {
                    for face in faces {
                        let orientations: Vec<&str> = face["orientations"]
                            .as_array()
                            .map(|o| o.iter().filter_map(Value::as_str).collect())
                            .unwrap_or_default();
                        println!(
                            "{}  ({}: {})",
                            face["name"].as_str().unwrap_or("?"),
                            face["count"],
                            orientations.join(", ")
                        );
                    }
                }
                _ => println!("No faces enrolled"),
            }
        }
        Commands::Remove { name } => {
            let result = client.post("/delete_face", json!({ "name": name })).await?;
            println!("{}", result["message"].as_str().unwrap_or("removed"));
        }
        Commands::Status => {
            print_json(&client.get("/health").await?)?;
        }
    }

    Ok(())
}
