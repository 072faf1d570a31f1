//! Lazily started inference engine.
//!
//! The locator and extractor live on one dedicated OS thread and are reached
//! through a cloneable [`EngineHandle`]. Models are loaded on first use, once
//! per process; a failed load is not cached. A panic inside the pipeline is
//! reported to its caller and the thread keeps serving.

use facereg_core::detector::DetectorError;
use facereg_core::recognizer::RecognizerError;
use facereg_core::{
    EmbeddingExtractor, Embedding, FaceDetector, FaceLocator, FacePipeline, FaceRecognizer,
    PipelineError,
};
use image::RgbImage;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, OnceCell};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("model loading aborted: {0}")]
    LoadAborted(String),
    #[error("engine thread exited")]
    ChannelClosed,
}

pub type BoxedLocator = Box<dyn FaceLocator + Send>;
pub type BoxedExtractor = Box<dyn EmbeddingExtractor + Send>;

pub type LoadedModels = (BoxedLocator, BoxedExtractor);

/// Produces the capabilities the engine thread will own. Runs on the blocking pool.
pub type ModelLoader = Arc<dyn Fn() -> Result<LoadedModels, EngineError> + Send + Sync>;

enum EngineRequest {
    Embed {
        image: RgbImage,
        reply: oneshot::Sender<Result<Embedding, PipelineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Embed the most prominent face in `image`.
    pub async fn embed(&self, image: RgbImage) -> Result<Embedding, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Embed {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Load the models and start the engine thread.
fn spawn_engine(loader: &ModelLoader, max_detect_width: u32) -> Result<EngineHandle, EngineError> {
    let (locator, extractor) = loader()?;
    let mut pipeline = FacePipeline::new(locator, extractor).with_max_detect_width(max_detect_width);

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("facereg-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Embed { image, reply } => {
                        let result = panic::catch_unwind(AssertUnwindSafe(|| pipeline.embed(image)))
                            .unwrap_or_else(|payload| {
                                let message = panic_message(&*payload);
                                tracing::error!(panic = %message, "face pipeline panicked");
                                Err(PipelineError::Extraction(RecognizerError::InferenceFailed(format!(
                                    "pipeline panicked: {message}"
                                ))))
                            });
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// One-time-initialized owner of the inference engine.
pub struct Engine {
    loader: ModelLoader,
    max_detect_width: u32,
    handle: OnceCell<EngineHandle>,
}

impl Engine {
    pub fn new(loader: ModelLoader, max_detect_width: u32) -> Self {
        Self {
            loader,
            max_detect_width,
            handle: OnceCell::new(),
        }
    }

    /// Engine backed by the SCRFD and ArcFace ONNX models.
    pub fn onnx(scrfd_path: PathBuf, arcface_path: PathBuf, max_detect_width: u32) -> Self {
        let loader: ModelLoader = Arc::new(move || -> Result<LoadedModels, EngineError> {
            let scrfd = scrfd_path.to_string_lossy();
            let detector = FaceDetector::load(&scrfd)?;
            tracing::info!(path = %scrfd, "SCRFD detector loaded");

            let arcface = arcface_path.to_string_lossy();
            let recognizer = FaceRecognizer::load(&arcface)?;
            tracing::info!(path = %arcface, "ArcFace recognizer loaded");

            Ok((Box::new(detector) as BoxedLocator, Box::new(recognizer) as BoxedExtractor))
        });
        Self::new(loader, max_detect_width)
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.initialized()
    }

    /// The running engine, loading the models if this is the first use.
    ///
    /// Concurrent first callers wait on the same load.
    pub async fn handle(&self) -> Result<&EngineHandle, EngineError> {
        self.handle
            .get_or_try_init(|| async {
                tracing::info!("loading face models");
                let loader = Arc::clone(&self.loader);
                let max_detect_width = self.max_detect_width;
                let handle = match tokio::task::spawn_blocking(move || spawn_engine(&loader, max_detect_width)).await {
                    Ok(result) => result,
                    Err(e) => Err(EngineError::LoadAborted(e.to_string())),
                };
                match &handle {
                    Ok(_) => tracing::info!("face models ready"),
                    Err(e) => tracing::error!(error = %e, "failed to load face models"),
                }
                handle
            })
            .await
    }

    pub async fn embed(&self, image: RgbImage) -> Result<Embedding, EngineError> {
        self.handle().await?.embed(image).await
    }

    /// Load the models ahead of the first request.
    pub async fn warm_up(&self) -> Result<(), EngineError> {
        self.handle().await.map(|_| ())
    }
}
