//! Pretrained network backends
//!
//! Model-backed extractors talk to an [`InferenceModel`]; the shipped
//! implementation runs an ONNX graph through ONNX Runtime.

use crate::error::{AppError, Result};
use ndarray::{ArrayD, IxDyn};
use once_cell::sync::OnceCell;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

static ORT_ENV: OnceCell<()> = OnceCell::new();

/// A loaded network mapping one input batch to named outputs
pub trait InferenceModel: Send + Sync {
    /// Model name for logging
    fn name(&self) -> &str;

    /// Run the network on `batch`, returning outputs in the order they were requested
    fn run(&self, batch: ArrayD<f32>) -> Result<Vec<ArrayD<f32>>>;
}

/// ONNX Runtime session with a single float input
pub struct OnnxModel {
    session: Mutex<Session>,
    path: PathBuf,
    input_name: String,
    output_names: Vec<String>,
}

impl OnnxModel {
    /// Load the graph at `path`. Fails if the file is missing or not a valid model.
    pub fn load(path: &Path, input_name: &str, output_names: &[&str]) -> Result<Self> {
        if !path.exists() {
            return Err(AppError::Backend(format!("Model file not found: {:?}", path)));
        }

        ORT_ENV.get_or_init(|| {
            let _ = ort::init().with_name("timbretool").commit();
        });

        info!("Loading ONNX model from {:?}", path);
        let session = Session::builder()
            .map_err(|e| AppError::Backend(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| AppError::Backend(format!("Failed to set optimization level: {}", e)))?
            .commit_from_file(path)
            .map_err(|e| AppError::Backend(format!("Failed to load model {:?}: {}", path, e)))?;
        info!("Model loaded: {:?}", path);

        let inputs: Vec<String> = session.inputs().iter().map(|i| i.name().to_string()).collect();
        let outputs: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        check_tensor_names(path, input_name, output_names, &inputs, &outputs)?;

        Ok(Self {
            session: Mutex::new(session),
            path: path.to_path_buf(),
            input_name: input_name.to_string(),
            output_names: output_names.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Fail unless the graph declares `input_name` and every requested output
fn check_tensor_names(
    path: &Path,
    input_name: &str,
    output_names: &[&str],
    inputs: &[String],
    outputs: &[String],
) -> Result<()> {
    if !inputs.iter().any(|i| i == input_name) {
        return Err(AppError::Backend(format!(
            "Model {:?} has no input {:?} (inputs: {:?})",
            path, input_name, inputs
        )));
    }
    for name in output_names {
        if !outputs.iter().any(|o| o == name) {
            return Err(AppError::Backend(format!(
                "Model {:?} has no output {:?} (outputs: {:?})",
                path, name, outputs
            )));
        }
    }
    Ok(())
}

impl InferenceModel for OnnxModel {
    fn name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("onnx")
    }

    fn run(&self, batch: ArrayD<f32>) -> Result<Vec<ArrayD<f32>>> {
        let shape = batch.shape().to_vec();
        let data: Vec<f32> = batch.iter().copied().collect();

        let input = Tensor::from_array((shape.clone(), data))
            .map_err(|e| AppError::Backend(format!("Failed to create input tensor: {}", e)))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(|e| AppError::Backend(format!("Inference failed: {}", e)))?;

        let mut results = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let value = outputs
                .get(name.as_str())
                .ok_or_else(|| AppError::Backend(format!("Model produced no output {:?}", name)))?;
            let (out_shape, out_data) = value
                .try_extract_tensor::<f32>()
                .map_err(|e| AppError::Backend(format!("Failed to extract {}: {}", name, e)))?;

            let dims: Vec<usize> = out_shape.iter().map(|&d| d as usize).collect();
            let array = ArrayD::from_shape_vec(IxDyn(&dims), out_data.to_vec())
                .map_err(|e| AppError::Backend(format!("Output {} has inconsistent shape: {}", name, e)))?;
            results.push(array);
        }

        debug!("{}: input {:?} -> {} outputs", self.name(), shape, results.len());
        Ok(results)
    }
}
