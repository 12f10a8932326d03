use crate::config::Device;
use crate::error::{FinderError, Result};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider,
    DirectMLExecutionProvider, ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use tracing::info;

pub struct OnnxSession {
    pub session: Session,
}

impl OnnxSession {
    pub fn new(path: impl AsRef<Path>, device: Device) -> Result<Self> {
        let threads = num_cpus::get();
        info!("Creating ONNX session for {} on device {device}", path.as_ref().display());
        let session = Session::builder()
            .map_err(onnx)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(onnx)?
            .with_intra_threads(threads)
            .map_err(onnx)?
            .with_execution_providers(execution_providers(device))
            .map_err(onnx)?
            .commit_from_file(path)?;

        Ok(Self { session })
    }

    /// Whether the model has an input called `name`.
    #[must_use]
    pub fn has_input(&self, name: &str) -> bool {
        self.session.inputs.iter().any(|i| i.name == name)
    }

    /// First of `possibilities` the model actually takes as an input.
    #[must_use]
    pub fn find_input(&self, possibilities: &[&str]) -> Option<String> {
        possibilities
            .iter()
            .find(|p| self.has_input(p))
            .map(|p| (*p).to_string())
    }
}

/// Providers in preference order. ONNX Runtime skips the ones it cannot
/// register and CPU always closes the list.
#[must_use]
pub fn execution_providers(device: Device) -> Vec<ExecutionProviderDispatch> {
    let cpu = CPUExecutionProvider::default().build();
    match device {
        Device::Cpu => vec![cpu],
        Device::Cuda => vec![CUDAExecutionProvider::default().build(), cpu],
        Device::CoreMl => vec![CoreMLExecutionProvider::default().build(), cpu],
        Device::DirectMl => vec![DirectMLExecutionProvider::default().build(), cpu],
        Device::Auto => vec![
            CUDAExecutionProvider::default().build(),
            CoreMLExecutionProvider::default().build(),
            DirectMLExecutionProvider::default().build(),
            cpu,
        ],
    }
}

fn onnx<E: Into<ort::Error>>(err: E) -> FinderError {
    FinderError::Onnx(err.into())
}
