use thiserror::Error;

use cl_graph::onnx::result::OnnxError;

use crate::genotype::GenotypeError;

pub type NasResult<T> = Result<T, NasError>;

#[derive(Debug, Error)]
pub enum NasError {
    #[error(transparent)]
    Genotype(#[from] GenotypeError),
    #[error(transparent)]
    Onnx(#[from] OnnxError),

    #[error("unknown architecture {0:?}, expected one of cifar, imagenet")]
    UnknownArchitecture(String),
    #[error("unknown model {0:?}, expected one of nasnet, amoebanet, pnas, darts, nasnet_a, randwire")]
    UnknownModel(String),
    #[error("option --{1} does not apply to model {0:?}")]
    UnsupportedOption(String, &'static str),
}
