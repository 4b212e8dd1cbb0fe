//! Errors returned by the routing core.
//!
//! Only identity resolution failures are fatal; everything else is
//! logged by the caller and the proxy keeps serving.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("read {}: {source}", .path.display())]
    ReadIdentity {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("inspect self: {0}")]
    InspectSelf(#[source] Box<Error>),

    #[error("no custom network found on container {0}")]
    NoCustomNetwork(String),

    #[error("container {0} not found")]
    ContainerNotFound(String),

    #[error("docker: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("event stream closed")]
    StreamClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
