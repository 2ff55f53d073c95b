//! Integration module for driving the trackers from a host application.
//!
//! This module provides the tracking session, inference backends for the neural detector
//! (ONNX via tract, Burn), and frame rate bookkeeping.

mod fps;
mod network;
mod session;

pub use fps::FrameRateMonitor;
pub use network::{DetectionNetwork, load_labels, load_network};
pub use session::{SessionConfig, TrackingSession};

#[cfg(feature = "onnx")]
mod onnx_backend;

#[cfg(feature = "onnx")]
pub use onnx_backend::OnnxNetwork;

#[cfg(feature = "burn-backend")]
mod burn_backend;

#[cfg(feature = "burn-backend")]
pub use burn_backend::{BurnModel, BurnNetwork};
