//! Hierarchical attention classifiers.
//!
//! Provides the attention primitives, the attentional encoders and the [`Han`], [`Cwan`] and
//! [`Acwan`] classifiers built from them.
#![cfg_attr(doc, forbid(broken_intra_doc_links, private_intra_doc_links))]

pub mod attention;
pub mod batch;
pub mod config;
pub mod encoder;
pub mod gated;
pub mod model;
pub mod reorder;
pub mod token_aware;

pub use crate::{
    batch::{BatchError, HanBatch, Tokens, TweetBatch},
    config::{CellKind, Config, ConfigError, ModelKind},
    model::{acwan::Acwan, cwan::Cwan, han::Han, ModelError},
    reorder::{ReorderError, UnitOrder},
};
pub use layer::{
    dropout::Mode,
    recurrent::{Gru, Lstm},
};
