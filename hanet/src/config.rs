use std::convert::TryFrom;

use displaydoc::Display;
use serde::Deserialize;
use thiserror::Error;

use layer::dropout::{Dropout, InvalidProbability};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    /// The vocabulary must at least contain the padding token
    VocabSize,
    /// There must be at least one class
    NumClass,
    /// The embedding size must be at least one
    EmbeddingSize,
    /// The hidden size must be at least one
    HiddenSize,
    /// {0}
    Dropout(#[from] InvalidProbability),
}

/// The classifier architectures.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Hierarchical attention network over documents of sentences.
    Han,
    /// Word attention network over the gathered words of tweets.
    Cwan,
    /// [`ModelKind::Cwan`] with a token-aware branch and an attention gated recurrence.
    Acwan,
}

impl ModelKind {
    /// The default embedding and hidden sizes.
    fn default_sizes(self) -> (usize, usize) {
        match self {
            ModelKind::Han => (200, 50),
            ModelKind::Cwan | ModelKind::Acwan => (200, 100),
        }
    }
}

/// The recurrent cells of the encoders.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    Gru,
    Lstm,
}

impl Default for CellKind {
    fn default() -> Self {
        CellKind::Gru
    }
}

/// The configuration of a classifier.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(try_from = "ConfigFile")]
pub struct Config {
    kind: ModelKind,
    vocab_size: usize,
    num_class: usize,
    emb_size: usize,
    hid_size: usize,
    dropout: f32,
    cell: CellKind,
}

impl Config {
    pub const DEFAULT_DROPOUT: f32 = 0.5;

    /// Creates a configuration with the defaults of the architecture.
    ///
    /// # Errors
    /// Fails if the vocabulary or the number of classes is empty.
    pub fn new(kind: ModelKind, vocab_size: usize, num_class: usize) -> Result<Self, ConfigError> {
        if vocab_size == 0 {
            return Err(ConfigError::VocabSize);
        }
        if num_class == 0 {
            return Err(ConfigError::NumClass);
        }

        let (emb_size, hid_size) = kind.default_sizes();
        Ok(Self {
            kind,
            vocab_size,
            num_class,
            emb_size,
            hid_size,
            dropout: Self::DEFAULT_DROPOUT,
            cell: CellKind::default(),
        })
    }

    /// Sets the embedding size.
    ///
    /// Defaults to `200`.
    ///
    /// # Errors
    /// Fails if `size` is zero.
    pub fn with_embedding_size(mut self, size: usize) -> Result<Self, ConfigError> {
        if size > 0 {
            self.emb_size = size;
            Ok(self)
        } else {
            Err(ConfigError::EmbeddingSize)
        }
    }

    /// Sets the hidden size of the recurrent encoders.
    ///
    /// Defaults to `50` for [`ModelKind::Han`] and `100` otherwise.
    ///
    /// # Errors
    /// Fails if `size` is zero.
    pub fn with_hidden_size(mut self, size: usize) -> Result<Self, ConfigError> {
        if size > 0 {
            self.hid_size = size;
            Ok(self)
        } else {
            Err(ConfigError::HiddenSize)
        }
    }

    /// Sets the dropout probability used during training.
    ///
    /// Defaults to [`Config::DEFAULT_DROPOUT`].
    ///
    /// # Errors
    /// Fails if `probability` is not in `[0, 1)`.
    pub fn with_dropout(mut self, probability: f32) -> Result<Self, ConfigError> {
        self.dropout = Dropout::new(probability)?.probability();
        Ok(self)
    }

    /// Sets the recurrent cell.
    ///
    /// Defaults to [`CellKind::Gru`].
    pub fn with_cell(mut self, cell: CellKind) -> Self {
        self.cell = cell;
        self
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn num_class(&self) -> usize {
        self.num_class
    }

    pub fn embedding_size(&self) -> usize {
        self.emb_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hid_size
    }

    pub fn dropout(&self) -> f32 {
        self.dropout
    }

    pub fn cell(&self) -> CellKind {
        self.cell
    }
}

/// The (json) file representation of a [`Config`], unset values take the defaults.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    kind: ModelKind,
    vocab_size: usize,
    num_class: usize,
    emb_size: Option<usize>,
    hid_size: Option<usize>,
    dropout: Option<f32>,
    #[serde(default)]
    cell: CellKind,
}

impl TryFrom<ConfigFile> for Config {
    type Error = ConfigError;

    fn try_from(file: ConfigFile) -> Result<Self, Self::Error> {
        let mut config =
            Config::new(file.kind, file.vocab_size, file.num_class)?.with_cell(file.cell);
        if let Some(size) = file.emb_size {
            config = config.with_embedding_size(size)?;
        }
        if let Some(size) = file.hid_size {
            config = config.with_hidden_size(size)?;
        }
        if let Some(probability) = file.dropout {
            config = config.with_dropout(probability)?;
        }
        Ok(config)
    }
}
