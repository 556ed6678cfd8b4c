//! Hierarchical attention network.

use std::io::{Read, Write};

use log::{debug, trace};
use ndarray::{Array2, Array3};
use rand::Rng;

use crate::{
    batch::HanBatch,
    config::{Config, ConfigError, ModelKind},
    encoder::AttentionalBiRnn,
    model::{check_kind, check_size, check_unused, load_embedding, ModelError},
    reorder::reorder_rows,
};
use layer::{
    activation::{ActivationFunction, Linear, Selu},
    dense::Dense,
    dropout::{AlphaDropout, Dropout, Mode},
    embedding::Embedding,
    io::BinParams,
    recurrent::{Gru, RecurrentCell},
};

/// A hierarchical attention network classifying documents made of sentences.
///
/// The words of each sentence are pooled into a sentence vector, the sentence vectors of
/// each document are pooled into a document vector, which is classified by three SELU
/// activated linear layers.
#[derive(Clone, Debug)]
pub struct Han<C = Gru> {
    embedding: Embedding,
    dropout: Dropout,
    alpha_dropout: AlphaDropout,
    word: AttentionalBiRnn<C>,
    sent: AttentionalBiRnn<C>,
    lin_out: Dense<Linear>,
    lin_out1: Dense<Linear>,
    lin_out2: Dense<Linear>,
}

impl<C> Han<C>
where
    C: RecurrentCell,
{
    pub fn new_with_random_weights<R>(config: &Config, rng: &mut R) -> Result<Self, ModelError>
    where
        R: Rng + ?Sized,
    {
        check_kind(config, ModelKind::Han)?;
        let (emb_size, hid_size) = (config.embedding_size(), config.hidden_size());
        let out_size = 2 * hid_size;

        let model = Self {
            embedding: Embedding::new_with_random_weights(rng, config.vocab_size(), emb_size),
            dropout: Dropout::new(config.dropout()).map_err(ConfigError::from)?,
            alpha_dropout: AlphaDropout::new(config.dropout()).map_err(ConfigError::from)?,
            word: AttentionalBiRnn::new_with_random_weights(rng, emb_size, hid_size),
            sent: AttentionalBiRnn::new_with_random_weights(rng, out_size, hid_size),
            lin_out: Dense::new_with_random_weights(rng, out_size, out_size, Linear),
            lin_out1: Dense::new_with_random_weights(rng, out_size, out_size, Linear),
            lin_out2: Dense::new_with_random_weights(rng, out_size, config.num_class(), Linear),
        };
        debug!("created a random han model for {:?}", config);
        Ok(model)
    }

    /// Loads the model, all parameters must be used.
    pub fn load(config: &Config, mut params: BinParams) -> Result<Self, ModelError> {
        check_kind(config, ModelKind::Han)?;
        let embedding = load_embedding(params.with_scope("embedding"), config)?;
        let word = AttentionalBiRnn::<C>::load(params.with_scope("word"))?;
        let sent = AttentionalBiRnn::<C>::load(params.with_scope("sent"))?;
        let lin_out = Dense::load(params.with_scope("lin_out"), Linear)?;
        let lin_out1 = Dense::load(params.with_scope("lin_out1"), Linear)?;
        let lin_out2 = Dense::load(params.with_scope("lin_out2"), Linear)?;
        check_unused(params)?;

        let out_size = 2 * config.hidden_size();
        check_size("han/word/input", word.input_size(), config.embedding_size())?;
        check_size("han/word/output", word.output_size(), out_size)?;
        check_size("han/sent/input", sent.input_size(), out_size)?;
        check_size("han/sent/output", sent.output_size(), out_size)?;
        lin_out.check_sizes("han/lin_out", out_size, out_size)?;
        lin_out1.check_sizes("han/lin_out1", out_size, out_size)?;
        lin_out2.check_sizes("han/lin_out2", out_size, config.num_class())?;

        debug!("loaded a han model for {:?}", config);
        Ok(Self {
            embedding,
            dropout: Dropout::new(config.dropout()).map_err(ConfigError::from)?,
            alpha_dropout: AlphaDropout::new(config.dropout()).map_err(ConfigError::from)?,
            word,
            sent,
            lin_out,
            lin_out1,
            lin_out2,
        })
    }

    pub fn deserialize_from(config: &Config, source: impl Read) -> Result<Self, ModelError> {
        Self::load(config, BinParams::deserialize_from(source)?)
    }

    pub fn into_params(self) -> BinParams {
        let mut params = BinParams::default();
        self.embedding.store_params(params.with_scope("embedding"));
        self.word.store_params(params.with_scope("word"));
        self.sent.store_params(params.with_scope("sent"));
        self.lin_out.store_params(params.with_scope("lin_out"));
        self.lin_out1.store_params(params.with_scope("lin_out1"));
        self.lin_out2.store_params(params.with_scope("lin_out2"));
        params
    }

    pub fn serialize_into(self, sink: impl Write) -> Result<(), ModelError> {
        self.into_params().serialize_into(sink).map_err(Into::into)
    }

    /// Replaces the embedding table, e.g. with pretrained embeddings.
    pub fn set_embedding(&mut self, weights: Array2<f32>) -> Result<(), ModelError> {
        self.embedding.set_weights(weights)?;
        debug!(
            "set the han embedding to a vocabulary of {}",
            self.embedding.vocab_size()
        );
        Ok(())
    }

    /// Computes the `(documents, num_class)` logits.
    pub fn run(&self, batch: &HanBatch, mode: &mut Mode) -> Result<Array2<f32>, ModelError> {
        let words = self.embedding.run(batch.sentences())?;
        let words = self.dropout.apply(words, mode);
        let sentences = self
            .word
            .pool_time_major(words.view().permuted_axes([1, 0, 2]), batch.sentence_lengths())?
            .pooled;

        let documents: Array3<f32> = reorder_rows(sentences.view(), batch.sentence_order())?;
        trace!(
            "reordered sentences {:?} into documents {:?}",
            sentences.shape(),
            documents.shape()
        );
        let documents = self
            .sent
            .pool_time_major(
                documents.view().permuted_axes([1, 0, 2]),
                batch.document_lengths(),
            )?
            .pooled;

        let out = self.lin_out.run(Selu.apply_to(documents));
        let out = self.alpha_dropout.apply(out, mode);
        let out = self.lin_out1.run(Selu.apply_to(out));
        let out = self.alpha_dropout.apply(out, mode);
        Ok(self.lin_out2.run(Selu.apply_to(out)))
    }
}
